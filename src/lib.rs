//! Append-only activity log with rule-based parsing and derived sessions.
//!
//! Every activity is one line in `master.log`:
//!
//! ```text
//! START THEORY PANDAS
//! NOTE TASK PYTORCH data loaders are tricky
//! DONE TASK REFACTOR
//! ```
//!
//! The log is the only source of truth. Sessions, ratios and timelines are
//! recomputed from it on every read, and nothing ever edits or deletes a line.
//!
//! # Modules
//!
//! - [`models`]: actions, categories, events, sessions and the line codec
//! - [`store`]: the append-only log (single writer, many readers)
//! - [`parser`]: free text to a suggested event, with a confidence score
//! - [`projections`]: pure replay into sessions, ratios and timelines
//! - [`query`]: a closed set of questions answered from projections
//! - [`context`]: SQLite side tables for raw input and confirmation history
//! - [`ledger`]: everything above wired together
//! - [`api`]: axum HTTP routes over a [`ledger::Ledger`]
//! - [`config`]: TOML config with environment overrides

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod models;
pub mod parser;
pub mod projections;
pub mod query;
pub mod store;

pub use error::{Error, Result};
pub use ledger::Ledger;
