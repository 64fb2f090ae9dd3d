//! Context store: SQLite side tables for everything that must not live in
//! the log.
//!
//! Raw input, parser confidence and the history of suggestions and replies
//! go here. Nothing in this module reads or writes `master.log`; rows only
//! point at events through their log index.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{Action, Category, Event};
use crate::parser::ParsedEvent;

/// Where a recorded decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    /// Suggestion produced by the rule-based parser.
    RuleBased,
    /// Affirmative reply; the suggestion was appended as is.
    Accepted,
    /// Reply that rejected or corrected a suggestion.
    UserCorrection,
}

impl DecisionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleBased => "rule_based",
            Self::Accepted => "user_accepted",
            Self::UserCorrection => "user_correction",
        }
    }

    fn from_column(value: &str) -> Self {
        match value {
            "user_accepted" => Self::Accepted,
            "user_correction" => Self::UserCorrection,
            _ => Self::RuleBased,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseDecision {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub user_input: String,
    pub suggestion: String,
    /// `None` while the suggestion is still waiting for a reply.
    pub user_response: Option<String>,
    pub confidence: f64,
    pub method: DecisionMethod,
}

/// Metadata kept for a confirmed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventContext {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub log_index: usize,
    pub action: Action,
    pub category: Category,
    pub activity: String,
    pub remainder: Option<String>,
    pub raw_input: String,
    pub confidence: f64,
}

pub struct ContextStore {
    conn: Mutex<Connection>,
}

impl ContextStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.initialize()?;
        info!(path = %path.display(), "opened context store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS parse_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                user_input TEXT NOT NULL,
                suggestion TEXT NOT NULL,
                user_response TEXT,
                confidence REAL NOT NULL,
                method TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS event_context (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                action TEXT NOT NULL,
                category TEXT NOT NULL,
                activity TEXT NOT NULL,
                remainder TEXT,
                raw_input TEXT NOT NULL,
                confidence REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_event_context_log_index
                ON event_context(log_index);
            ",
        )?;
        Ok(())
    }

    /// Record a suggestion, or a reply to one.
    pub fn record_decision(
        &self,
        parsed: &ParsedEvent,
        user_response: Option<&str>,
        method: DecisionMethod,
    ) -> Result<i64> {
        let conn = self.lock();
        let confidence = match method {
            DecisionMethod::RuleBased => parsed.confidence,
            DecisionMethod::Accepted => 1.0,
            // a correction marks the suggestion as wrong
            DecisionMethod::UserCorrection => 0.0,
        };
        conn.execute(
            "INSERT INTO parse_decisions
                (recorded_at, user_input, suggestion, user_response, confidence, method)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Utc::now(),
                parsed.raw_input,
                parsed.canonical(),
                user_response,
                confidence,
                method.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, suggestion = %parsed.canonical(), method = method.as_str(), "recorded parse decision");
        Ok(id)
    }

    /// Keep the context of a confirmed event next to its log index.
    pub fn record_event(&self, event: &Event, parsed: &ParsedEvent) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO event_context
                (recorded_at, log_index, action, category, activity, remainder, raw_input, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now(),
                event.index as i64,
                event.action.as_str(),
                event.category.as_str(),
                event.activity,
                event.remainder,
                parsed.raw_input,
                parsed.confidence,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All decisions, oldest first.
    pub fn decisions(&self) -> Result<Vec<ParseDecision>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, recorded_at, user_input, suggestion, user_response, confidence, method
             FROM parse_decisions ORDER BY id",
        )?;
        let rows = stmt.query_map([], decision_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Latest context recorded for the event at `log_index`.
    pub fn context_for(&self, log_index: usize) -> Result<Option<EventContext>> {
        let conn = self.lock();
        let context = conn
            .query_row(
                "SELECT id, recorded_at, log_index, action, category, activity, remainder,
                        raw_input, confidence
                 FROM event_context WHERE log_index = ?1
                 ORDER BY id DESC LIMIT 1",
                params![log_index as i64],
                context_from_row,
            )
            .optional()?;
        Ok(context)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decision_from_row(row: &Row<'_>) -> rusqlite::Result<ParseDecision> {
    let method: String = row.get(6)?;
    Ok(ParseDecision {
        id: row.get(0)?,
        recorded_at: row.get(1)?,
        user_input: row.get(2)?,
        suggestion: row.get(3)?,
        user_response: row.get(4)?,
        confidence: row.get(5)?,
        method: DecisionMethod::from_column(&method),
    })
}

fn context_from_row(row: &Row<'_>) -> rusqlite::Result<EventContext> {
    let log_index: i64 = row.get(2)?;
    let action: String = row.get(3)?;
    let category: String = row.get(4)?;
    Ok(EventContext {
        id: row.get(0)?,
        recorded_at: row.get(1)?,
        log_index: log_index as usize,
        action: action.parse().map_err(|e| invalid_column(3, e))?,
        category: category.parse().map_err(|e| invalid_column(4, e))?,
        activity: row.get(5)?,
        remainder: row.get(6)?,
        raw_input: row.get(7)?,
        confidence: row.get(8)?,
    })
}

fn invalid_column(column: usize, err: crate::error::ValidationError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::EventParser;

    #[test]
    fn records_suggestion_and_correction() {
        let store = ContextStore::open_in_memory().unwrap();
        let parser = EventParser::default();
        let first = parser.parse("Started working on pandas theory chapter 3");

        store.record_decision(&first, None, DecisionMethod::RuleBased).unwrap();
        store
            .record_decision(&first, Some("no, it was rust practice"), DecisionMethod::UserCorrection)
            .unwrap();

        let decisions = store.decisions().unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].suggestion, "START THEORY PANDAS");
        assert_eq!(decisions[0].user_response, None);
        assert_eq!(decisions[0].confidence, 1.0);
        assert_eq!(decisions[1].method, DecisionMethod::UserCorrection);
        assert_eq!(decisions[1].confidence, 0.0);
        assert_eq!(decisions[1].user_response.as_deref(), Some("no, it was rust practice"));
    }

    #[test]
    fn accepted_reply_is_kept_with_its_text() {
        let store = ContextStore::open_in_memory().unwrap();
        let parsed = EventParser::default().parse("Done with database refactor");

        store.record_decision(&parsed, None, DecisionMethod::RuleBased).unwrap();
        store.record_decision(&parsed, Some("yes"), DecisionMethod::Accepted).unwrap();

        let decisions = store.decisions().unwrap();
        assert_eq!(decisions[0].confidence, 0.5);
        assert_eq!(decisions[1].method, DecisionMethod::Accepted);
        assert_eq!(decisions[1].user_response.as_deref(), Some("yes"));
        assert_eq!(decisions[1].confidence, 1.0);
        assert_eq!(decisions[1].suggestion, decisions[0].suggestion);
    }

    #[test]
    fn event_context_round_trips_by_index() {
        let store = ContextStore::open_in_memory().unwrap();
        let parsed = EventParser::default().parse("Note: pytorch data loaders are tricky");
        let event = parsed.to_event().unwrap().at(7);

        store.record_event(&event, &parsed).unwrap();

        let context = store.context_for(7).unwrap().unwrap();
        assert_eq!(context.log_index, 7);
        assert_eq!(context.action, Action::Note);
        assert_eq!(context.activity, "PYTORCH");
        assert_eq!(context.remainder.as_deref(), Some("data loaders are tricky"));
        assert_eq!(context.raw_input, "Note: pytorch data loaders are tricky");
        assert!(store.context_for(8).unwrap().is_none());
    }

    #[test]
    fn reopening_keeps_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("context.db");
        let parsed = EventParser::default().parse("start rust practice");
        {
            let store = ContextStore::open(&path).unwrap();
            store.record_decision(&parsed, None, DecisionMethod::RuleBased).unwrap();
        }
        let store = ContextStore::open(&path).unwrap();
        assert_eq!(store.decisions().unwrap().len(), 1);
    }
}
