#![allow(dead_code)]

use activity_ledger::config::LedgerConfig;
use activity_ledger::context::ContextStore;
use activity_ledger::ledger::Ledger;
use activity_ledger::models::Event;
use activity_ledger::store::{read_events, EventLog, StoreOptions};
use tempfile::TempDir;

/// Fresh log in a temp dir. Keep the `TempDir` alive for the test's duration.
pub fn temp_log() -> (TempDir, EventLog) {
    let dir = TempDir::new().unwrap();
    let log = EventLog::open(dir.path().join("master.log"), StoreOptions { fsync: false }).unwrap();
    (dir, log)
}

/// Ledger over a temp log with an in-memory context store.
pub fn temp_ledger() -> (TempDir, Ledger) {
    let (dir, log) = temp_log();
    let context = ContextStore::open_in_memory().unwrap();
    (dir, Ledger::new(log, Some(context), &LedgerConfig::default()))
}

/// Replay canonical lines through a real log file.
pub fn events(lines: &[&str]) -> Vec<Event> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("master.log");
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(&path, content).unwrap();
    read_events(&path).unwrap()
}
