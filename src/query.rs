//! Query engine: a closed set of intents answered from projections.
//!
//! Queries only read. Nothing on this path can append to the log.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Category, Event, RatioSummary, Session};
use crate::parser::{has_phrase, words};
use crate::projections::{
    calculate_ratios, current_session, derive_sessions, theory_to_practice, TimelineWindow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Ratio,
    Summary,
    Timeline,
}

/// Intent cues, scanned in order; first match wins.
pub static INTENT_TABLE: &[(&str, Intent)] = &[
    ("percentages", Intent::Ratio),
    ("percentage", Intent::Ratio),
    ("breakdown", Intent::Ratio),
    ("ratios", Intent::Ratio),
    ("ratio", Intent::Ratio),
    ("split", Intent::Ratio),
    ("yesterday", Intent::Timeline),
    ("timeline", Intent::Timeline),
    ("sessions", Intent::Timeline),
    ("history", Intent::Timeline),
    ("recent", Intent::Timeline),
    ("last", Intent::Timeline),
    ("what did i", Intent::Summary),
    ("worked on", Intent::Summary),
    ("work on", Intent::Summary),
    ("overview", Intent::Summary),
    ("summary", Intent::Summary),
    ("today", Intent::Summary),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub intent: Intent,
    #[serde(default)]
    pub window: Option<TimelineWindow>,
}

impl QueryRequest {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            window: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResult {
    Ratio {
        #[serde(flatten)]
        summary: RatioSummary,
        theory_to_practice: Option<f64>,
    },
    Summary {
        counts: BTreeMap<Category, usize>,
        total: usize,
        activities: Vec<String>,
        open_session: Option<Session>,
    },
    Timeline {
        sessions: Vec<Session>,
        /// Sessions in the whole log, before windowing.
        total: usize,
        active: usize,
    },
}

impl QueryResult {
    /// Human-readable answer.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Ratio {
                summary,
                theory_to_practice,
            } => {
                if summary.total == 0 {
                    return "No sessions logged yet.".to_string();
                }
                let _ = writeln!(out, "Ratio over {} sessions:", summary.total);
                for (category, count) in &summary.counts {
                    let pct = summary.percentages.get(category).copied().unwrap_or(0.0);
                    let _ = writeln!(out, "- {category}: {count} ({pct:.0}%)");
                }
                if let Some(ratio) = theory_to_practice {
                    let _ = writeln!(out, "Theory to practice: {ratio:.2}");
                }
            }
            Self::Summary {
                total,
                activities,
                open_session,
                ..
            } => {
                if *total == 0 {
                    return "Nothing logged yet.".to_string();
                }
                let _ = writeln!(
                    out,
                    "You've worked on {} different activities across {total} sessions:",
                    activities.len()
                );
                for activity in activities {
                    let _ = writeln!(out, "- {activity}");
                }
                if let Some(session) = open_session {
                    let _ = writeln!(out, "Currently: {} {}", session.category, session.activity);
                }
            }
            Self::Timeline {
                sessions, total, ..
            } => {
                if sessions.is_empty() {
                    return "No sessions found.".to_string();
                }
                let _ = writeln!(out, "Sessions ({} of {total}):", sessions.len());
                for session in sessions {
                    let end = session
                        .end_index
                        .map_or_else(|| "open".to_string(), |e| e.to_string());
                    let _ = writeln!(
                        out,
                        "- {} {} [{}..{end}]",
                        session.category, session.activity, session.start_index
                    );
                }
            }
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    recent_sessions: usize,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self { recent_sessions: 5 }
    }
}

impl QueryEngine {
    /// `recent_sessions` is the window a bare timeline question gets.
    pub fn new(recent_sessions: usize) -> Self {
        Self { recent_sessions }
    }

    /// Map free text onto an intent.
    pub fn classify(&self, text: &str) -> Result<QueryRequest> {
        let words = words(text);
        let intent = INTENT_TABLE
            .iter()
            .find(|(phrase, _)| has_phrase(&words, phrase))
            .map(|(_, intent)| *intent)
            .ok_or_else(|| Error::NotUnderstood {
                text: text.to_string(),
            })?;

        let window = (intent == Intent::Timeline).then(|| {
            let last = words
                .windows(2)
                .find(|w| w[0] == "last")
                .and_then(|w| w[1].parse().ok())
                .unwrap_or(self.recent_sessions);
            TimelineWindow::last(last)
        });

        debug!(query = text, ?intent, "classified query");
        Ok(QueryRequest { intent, window })
    }

    /// Answer a request from the full event sequence.
    pub fn run(&self, events: &[Event], request: &QueryRequest) -> QueryResult {
        let sessions = derive_sessions(events);
        match request.intent {
            Intent::Ratio => {
                let summary = calculate_ratios(&sessions);
                QueryResult::Ratio {
                    theory_to_practice: theory_to_practice(&summary),
                    summary,
                }
            }
            Intent::Summary => {
                let activities: BTreeSet<&str> =
                    sessions.iter().map(|s| s.activity.as_str()).collect();
                QueryResult::Summary {
                    counts: calculate_ratios(&sessions).counts,
                    total: sessions.len(),
                    activities: activities.into_iter().map(str::to_string).collect(),
                    open_session: current_session(&sessions).cloned(),
                }
            }
            Intent::Timeline => {
                let window = request.window.unwrap_or_default();
                QueryResult::Timeline {
                    sessions: window.apply(&sessions),
                    total: sessions.len(),
                    active: sessions.iter().filter(|s| s.is_open()).count(),
                }
            }
        }
    }

    /// Classify `text` and answer it.
    pub fn answer(&self, events: &[Event], text: &str) -> Result<QueryResult> {
        let request = self.classify(text)?;
        Ok(self.run(events, &request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewEvent;

    fn events(lines: &[&str]) -> Vec<Event> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| NewEvent::parse_line(line).unwrap().at(i))
            .collect()
    }

    fn sample() -> Vec<Event> {
        events(&[
            "START THEORY PANDAS",
            "START GAME VALORANT",
            "START PRACTICE RUST",
            "START THEORY PANDAS",
            "DONE TASK REFACTOR",
        ])
    }

    #[test]
    fn classifies_like_the_chat_front_end_asks() {
        let engine = QueryEngine::default();
        let intent = |text: &str| engine.classify(text).unwrap().intent;

        assert_eq!(intent("What is my theory to practice ratio?"), Intent::Ratio);
        assert_eq!(intent("What did I work on yesterday?"), Intent::Timeline);
        assert_eq!(intent("What did I work on?"), Intent::Summary);
        assert_eq!(intent("give me a summary"), Intent::Summary);
    }

    #[test]
    fn timeline_window_from_text() {
        let engine = QueryEngine::new(5);
        assert_eq!(
            engine.classify("show the last 2 sessions").unwrap().window,
            Some(TimelineWindow::last(2))
        );
        assert_eq!(
            engine.classify("timeline").unwrap().window,
            Some(TimelineWindow::last(5))
        );
        assert_eq!(engine.classify("ratio").unwrap().window, None);
    }

    #[test]
    fn unknown_query_is_not_understood() {
        let err = QueryEngine::default().classify("how is the weather").unwrap_err();
        match err {
            Error::NotUnderstood { text } => assert_eq!(text, "how is the weather"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ratio_answer() {
        let engine = QueryEngine::default();
        let result = engine.answer(&sample(), "theory to practice ratio").unwrap();

        match &result {
            QueryResult::Ratio {
                summary,
                theory_to_practice,
            } => {
                assert_eq!(summary.total, 4);
                assert_eq!(summary.counts[&Category::Theory], 2);
                assert_eq!(*theory_to_practice, Some(2.0));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(result.render().contains("THEORY: 2 (50%)"));
    }

    #[test]
    fn summary_answer() {
        let result = QueryEngine::default().run(&sample(), &QueryRequest::new(Intent::Summary));
        match result {
            QueryResult::Summary {
                total,
                activities,
                open_session,
                ..
            } => {
                assert_eq!(total, 4);
                assert_eq!(activities, ["PANDAS", "RUST", "VALORANT"]);
                let open = open_session.unwrap();
                assert_eq!(open.activity, "PANDAS");
                assert!(open.completed);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn timeline_answer_is_windowed() {
        let result = QueryEngine::new(2).answer(&sample(), "recent sessions").unwrap();
        match &result {
            QueryResult::Timeline {
                sessions,
                total,
                active,
            } => {
                assert_eq!(sessions.len(), 2);
                assert_eq!(sessions[0].activity, "RUST");
                assert_eq!(*total, 4);
                assert_eq!(*active, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(result.render().contains("THEORY PANDAS [3..open]"));
    }

    #[test]
    fn ratio_serializes_flat() {
        let result = QueryEngine::default().run(&sample(), &QueryRequest::new(Intent::Ratio));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "ratio");
        assert_eq!(json["total"], 4);
        assert_eq!(json["counts"]["THEORY"], 2);
        assert_eq!(json["percentages"]["GAME"], 25.0);
    }

    #[test]
    fn empty_log_renders_gracefully() {
        let engine = QueryEngine::default();
        for intent in [Intent::Ratio, Intent::Summary, Intent::Timeline] {
            let text = engine.run(&[], &QueryRequest::new(intent)).render();
            assert!(!text.is_empty());
        }
    }
}
