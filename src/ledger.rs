//! The assembled system: one log, one parser, one query engine and an
//! optional context store. Both adapters (HTTP and CLI) go through here.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::context::{ContextStore, DecisionMethod};
use crate::error::Result;
use crate::models::{Event, RatioSummary, Session};
use crate::parser::{is_affirmative, EventParser, ParsedEvent};
use crate::projections::{calculate_ratios, current_session, derive_sessions, TimelineWindow};
use crate::query::{QueryEngine, QueryRequest, QueryResult};
use crate::store::{EventLog, StoreOptions};

/// A parser suggestion waiting for the user.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub suggestion: String,
    pub details: ParsedEvent,
    pub needs_confirmation: bool,
    pub message: String,
}

/// Outcome of a reply to a suggestion.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Logged {
        event: Event,
        session: Option<Session>,
        message: String,
    },
    Corrected(Suggestion),
}

pub struct Ledger {
    log: EventLog,
    parser: EventParser,
    queries: QueryEngine,
    context: Option<ContextStore>,
    confirm_threshold: f64,
}

impl Ledger {
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let log = EventLog::open(
            config.resolved_log_path(),
            StoreOptions {
                fsync: config.storage.fsync,
            },
        )?;
        let context = config
            .resolved_context_db()
            .map(ContextStore::open)
            .transpose()?;
        info!(
            log = %log.path().display(),
            context = context.is_some(),
            "ledger ready"
        );
        Ok(Self::new(log, context, config))
    }

    /// Assemble from parts already opened by the caller.
    pub fn new(log: EventLog, context: Option<ContextStore>, config: &LedgerConfig) -> Self {
        Self {
            log,
            parser: EventParser::new(config.parser.fuzzy),
            queries: QueryEngine::new(config.query.recent_sessions),
            context,
            confirm_threshold: config.parser.confirm_threshold,
        }
    }

    pub fn context(&self) -> Option<&ContextStore> {
        self.context.as_ref()
    }

    /// Parse free text into a suggestion. Nothing is appended.
    pub fn suggest(&self, text: &str) -> Suggestion {
        let parsed = self.parser.parse(text);
        self.note_decision(&parsed, None, DecisionMethod::RuleBased);
        self.suggestion(parsed, "I understood")
    }

    /// Append a suggestion the user accepted.
    pub fn confirm(&self, parsed: &ParsedEvent) -> Result<Event> {
        let event = parsed.to_event()?;
        let index = self.log.append(&event)?;
        let event = event.at(index);
        if let Some(context) = &self.context {
            // the event is already durable; losing its context is not fatal
            if let Err(e) = context.record_event(&event, parsed) {
                warn!(index, error = %e, "failed to record event context");
            }
        }
        Ok(event)
    }

    /// Re-parse a correction of `parsed`. Nothing is appended.
    pub fn correct(&self, parsed: &ParsedEvent, reply: &str) -> Suggestion {
        self.note_decision(parsed, Some(reply), DecisionMethod::UserCorrection);
        let corrected = self.parser.parse_correction(reply);
        self.suggestion(corrected, "Corrected to")
    }

    /// Handle a free-text reply: yes appends, anything else is a correction.
    pub fn respond(&self, parsed: &ParsedEvent, reply: &str) -> Result<Reply> {
        if !is_affirmative(reply) {
            return Ok(Reply::Corrected(self.correct(parsed, reply)));
        }
        let event = self.confirm(parsed)?;
        self.note_decision(parsed, Some(reply), DecisionMethod::Accepted);
        let session = self.session_after_append(event.index);
        Ok(Reply::Logged {
            message: format!("Logged: {}", event.canonical()),
            event,
            session,
        })
    }

    /// Validate and append a canonical line.
    pub fn append_line(&self, line: &str) -> Result<Event> {
        self.log.append_line(line)
    }

    pub fn events(&self) -> Result<Vec<Event>> {
        self.log.read_all()
    }

    pub fn sessions(&self) -> Result<Vec<Session>> {
        Ok(derive_sessions(&self.events()?))
    }

    pub fn current_session(&self) -> Result<Option<Session>> {
        Ok(current_session(&self.sessions()?).cloned())
    }

    pub fn ratios(&self) -> Result<RatioSummary> {
        Ok(calculate_ratios(&self.sessions()?))
    }

    pub fn timeline(&self, window: &TimelineWindow) -> Result<Vec<Session>> {
        Ok(window.apply(&self.sessions()?))
    }

    /// Answer a free-text question.
    pub fn ask(&self, text: &str) -> Result<QueryResult> {
        let request = self.queries.classify(text)?;
        self.query(&request)
    }

    pub fn query(&self, request: &QueryRequest) -> Result<QueryResult> {
        Ok(self.queries.run(&self.events()?, request))
    }

    /// Open session once `index` is durable. The append already succeeded, so
    /// a failed re-read is reported as no session rather than as an error.
    pub fn session_after_append(&self, index: usize) -> Option<Session> {
        match self.current_session() {
            Ok(session) => session,
            Err(e) => {
                warn!(index, error = %e, "appended but could not re-read sessions");
                None
            }
        }
    }

    fn suggestion(&self, parsed: ParsedEvent, lead: &str) -> Suggestion {
        let suggestion = parsed.canonical();
        Suggestion {
            needs_confirmation: parsed.needs_confirmation(self.confirm_threshold),
            message: format!("{lead}: {suggestion}. Is this correct?"),
            suggestion,
            details: parsed,
        }
    }

    fn note_decision(&self, parsed: &ParsedEvent, reply: Option<&str>, method: DecisionMethod) {
        if let Some(context) = &self.context {
            if let Err(e) = context.record_decision(parsed, reply, method) {
                warn!(error = %e, "failed to record parse decision");
            }
        }
    }
}
