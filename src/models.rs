use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// What happened to an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Start,
    Done,
    Note,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Start, Action::Done, Action::Note];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Done => "DONE",
            Self::Note => "NOTE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(action) = Self::ALL.into_iter().find(|a| a.as_str() == s) {
            return Ok(action);
        }
        if Self::ALL
            .into_iter()
            .any(|a| a.as_str().eq_ignore_ascii_case(s))
        {
            return Err(ValidationError::NotCanonical {
                field: "action",
                value: s.to_string(),
            });
        }
        Err(ValidationError::UnknownAction(s.to_string()))
    }
}

/// Fixed category vocabulary. Declaration order is the ordering used by
/// every map in projection results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Theory,
    Practice,
    Task,
    Game,
    Goal,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Theory,
        Category::Practice,
        Category::Task,
        Category::Game,
        Category::Goal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Theory => "THEORY",
            Self::Practice => "PRACTICE",
            Self::Task => "TASK",
            Self::Game => "GAME",
            Self::Goal => "GOAL",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(category) = Self::ALL.into_iter().find(|c| c.as_str() == s) {
            return Ok(category);
        }
        if Self::ALL
            .into_iter()
            .any(|c| c.as_str().eq_ignore_ascii_case(s))
        {
            return Err(ValidationError::NotCanonical {
                field: "category",
                value: s.to_string(),
            });
        }
        Err(ValidationError::UnknownCategory(s.to_string()))
    }
}

/// Returns true for tokens allowed in the activity slot: `A-Z`, `0-9`, `_`, `-`.
pub fn is_canonical_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// A validated event that has not been appended yet.
///
/// This is the only type the store accepts, so every write goes through
/// [`NewEvent::new`] or [`NewEvent::parse_line`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewEvent {
    action: Action,
    category: Category,
    activity: String,
    remainder: Option<String>,
}

impl NewEvent {
    pub fn new(
        action: Action,
        category: Category,
        activity: impl Into<String>,
        remainder: Option<String>,
    ) -> Result<Self, ValidationError> {
        let activity = activity.into();
        if activity.is_empty() {
            return Err(ValidationError::Missing("activity"));
        }
        if !is_canonical_token(&activity) {
            return Err(ValidationError::NotCanonical {
                field: "activity",
                value: activity,
            });
        }

        let remainder = remainder.filter(|r| !r.trim().is_empty());
        if remainder
            .as_deref()
            .is_some_and(|r| r.contains(['\n', '\r']))
        {
            return Err(ValidationError::MultilineRemainder);
        }

        Ok(Self {
            action,
            category,
            activity,
            remainder,
        })
    }

    /// Parse one canonical log line (without its trailing newline).
    pub fn parse_line(line: &str) -> Result<Self, ValidationError> {
        let mut parts = line.splitn(4, ' ');
        let mut field = |name: &'static str| {
            parts
                .next()
                .filter(|p| !p.is_empty())
                .ok_or(ValidationError::Missing(name))
        };

        let action: Action = field("action")?.parse()?;
        let category: Category = field("category")?.parse()?;
        let activity = field("activity")?.to_string();
        let remainder = parts.next().map(str::to_string);

        Self::new(action, category, activity, remainder)
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn remainder(&self) -> Option<&str> {
        self.remainder.as_deref()
    }

    /// Attach the log position assigned by the store.
    pub(crate) fn at(self, index: usize) -> Event {
        Event {
            index,
            action: self.action,
            category: self.category,
            activity: self.activity,
            remainder: self.remainder,
        }
    }
}

impl fmt::Display for NewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action, self.category, self.activity)?;
        if let Some(remainder) = &self.remainder {
            write!(f, " {remainder}")?;
        }
        Ok(())
    }
}

/// An event as stored in the log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub index: usize,
    pub action: Action,
    pub category: Category,
    pub activity: String,
    pub remainder: Option<String>,
}

impl Event {
    /// Canonical `ACTION CATEGORY ACTIVITY[ remainder]` form.
    pub fn canonical(&self) -> String {
        match &self.remainder {
            Some(r) => format!("{} {} {} {}", self.action, self.category, self.activity, r),
            None => format!("{} {} {}", self.action, self.category, self.activity),
        }
    }
}

/// Session projection (derived from events, never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub category: Category,
    pub activity: String,
    pub start_index: usize,
    /// `None` while the session is still open.
    pub end_index: Option<usize>,
    /// START plus every event that annotated the session.
    pub event_count: usize,
    /// A DONE event annotated this session.
    pub completed: bool,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.end_index.is_none()
    }
}

/// Category counts and their share of all sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioSummary {
    pub counts: BTreeMap<Category, usize>,
    pub percentages: BTreeMap<Category, f64>,
    pub total: usize,
}

/// Event input from API
#[derive(Debug, Deserialize)]
pub struct EventInput {
    pub event: String,
}

/// API Response
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: None,
        }
    }
}
