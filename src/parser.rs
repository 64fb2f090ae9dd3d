//! Rule-based parser from free text to a canonical event suggestion.
//!
//! The parser is advisory: it never touches the log. Callers show the
//! suggestion, and only a confirmed suggestion is appended.
//!
//! Matching is driven by the keyword tables below. Each table is scanned in
//! declared order and the first phrase found wins, so the order of the
//! entries *is* the tie-break rule.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::models::{is_canonical_token, Action, Category, NewEvent};

/// Both action and category matched a keyword.
pub const CONFIDENCE_EXPLICIT: f64 = 1.0;
/// Action or category fell back to its default (or matched only fuzzily).
pub const CONFIDENCE_DEFAULTED: f64 = 0.5;
/// No activity candidate; the activity is a best-effort guess.
pub const CONFIDENCE_FALLBACK: f64 = 0.0;

/// Action phrases, longest first.
pub static ACTION_TABLE: &[(&str, Action)] = &[
    ("wrapped up", Action::Done),
    ("kicked off", Action::Start),
    ("jot down", Action::Note),
    ("kick off", Action::Start),
    ("commenced", Action::Start),
    ("beginning", Action::Start),
    ("completed", Action::Done),
    ("finished", Action::Done),
    ("commence", Action::Start),
    ("starting", Action::Start),
    ("remember", Action::Note),
    ("complete", Action::Done),
    ("started", Action::Start),
    ("resumed", Action::Start),
    ("stopped", Action::Done),
    ("thought", Action::Note),
    ("launch", Action::Start),
    ("resume", Action::Start),
    ("finish", Action::Done),
    ("begin", Action::Start),
    ("began", Action::Start),
    ("start", Action::Start),
    ("ended", Action::Done),
    ("noted", Action::Note),
    ("done", Action::Done),
    ("stop", Action::Done),
    ("note", Action::Note),
    ("jot", Action::Note),
    ("end", Action::Done),
    ("add", Action::Start),
    ("set", Action::Start),
];

/// How a category keyword relates to the activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordRole {
    /// Names the category only; stripped from the activity.
    Cue,
    /// Names the category *and* the activity (game titles).
    Subject,
}

/// Category keywords by priority tier: goals, explicit game cues, theory,
/// practice, task, then game titles. Longest first within a tier.
pub static CATEGORY_TABLE: &[(&str, Category, KeywordRole)] = &[
    ("goals", Category::Goal, KeywordRole::Cue),
    ("goal", Category::Goal, KeywordRole::Cue),
    ("playing", Category::Game, KeywordRole::Cue),
    ("gaming", Category::Game, KeywordRole::Cue),
    ("games", Category::Game, KeywordRole::Cue),
    ("game", Category::Game, KeywordRole::Cue),
    ("play", Category::Game, KeywordRole::Cue),
    ("studying", Category::Theory, KeywordRole::Cue),
    ("learning", Category::Theory, KeywordRole::Cue),
    ("studies", Category::Theory, KeywordRole::Cue),
    ("reading", Category::Theory, KeywordRole::Cue),
    ("lecture", Category::Theory, KeywordRole::Cue),
    ("theory", Category::Theory, KeywordRole::Cue),
    ("study", Category::Theory, KeywordRole::Cue),
    ("learn", Category::Theory, KeywordRole::Cue),
    ("read", Category::Theory, KeywordRole::Cue),
    ("implementing", Category::Practice, KeywordRole::Cue),
    ("practicing", Category::Practice, KeywordRole::Cue),
    ("practising", Category::Practice, KeywordRole::Cue),
    ("exercises", Category::Practice, KeywordRole::Cue),
    ("implement", Category::Practice, KeywordRole::Cue),
    ("exercise", Category::Practice, KeywordRole::Cue),
    ("practice", Category::Practice, KeywordRole::Cue),
    ("practise", Category::Practice, KeywordRole::Cue),
    ("writing", Category::Practice, KeywordRole::Cue),
    ("coding", Category::Practice, KeywordRole::Cue),
    ("assignment", Category::Task, KeywordRole::Cue),
    ("project", Category::Task, KeywordRole::Cue),
    ("chores", Category::Task, KeywordRole::Cue),
    ("chore", Category::Task, KeywordRole::Cue),
    ("tasks", Category::Task, KeywordRole::Cue),
    ("task", Category::Task, KeywordRole::Cue),
    ("work", Category::Task, KeywordRole::Cue),
    ("job", Category::Task, KeywordRole::Cue),
    ("minecraft", Category::Game, KeywordRole::Subject),
    ("overwatch", Category::Game, KeywordRole::Subject),
    ("valorant", Category::Game, KeywordRole::Subject),
    ("fortnite", Category::Game, KeywordRole::Subject),
    ("apex", Category::Game, KeywordRole::Subject),
];

/// Words that introduce the activity qualifier ("session for rust").
const QUALIFIERS: &[&str] = &["for", "on", "with"];

/// Stop-words and fillers never used as the activity.
const STOP_WORDS: &[&str] = &[
    "a", "about", "again", "am", "an", "and", "are", "at", "back", "been", "bit", "chapter",
    "chapters", "currently", "doing", "for", "going", "had", "has", "have", "i", "im", "in", "is",
    "it", "just", "lesson", "me", "my", "not", "now", "of", "on", "page", "pages", "part",
    "section", "session", "sessions", "some", "that", "the", "this", "to", "today", "was", "were",
    "will", "with", "worked", "working",
];

/// Words after which a roman numeral is a chapter number, not an activity.
const NUMBERED_FILLERS: &[&str] = &["chapter", "part", "section", "lesson", "page"];

/// A run ending in one of these collapses to the noun ("database refactor" → REFACTOR).
const PROCESS_NOUNS: &[&str] = &[
    "build", "cleanup", "code", "deploy", "fix", "migration", "refactor", "review", "rewrite",
    "update",
];

/// Trigger words removed from a goal phrase.
const GOAL_TRIGGERS: &[&str] = &["add", "set", "create", "new", "goal", "goals"];

/// Goal horizons, longest phrase first. Stored as the event remainder.
static GOAL_HORIZONS: &[(&str, &str)] = &[
    ("come back to", "COME_BACK_TO"),
    ("short term", "SHORT_TERM"),
    ("medium term", "MEDIUM_TERM"),
    ("long term", "LONG_TERM"),
    ("comeback", "COME_BACK_TO"),
    ("short", "SHORT_TERM"),
    ("medium", "MEDIUM_TERM"),
    ("long", "LONG_TERM"),
];

/// Leading words of a rejection reply ("No, it was theory").
const CORRECTION_PREFIXES: &[&str] = &["incorrect", "actually", "wrong", "nope", "no"];

/// Longest run of adjacent tokens joined into one activity.
const MAX_ACTIVITY_TOKENS: usize = 3;

const UNKNOWN_ACTIVITY: &str = "UNKNOWN";

/// A suggested event. Not part of the log until a caller confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub action: Action,
    pub category: Category,
    pub activity: String,
    #[serde(default)]
    pub remainder: Option<String>,
    pub confidence: f64,
    pub raw_input: String,
}

impl ParsedEvent {
    /// True when the caller must ask before appending.
    pub fn needs_confirmation(&self, threshold: f64) -> bool {
        self.confidence < threshold
    }

    /// Build the event to append. Fails if the suggestion was edited into an
    /// invalid shape on its way back from a client.
    pub fn to_event(&self) -> Result<NewEvent, ValidationError> {
        NewEvent::new(
            self.action,
            self.category,
            self.activity.clone(),
            self.remainder.clone(),
        )
    }

    /// Canonical line for display ("START THEORY PANDAS").
    pub fn canonical(&self) -> String {
        match &self.remainder {
            Some(r) => format!("{} {} {} {}", self.action, self.category, self.activity, r),
            None => format!("{} {} {}", self.action, self.category, self.activity),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy)]
struct CategoryMatch {
    category: Category,
    explicit: bool,
    /// Token consumed by a fuzzy match.
    fuzzy_token: Option<usize>,
}

/// Stateless text-to-event parser.
#[derive(Debug, Clone)]
pub struct EventParser {
    fuzzy: bool,
}

impl Default for EventParser {
    fn default() -> Self {
        Self { fuzzy: true }
    }
}

impl EventParser {
    pub fn new(fuzzy: bool) -> Self {
        Self { fuzzy }
    }

    /// Parse free text into a suggestion. Never fails; the worst case is
    /// `START TASK <guess>` at confidence 0.0.
    pub fn parse(&self, text: &str) -> ParsedEvent {
        let quoted = quoted_span(text);
        let tokens = tokenize(text, quoted);

        let action = match_action(&tokens);
        let category = self.match_category(&tokens);

        let mut remainder =
            quoted.map(|(open, close)| text[open + 1..close].trim().replace(['\r', '\n'], " "));

        let (activity, fallback) = if category.category == Category::Goal {
            let (activity, horizon) = goal_payload(&tokens);
            if remainder.is_none() {
                remainder = horizon.map(str::to_string);
            }
            match activity {
                Some(activity) => (activity, false),
                None => (fallback_activity(&tokens), true),
            }
        } else {
            let skip = skip_mask(&tokens, category.fuzzy_token);
            match choose_run(&tokens, &skip) {
                Some(run) if action == Some(Action::Note) => {
                    let subject = &tokens[run.start];
                    let rest = note_text(&text[subject.end..]);
                    if rest.is_some() {
                        remainder = rest;
                    }
                    (subject.text.to_ascii_uppercase(), false)
                }
                Some(run) => (activity_from_run(&tokens[run]), false),
                None => (fallback_activity(&tokens), true),
            }
        };

        let confidence = if fallback {
            CONFIDENCE_FALLBACK
        } else if action.is_some() && category.explicit {
            CONFIDENCE_EXPLICIT
        } else {
            CONFIDENCE_DEFAULTED
        };

        let parsed = ParsedEvent {
            action: action.unwrap_or(Action::Start),
            category: category.category,
            activity,
            remainder: remainder.filter(|r| !r.is_empty()),
            confidence,
            raw_input: text.to_string(),
        };
        debug!(input = text, suggestion = %parsed.canonical(), confidence, "parsed input");
        parsed
    }

    /// Re-parse a rejection reply such as "No, it was theory" after dropping
    /// the leading refusal words. Earlier events are never edited.
    pub fn parse_correction(&self, reply: &str) -> ParsedEvent {
        self.parse(strip_correction_prefix(reply))
    }

    fn match_category(&self, tokens: &[Token]) -> CategoryMatch {
        for (phrase, category, _) in CATEGORY_TABLE {
            if find_phrase(tokens, phrase).is_some() {
                return CategoryMatch {
                    category: *category,
                    explicit: true,
                    fuzzy_token: None,
                };
            }
        }

        if self.fuzzy {
            for (phrase, category, role) in CATEGORY_TABLE {
                if *role != KeywordRole::Cue || phrase.len() < 5 {
                    continue;
                }
                let hit = tokens.iter().position(|t| {
                    t.text.len() >= 5
                        && !is_action_word(&t.text)
                        && !is_stop_word(&t.text)
                        && strsim::osa_distance(&t.text, phrase) == 1
                });
                if let Some(idx) = hit {
                    debug!(token = %tokens[idx].text, keyword = *phrase, "fuzzy category match");
                    return CategoryMatch {
                        category: *category,
                        explicit: false,
                        fuzzy_token: Some(idx),
                    };
                }
            }
        }

        CategoryMatch {
            category: Category::Task,
            explicit: false,
            fuzzy_token: None,
        }
    }
}

/// Byte range of the first `"..."` pair, quotes included at both ends.
fn quoted_span(text: &str) -> Option<(usize, usize)> {
    let open = text.find('"')?;
    let close = open + 1 + text[open + 1..].find('"')?;
    Some((open, close))
}

/// Lower-case word tokens with their byte spans. Apostrophes are dropped
/// ("I'm" → "im"); tokens inside the quoted span are skipped.
fn tokenize(text: &str, quoted: Option<(usize, usize)>) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<Token> = None;

    for (pos, ch) in text.char_indices() {
        let in_word = ch.is_ascii_alphanumeric() || ch == '_' || ch == '\'';
        if in_word {
            let token = current.get_or_insert_with(|| Token {
                text: String::new(),
                start: pos,
                end: pos,
            });
            if ch != '\'' {
                token.text.push(ch.to_ascii_lowercase());
            }
            token.end = pos + ch.len_utf8();
        } else if let Some(token) = current.take() {
            tokens.push(token);
        }
    }
    tokens.extend(current);

    tokens.retain(|t| {
        !t.text.is_empty() && !quoted.is_some_and(|(open, close)| t.start > open && t.start < close)
    });
    tokens
}

/// Lower-case words of `text`, split the way the parser splits input.
pub(crate) fn words(text: &str) -> Vec<String> {
    tokenize(text, None).into_iter().map(|t| t.text).collect()
}

/// True if `phrase` occurs as a contiguous run of `words`.
pub(crate) fn has_phrase(words: &[String], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split(' ').collect();
    words
        .windows(parts.len())
        .any(|window| window.iter().zip(&parts).all(|(w, p)| w == p))
}

/// "yes", "y", "ok"... as a reply to a suggestion.
pub fn is_affirmative(reply: &str) -> bool {
    let words = words(reply);
    matches!(
        words.first().map(String::as_str),
        Some("yes" | "y" | "yep" | "yeah" | "ok" | "okay" | "correct" | "confirm")
    )
}

fn find_phrase(tokens: &[Token], phrase: &str) -> Option<usize> {
    let words: Vec<&str> = phrase.split(' ').collect();
    tokens
        .windows(words.len())
        .position(|window| window.iter().zip(&words).all(|(t, w)| t.text == *w))
}

/// First action phrase present in the text.
fn match_action(tokens: &[Token]) -> Option<Action> {
    ACTION_TABLE
        .iter()
        .find(|(phrase, _)| find_phrase(tokens, phrase).is_some())
        .map(|(_, action)| *action)
}

fn is_action_word(word: &str) -> bool {
    ACTION_TABLE
        .iter()
        .any(|(phrase, _)| phrase.split(' ').any(|w| w == word))
}

fn is_category_cue(word: &str) -> bool {
    CATEGORY_TABLE
        .iter()
        .any(|(phrase, _, role)| *role == KeywordRole::Cue && *phrase == word)
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

fn is_roman_numeral(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| matches!(c, 'i' | 'v' | 'x' | 'l'))
}

/// Tokens that may not appear in an activity.
fn skip_mask(tokens: &[Token], fuzzy_token: Option<usize>) -> Vec<bool> {
    tokens
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let word = t.text.as_str();
            let numbered = i > 0
                && NUMBERED_FILLERS.contains(&tokens[i - 1].text.as_str())
                && is_roman_numeral(word);
            fuzzy_token == Some(i)
                || is_action_word(word)
                || is_category_cue(word)
                || is_stop_word(word)
                || word.chars().all(|c| c.is_ascii_digit())
                || numbered
        })
        .collect()
}

/// Pick the activity run: the first run right after a qualifier (past any
/// stop-words), otherwise the first run in the text.
fn choose_run(tokens: &[Token], skip: &[bool]) -> Option<std::ops::Range<usize>> {
    let run_at = |start: usize| {
        let len = skip[start..]
            .iter()
            .take_while(|s| !**s)
            .take(MAX_ACTIVITY_TOKENS)
            .count();
        start..start + len
    };

    for (i, token) in tokens.iter().enumerate() {
        if !QUALIFIERS.contains(&token.text.as_str()) {
            continue;
        }
        let mut j = i + 1;
        while j < tokens.len() && is_stop_word(&tokens[j].text) && !QUALIFIERS.contains(&tokens[j].text.as_str()) {
            j += 1;
        }
        if j < tokens.len() && !skip[j] {
            return Some(run_at(j));
        }
    }

    skip.iter().position(|s| !*s).map(run_at)
}

fn activity_from_run(run: &[Token]) -> String {
    if let Some(last) = run.last() {
        if PROCESS_NOUNS.contains(&last.text.as_str()) {
            return last.text.to_ascii_uppercase();
        }
    }
    run.iter()
        .map(|t| t.text.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Last token that is neither an action word nor a stop-word, else `UNKNOWN`.
fn fallback_activity(tokens: &[Token]) -> String {
    tokens
        .iter()
        .rev()
        .map(|t| t.text.as_str())
        .find(|w| (!is_action_word(w) && !is_stop_word(w)) || is_filler_noun(w))
        .map(str::to_ascii_uppercase)
        .filter(|a| is_canonical_token(a))
        .unwrap_or_else(|| UNKNOWN_ACTIVITY.to_string())
}

/// Fillers that still name something ("ended gaming session" → SESSION).
fn is_filler_noun(word: &str) -> bool {
    matches!(word, "session" | "sessions" | "chapter" | "lesson" | "section")
}

/// Goal activity (every non-trigger word) and horizon.
fn goal_payload(tokens: &[Token]) -> (Option<String>, Option<&'static str>) {
    let mut horizon = None;
    let mut horizon_tokens = vec![false; tokens.len()];
    for (phrase, value) in GOAL_HORIZONS {
        if let Some(idx) = find_phrase(tokens, phrase) {
            horizon = Some(*value);
            let len = phrase.split(' ').count();
            horizon_tokens[idx..idx + len].iter_mut().for_each(|h| *h = true);
            if idx + len < tokens.len() && tokens[idx + len].text == "term" {
                horizon_tokens[idx + len] = true;
            }
            break;
        }
    }

    let words: Vec<String> = tokens
        .iter()
        .zip(&horizon_tokens)
        .filter(|(t, in_horizon)| {
            !**in_horizon
                && !GOAL_TRIGGERS.contains(&t.text.as_str())
                && !is_stop_word(&t.text)
        })
        .map(|(t, _)| t.text.to_ascii_uppercase())
        .collect();

    let activity = (!words.is_empty()).then(|| words.join("_"));
    (activity, horizon)
}

/// Free text of a note after its subject, on one line.
fn note_text(rest: &str) -> Option<String> {
    let rest = rest
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | ',' | ';'))
        .trim_end()
        .replace(['\r', '\n'], " ");
    (!rest.is_empty()).then_some(rest)
}

fn strip_correction_prefix(reply: &str) -> &str {
    let mut rest = reply.trim_start();
    loop {
        let lower = rest.to_ascii_lowercase();
        let prefix = CORRECTION_PREFIXES.iter().find(|p| {
            lower.starts_with(**p)
                && !lower[p.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphanumeric())
        });
        match prefix {
            Some(p) => {
                rest = rest[p.len()..].trim_start_matches(|c: char| c.is_whitespace() || c == ',');
            }
            None => return rest,
        }
    }
}
