//! Projections derived from the event log.
//!
//! Everything here is a pure function of an event slice: no clock, no I/O,
//! no hidden state. Replaying the same log always yields the same sessions
//! and ratios.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Action, Category, Event, RatioSummary, Session};

/// Fold state for [`derive_sessions`].
#[derive(Debug, Default)]
struct SessionFold {
    closed: Vec<Session>,
    open: Option<Session>,
    last_index: Option<usize>,
}

impl SessionFold {
    fn step(mut self, event: &Event) -> Self {
        match event.action {
            Action::Start => {
                let continues = self
                    .open
                    .as_ref()
                    .is_some_and(|s| s.category == event.category && s.activity == event.activity);

                if continues {
                    if let Some(session) = self.open.as_mut() {
                        session.event_count += 1;
                    }
                } else {
                    if let Some(mut session) = self.open.take() {
                        session.end_index = self.last_index;
                        self.closed.push(session);
                    }
                    self.open = Some(Session {
                        category: event.category,
                        activity: event.activity.clone(),
                        start_index: event.index,
                        end_index: None,
                        event_count: 1,
                        completed: false,
                    });
                }
            }
            Action::Done | Action::Note => {
                // Annotations before the first START have no session to attach to.
                if let Some(session) = self.open.as_mut() {
                    session.event_count += 1;
                    if event.action == Action::Done {
                        session.completed = true;
                    }
                }
            }
        }
        self.last_index = Some(event.index);
        self
    }

    fn finish(mut self) -> Vec<Session> {
        self.closed.extend(self.open);
        self.closed
    }
}

/// Replay events into sessions.
///
/// A START for a different (category, activity) pair closes the open session
/// at the previous event. A START for the pair already open continues it.
/// DONE and NOTE annotate the open session. The last session stays open.
pub fn derive_sessions(events: &[Event]) -> Vec<Session> {
    events
        .iter()
        .fold(SessionFold::default(), SessionFold::step)
        .finish()
}

/// The session still open at the end of the log, if any.
pub fn current_session(sessions: &[Session]) -> Option<&Session> {
    sessions.last().filter(|s| s.is_open())
}

/// Count sessions per category and split 100 % between the categories present.
///
/// Percentages are whole numbers assigned by the largest-remainder method, so
/// the `f64` values add up to exactly 100.0 in any summation order. Ties on
/// the remainder go to the category declared first.
pub fn calculate_ratios(sessions: &[Session]) -> RatioSummary {
    let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
    for session in sessions {
        *counts.entry(session.category).or_insert(0) += 1;
    }
    let total = sessions.len();

    RatioSummary {
        percentages: largest_remainder(&counts, total),
        counts,
        total,
    }
}

const WHOLE: usize = 100;

fn largest_remainder(counts: &BTreeMap<Category, usize>, total: usize) -> BTreeMap<Category, f64> {
    if total == 0 {
        return BTreeMap::new();
    }

    let mut units: Vec<(Category, usize, usize)> = counts
        .iter()
        .map(|(category, count)| {
            let scaled = count * WHOLE;
            (*category, scaled / total, scaled % total)
        })
        .collect();

    let assigned: usize = units.iter().map(|(_, floor, _)| floor).sum();
    let mut leftover = WHOLE - assigned;

    let mut order: Vec<usize> = (0..units.len()).collect();
    // stable sort keeps category order among equal remainders
    order.sort_by(|a, b| units[*b].2.cmp(&units[*a].2));
    for idx in order {
        if leftover == 0 {
            break;
        }
        units[idx].1 += 1;
        leftover -= 1;
    }

    units
        .into_iter()
        .map(|(category, whole, _)| (category, whole as f64))
        .collect()
}

/// THEORY sessions per PRACTICE session. `None` without any practice.
pub fn theory_to_practice(summary: &RatioSummary) -> Option<f64> {
    let theory = summary.counts.get(&Category::Theory).copied().unwrap_or(0);
    let practice = summary.counts.get(&Category::Practice).copied().unwrap_or(0);
    (practice > 0).then(|| theory as f64 / practice as f64)
}

/// Sessions in log order that satisfy `predicate`.
pub fn build_timeline<F>(sessions: &[Session], predicate: F) -> Vec<Session>
where
    F: Fn(&Session) -> bool,
{
    let mut timeline: Vec<Session> = sessions.iter().filter(|s| predicate(s)).cloned().collect();
    timeline.sort_by_key(|s| s.start_index);
    timeline
}

/// Index-based window over a timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineWindow {
    /// Keep sessions starting at or after this event index.
    pub from_index: Option<usize>,
    /// Keep sessions starting at or before this event index.
    pub to_index: Option<usize>,
    /// Keep only the most recent N sessions after the bounds apply.
    pub last: Option<usize>,
}

impl TimelineWindow {
    pub fn last(n: usize) -> Self {
        Self {
            last: Some(n),
            ..Self::default()
        }
    }

    pub fn contains(&self, session: &Session) -> bool {
        self.from_index.map_or(true, |from| session.start_index >= from)
            && self.to_index.map_or(true, |to| session.start_index <= to)
    }

    pub fn apply(&self, sessions: &[Session]) -> Vec<Session> {
        let mut timeline = build_timeline(sessions, |s| self.contains(s));
        if let Some(n) = self.last {
            let skip = timeline.len().saturating_sub(n);
            timeline.drain(..skip);
        }
        timeline
    }
}
