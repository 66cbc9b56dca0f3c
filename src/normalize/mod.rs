//! Canonical normalizer
//!
//! Maps each platform's status/priority vocabulary onto the canonical enums.
//! Two mechanisms cover every platform:
//!
//! - **Keyword buckets** for free-text labels: ordered word-prefix matching,
//!   first bucket wins, and a default bucket guarantees a result.
//! - **Id lookup** for platforms that identify statuses by number: labels
//!   fetched from the platform, a hard-coded fallback table when that fetch
//!   fails, and the keyword buckets to turn the label into an enum.
//!
//! Both are total: every input yields a canonical member.

pub mod fields;
pub mod xml;

pub use crate::model::ids::{canonical_id, message_id};
pub use xml::{xml_to_value, ArrayFields};

use crate::model::{TicketPriority, TicketStatus};
use std::collections::HashMap;

/// Ordered keyword buckets with a mandatory default
#[derive(Debug, Clone, Copy)]
pub struct KeywordMap<T: 'static> {
    buckets: &'static [(T, &'static [&'static str])],
    default: T,
}

impl<T: Copy + 'static> KeywordMap<T> {
    pub const fn new(buckets: &'static [(T, &'static [&'static str])], default: T) -> Self {
        Self { buckets, default }
    }

    /// First bucket with a keyword found in `label` (case-insensitive)
    pub fn classify(&self, label: &str) -> T {
        let label = label.to_lowercase();
        let words: Vec<&str> = label
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.buckets
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| contains_keyword(&words, k)))
            .map(|(value, _)| *value)
            .unwrap_or(self.default)
    }

    pub fn default_value(&self) -> T {
        self.default
    }
}

/// Words that negate the keyword right after them ("not done")
const NEGATIONS: &[&str] = &["not", "no", "non"];

/// Keyword words must start consecutive label words, so "complete" matches
/// "Completed" but "resolved" does not match "Unresolved"
fn contains_keyword(words: &[&str], keyword: &str) -> bool {
    let parts: Vec<&str> = keyword.split_whitespace().collect();
    if parts.is_empty() || parts.len() > words.len() {
        return false;
    }
    (0..=words.len() - parts.len()).any(|i| {
        let negated = i > 0 && NEGATIONS.contains(&words[i - 1]);
        !negated
            && parts
                .iter()
                .zip(&words[i..])
                .all(|(part, word)| word.starts_with(part))
    })
}

/// Status buckets. "closed" is checked before "solved" so a "Closed
/// (resolved)" label stays closed, and third-party waits land on hold
/// before the generic "waiting" pending bucket.
pub const STATUS_KEYWORDS: KeywordMap<TicketStatus> = KeywordMap::new(
    &[
        (TicketStatus::Closed, &["closed", "spam", "deleted", "archived"]),
        (TicketStatus::Solved, &["solved", "resolved", "done", "complete", "fixed"]),
        (TicketStatus::OnHold, &["hold", "third party", "paused", "suspend"]),
        (TicketStatus::Pending, &["pending", "waiting", "awaiting"]),
        (TicketStatus::Open, &["open", "new", "active", "progress", "assigned"]),
    ],
    TicketStatus::Open,
);

pub const PRIORITY_KEYWORDS: KeywordMap<TicketPriority> = KeywordMap::new(
    &[
        (TicketPriority::Urgent, &["urgent", "critical", "emergency", "blocker"]),
        (TicketPriority::High, &["high", "important", "major"]),
        (TicketPriority::Low, &["low", "minor", "trivial"]),
        (TicketPriority::Normal, &["normal", "medium", "standard"]),
    ],
    TicketPriority::Normal,
);

/// Numeric id → label → canonical value
#[derive(Debug, Clone)]
pub struct IdLookup<T: 'static> {
    labels: HashMap<u64, String>,
    fallback: &'static [(u64, &'static str)],
    keywords: KeywordMap<T>,
}

impl<T: Copy + PartialEq + 'static> IdLookup<T> {
    /// A lookup that starts out on its fallback table
    pub fn new(fallback: &'static [(u64, &'static str)], keywords: KeywordMap<T>) -> Self {
        Self {
            labels: HashMap::new(),
            fallback,
            keywords,
        }
    }

    /// Install labels fetched from the platform
    pub fn set_labels(&mut self, labels: impl IntoIterator<Item = (u64, String)>) {
        self.labels = labels.into_iter().collect();
    }

    pub fn label(&self, id: u64) -> Option<&str> {
        self.labels.get(&id).map(String::as_str).or_else(|| {
            self.fallback
                .iter()
                .find(|(fid, _)| *fid == id)
                .map(|(_, label)| *label)
        })
    }

    pub fn resolve(&self, id: u64) -> T {
        match self.label(id) {
            Some(label) => self.keywords.classify(label),
            None => self.keywords.default_value(),
        }
    }

    /// Raw field value: a numeric id, or a label some endpoints return instead
    pub fn resolve_raw(&self, raw: &str) -> T {
        match raw.trim().parse::<u64>() {
            Ok(id) => self.resolve(id),
            Err(_) => self.keywords.classify(raw),
        }
    }

    /// Reverse lookup for writes: the lowest id whose label maps to `value`
    pub fn id_for(&self, value: T) -> Option<u64> {
        let mut fetched: Vec<u64> = self.labels.keys().copied().collect();
        fetched.sort_unstable();
        fetched
            .into_iter()
            .chain(self.fallback.iter().map(|(id, _)| *id))
            .find(|id| self.resolve(*id) == value)
    }
}
