//! Detector strategies.
//!
//! Every variant answers the same question: given one message and its guard
//! config, what should be counted? Duplicate detection hands back a normalized
//! text fingerprint that the window store counts; the scanning detectors count
//! occurrences inside the single message. `None` means skip the event.

use serde::{Deserialize, Serialize};

use crate::config::GuardConfig;
use crate::event::MessageEvent;

mod duplicate;
mod scan;

pub use duplicate::normalize;
pub use scan::{capitals_percent, count_invites, count_links, count_mentions, count_lines};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Duplicates,
    Mentions,
    Capitals,
    Links,
    Invites,
    Newlines,
}

/// What a detector extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// Counted against the scope window.
    Text(String),
    /// Already a trigger count.
    Count(u32),
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 6] = [
        DetectorKind::Duplicates,
        DetectorKind::Mentions,
        DetectorKind::Capitals,
        DetectorKind::Links,
        DetectorKind::Invites,
        DetectorKind::Newlines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Duplicates => "duplicates",
            DetectorKind::Mentions => "mentions",
            DetectorKind::Capitals => "capitals",
            DetectorKind::Links => "links",
            DetectorKind::Invites => "invites",
            DetectorKind::Newlines => "newlines",
        }
    }

    /// Human-readable name used in audit reasons.
    pub fn label(&self) -> &'static str {
        match self {
            DetectorKind::Duplicates => "Duplicated messages",
            DetectorKind::Mentions => "Mention spam",
            DetectorKind::Capitals => "Capital letters",
            DetectorKind::Links => "Links",
            DetectorKind::Invites => "Invite links",
            DetectorKind::Newlines => "Line breaks",
        }
    }

    /// Adder bucket used when the hard punishment leaves it unset.
    pub fn default_adder_key(&self) -> &'static str {
        match self {
            DetectorKind::Duplicates => "messages",
            other => other.as_str(),
        }
    }

    pub fn alert_text(&self, user: &str) -> String {
        match self {
            DetectorKind::Duplicates => format!("{} stop repeating the same message.", user),
            DetectorKind::Mentions => format!("{} you are mentioning too many people.", user),
            DetectorKind::Capitals => format!("{} please stop shouting.", user),
            DetectorKind::Links => format!("{} links are not allowed here.", user),
            DetectorKind::Invites => format!("{} invite links are not allowed here.", user),
            DetectorKind::Newlines => format!("{} your message has too many lines.", user),
        }
    }

    pub fn uses_window(&self) -> bool {
        matches!(self, DetectorKind::Duplicates)
    }

    pub fn extract(&self, event: &MessageEvent, cfg: &GuardConfig) -> Option<Fingerprint> {
        if cfg.threshold == 0 {
            return None;
        }
        let content = event.content()?;
        match self {
            DetectorKind::Duplicates => duplicate::fingerprint(content).map(Fingerprint::Text),
            DetectorKind::Mentions => nonzero(count_mentions(content)),
            DetectorKind::Capitals => capitals_percent(content, cfg.min_length).map(Fingerprint::Count),
            DetectorKind::Links => nonzero(count_links(content, &cfg.allowed)),
            DetectorKind::Invites => nonzero(count_invites(content, &cfg.allowed)),
            DetectorKind::Newlines => nonzero(count_lines(content)),
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn nonzero(n: u32) -> Option<Fingerprint> {
    (n > 0).then_some(Fingerprint::Count(n))
}
