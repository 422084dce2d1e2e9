use thiserror::Error;

use crate::detector::DetectorKind;
use crate::event::{ChannelId, UserId};
use crate::punishment::PunishmentAction;

/// Side effects the escalation engine performs on a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    Delete,
    Alert,
    Log,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffect::Delete => "delete",
            SideEffect::Alert => "alert",
            SideEffect::Log => "log",
        }
    }
}

impl std::fmt::Display for SideEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised inside the engine.
///
/// None of these reach the event-dispatch loop: `Engine::handle` folds them
/// into its reports and the structured log.
#[derive(Debug, Error)]
pub enum SelfmodError {
    /// A threshold or capacity that cannot be honoured. The detector is
    /// treated as disabled for the event.
    #[error("invalid {kind} config: {reason}")]
    ConfigInvalid {
        kind: DetectorKind,
        reason: &'static str,
    },

    /// Delete, alert or log failed.
    #[error("{effect} failed: {message}")]
    SideEffect { effect: SideEffect, message: String },

    /// A collaborator call did not finish in time.
    #[error("{operation} timed out after {ms} ms")]
    Timeout { operation: &'static str, ms: u64 },

    /// The soft or hard moderation action did not happen.
    #[error("{action} against user {subject} failed: {message}")]
    Punishment {
        subject: UserId,
        action: PunishmentAction,
        message: String,
    },

    /// A window held more entries than it was bounded to.
    #[error("window for scope {scope} held {len} entries over capacity {capacity}")]
    StoreCorruption {
        scope: ChannelId,
        len: usize,
        capacity: usize,
    },

    #[error("adder store: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SelfmodError>;
