//! Trigger evaluation and the escalation report types.
//!
//! An evaluation moves `Idle -> Evaluating -> {NoTrigger | Triggered}`. Only
//! a triggered evaluation performs side effects and punishments; the engine
//! drives those and records what happened in a [`TriggerReport`].

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detector::DetectorKind;
use crate::event::{ChannelId, GuildId, MessageEvent, UserId};
use crate::policy::Bypass;
use crate::punishment::PunishmentAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Evaluating,
    NoTrigger,
    Triggered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub msg: String,
}

/// Per-evaluation state machine.
#[derive(Debug, Clone)]
pub struct Evaluation {
    phase: Phase,
    count: u32,
    threshold: u32,
}

impl Default for Evaluation {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluation {
    pub fn new() -> Self {
        Self { phase: Phase::Idle, count: 0, threshold: 0 }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Evaluating;
                Ok(())
            }
            other => Err(TransitionError { msg: format!("cannot begin from {:?}", other) }),
        }
    }

    /// Compares the trigger count against the threshold. A count at or above
    /// a non-zero threshold triggers.
    pub fn settle(&mut self, count: u32, threshold: u32) -> Result<Phase, TransitionError> {
        if self.phase != Phase::Evaluating {
            return Err(TransitionError { msg: format!("cannot settle from {:?}", self.phase) });
        }
        self.count = count;
        self.threshold = threshold;
        self.phase = if threshold > 0 && count >= threshold {
            Phase::Triggered
        } else {
            Phase::NoTrigger
        };
        Ok(self.phase)
    }
}

/// Audit reason. Reaching the threshold exactly reads differently from going
/// past it.
pub fn reason(kind: DetectorKind, count: u32, threshold: u32) -> String {
    if count > threshold {
        format!("{}: exceeded maximum of {} ({})", kind.label(), threshold, count)
    } else {
        format!("{}: reached threshold {}", kind.label(), threshold)
    }
}

/// Record sent to the guild's moderation log channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub detector: DetectorKind,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub author_id: UserId,
    pub author_tag: String,
    pub content: String,
    pub content_sha256: String,
    /// RFC3339.
    pub timestamp: String,
    pub count: u32,
    pub threshold: u32,
    pub reason: String,
}

impl AuditRecord {
    pub fn build(kind: DetectorKind, event: &MessageEvent, count: u32, threshold: u32) -> Self {
        let content = event.content().unwrap_or_default().to_string();
        let timestamp = Utc
            .timestamp_millis_opt(event.ts as i64)
            .single()
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default();
        Self {
            detector: kind,
            guild_id: event.guild_id,
            channel_id: event.channel_id,
            channel_name: event.channel_name.clone(),
            author_id: event.author.id,
            author_tag: event.author.tag.clone(),
            content_sha256: content_digest(&content),
            content,
            timestamp,
            count,
            threshold,
            reason: reason(kind, count, threshold),
        }
    }

    /// Footer line: `#channel | reason`.
    pub fn footer(&self) -> String {
        format!("#{} | {}", self.channel_name, self.reason)
    }
}

pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Outcome of one delete/alert/log attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum EffectStatus {
    Done,
    Disabled,
    /// No log channel configured.
    NoTarget,
    Failed(String),
    TimedOut,
}

impl EffectStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, EffectStatus::Failed(_) | EffectStatus::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SoftStatus {
    NotConfigured,
    Applied { action: PunishmentAction },
    Failed { action: PunishmentAction, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HardStatus {
    NotConfigured,
    /// Counted toward the hard threshold without firing.
    Accumulated { key: String, count: u32, threshold: u32 },
    Applied { key: String, action: PunishmentAction, duration_secs: Option<u64> },
    /// The action failed; the counter stays so the next trigger retries.
    Failed { key: String, action: PunishmentAction, count: u32, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub count: u32,
    pub threshold: u32,
    pub reason: String,
    pub delete: EffectStatus,
    pub alert: EffectStatus,
    pub log: EffectStatus,
    pub soft: SoftStatus,
    pub hard: HardStatus,
}

impl TriggerReport {
    /// A moderation action that should have happened did not.
    pub fn punishment_failed(&self) -> bool {
        matches!(self.soft, SoftStatus::Failed { .. }) || matches!(self.hard, HardStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotUserMessage,
    NotConfigured,
    SettingsUnavailable,
    ConfigInvalid,
    NothingToCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Bypassed { reason: Bypass },
    Skipped { reason: SkipReason },
    NoTrigger { count: u32, threshold: u32 },
    Triggered(TriggerReport),
}

impl Outcome {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Outcome::Triggered(_))
    }

    pub fn trigger(&self) -> Option<&TriggerReport> {
        match self {
            Outcome::Triggered(r) => Some(r),
            _ => None,
        }
    }
}

/// One detector's verdict on one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub detector: DetectorKind,
    pub message_id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}
