use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::detector::DetectorKind;
use crate::error::{Result, SelfmodError};
use crate::event::{ChannelId, RoleId};
use crate::punishment::{HardPunishment, PunishmentAction, SideEffects};

/// Engine-wide knobs, read once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each delete/alert/log call.
    pub side_effect_timeout_ms: u64,
    /// Bound on each soft/hard punishment call.
    pub punishment_timeout_ms: u64,
    /// Lifetime of the transient alert message.
    pub alert_ttl_secs: u64,
    /// Windows untouched for this long are reclaimed by the sweep.
    pub scope_idle_secs: u64,
    pub sweep_every_secs: u64,
    /// Empty disables Adder persistence.
    pub sqlite_path: String,
    pub settings_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            side_effect_timeout_ms: 5_000,
            punishment_timeout_ms: 10_000,
            alert_ttl_secs: 10,
            scope_idle_secs: 3_600,
            sweep_every_secs: 60,
            sqlite_path: String::new(),
            settings_path: "./selfmod.json".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            side_effect_timeout_ms: std::env::var("SIDE_EFFECT_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.side_effect_timeout_ms),
            punishment_timeout_ms: std::env::var("PUNISHMENT_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.punishment_timeout_ms),
            alert_ttl_secs: std::env::var("ALERT_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.alert_ttl_secs),
            scope_idle_secs: std::env::var("SCOPE_IDLE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.scope_idle_secs),
            sweep_every_secs: std::env::var("SWEEP_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.sweep_every_secs),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            settings_path: std::env::var("SETTINGS_PATH").unwrap_or(d.settings_path),
        }
    }

    pub fn scope_idle_ms(&self) -> u64 {
        self.scope_idle_secs.saturating_mul(1000)
    }
}

/// Per-guild, per-detector settings. Owned by the settings collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Count that triggers. 0 disables the detector.
    pub threshold: u32,
    /// Duplicate-message window length per channel.
    pub window_capacity: usize,
    pub ignored_channels: BTreeSet<ChannelId>,
    pub ignored_roles: BTreeSet<RoleId>,
    pub soft_punishment: Option<PunishmentAction>,
    pub hard_punishment: Option<HardPunishment>,
    pub side_effects: SideEffects,
    /// Capitals: messages with fewer letters are not measured.
    pub min_length: usize,
    /// Links: allowed hosts. Invites: ignored invite codes.
    pub allowed: BTreeSet<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0,
            window_capacity: 50,
            ignored_channels: BTreeSet::new(),
            ignored_roles: BTreeSet::new(),
            soft_punishment: None,
            hard_punishment: None,
            side_effects: SideEffects::default(),
            min_length: 15,
            allowed: BTreeSet::new(),
        }
    }
}

impl GuardConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && self.threshold > 0
    }

    /// Soft punishment, with `none` folded into absence.
    pub fn soft(&self) -> Option<PunishmentAction> {
        self.soft_punishment.filter(|a| !a.is_none())
    }

    /// Hard punishment, only when it can ever fire.
    pub fn hard(&self) -> Option<&HardPunishment> {
        self.hard_punishment
            .as_ref()
            .filter(|h| !h.action.is_none() && h.threshold > 0 && h.window_secs > 0)
    }

    /// Rejects values the detector cannot run with.
    pub fn validate(&self, kind: DetectorKind) -> Result<()> {
        if kind.uses_window() && self.window_capacity == 0 {
            return Err(SelfmodError::ConfigInvalid {
                kind,
                reason: "window_capacity must be at least 1",
            });
        }
        if kind == DetectorKind::Capitals && self.threshold > 100 {
            return Err(SelfmodError::ConfigInvalid {
                kind,
                reason: "capitals threshold is a percentage",
            });
        }
        if let Some(hard) = &self.hard_punishment {
            if !hard.action.is_none() && (hard.threshold == 0 || hard.window_secs == 0) {
                return Err(SelfmodError::ConfigInvalid {
                    kind,
                    reason: "hard punishment needs a threshold and a window",
                });
            }
            if hard.duration_secs == Some(0) {
                return Err(SelfmodError::ConfigInvalid {
                    kind,
                    reason: "hard punishment duration must be positive",
                });
            }
        }
        Ok(())
    }
}
