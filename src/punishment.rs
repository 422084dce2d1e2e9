use serde::{Deserialize, Serialize};

/// Moderation action applied to the author of a triggering message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PunishmentAction {
    None,
    Alert,
    DeleteAndAlert,
    /// Mute/timeout for a duration.
    TimedRestrict,
    /// Temporary ban.
    TimedRemove,
    PermanentRemove,
}

impl PunishmentAction {
    /// alert < timed-restrict < timed-remove < permanent-remove
    pub fn severity(&self) -> u8 {
        match self {
            PunishmentAction::None => 0,
            PunishmentAction::Alert | PunishmentAction::DeleteAndAlert => 1,
            PunishmentAction::TimedRestrict => 2,
            PunishmentAction::TimedRemove => 3,
            PunishmentAction::PermanentRemove => 4,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PunishmentAction::None)
    }

    /// Whether the action takes a duration when applied as a hard punishment.
    pub fn is_timed(&self) -> bool {
        matches!(self, PunishmentAction::TimedRestrict | PunishmentAction::TimedRemove)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentAction::None => "none",
            PunishmentAction::Alert => "alert",
            PunishmentAction::DeleteAndAlert => "delete-and-alert",
            PunishmentAction::TimedRestrict => "timed-restrict",
            PunishmentAction::TimedRemove => "timed-remove",
            PunishmentAction::PermanentRemove => "permanent-remove",
        }
    }
}

impl std::fmt::Display for PunishmentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard punishment descriptor, gated by the repeat-offense accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardPunishment {
    pub action: PunishmentAction,
    /// `None` means permanent.
    #[serde(default)]
    pub duration_secs: Option<u64>,
    /// Empty selects the detector's default key.
    #[serde(default)]
    pub adder_key: String,
    /// Offenses inside the window that fire the action.
    pub threshold: u32,
    /// Rolling window of the accumulator.
    pub window_secs: u64,
}

impl HardPunishment {
    pub fn window_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }
}

/// Which trigger side effects run. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideEffects {
    pub delete: bool,
    pub alert: bool,
    pub log: bool,
}

impl Default for SideEffects {
    fn default() -> Self {
        Self { delete: true, alert: true, log: true }
    }
}
