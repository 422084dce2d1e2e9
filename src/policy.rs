use serde::Serialize;

use crate::config::GuardConfig;
use crate::event::MessageEvent;
use crate::gateway::Permissions;
use crate::logging;

/// Why an event was let through without inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bypass {
    Disabled,
    IgnoredChannel,
    IgnoredRole,
    Exempt,
}

impl Bypass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bypass::Disabled => "disabled",
            Bypass::IgnoredChannel => "ignored_channel",
            Bypass::IgnoredRole => "ignored_role",
            Bypass::Exempt => "exempt",
        }
    }
}

/// Config-only bypass rules, in order. The permission lookup is left to
/// [`should_process`] so it only happens when these pass.
pub fn check_static(event: &MessageEvent, cfg: &GuardConfig) -> Result<(), Bypass> {
    if !cfg.is_active() {
        return Err(Bypass::Disabled);
    }
    if cfg.ignored_channels.contains(&event.channel_id) {
        return Err(Bypass::IgnoredChannel);
    }
    if event.author.roles.iter().any(|r| cfg.ignored_roles.contains(r)) {
        return Err(Bypass::IgnoredRole);
    }
    Ok(())
}

/// Full bypass evaluation. `Ok(())` means the detector runs.
///
/// A failed permission lookup counts as not exempt.
pub async fn should_process(
    event: &MessageEvent,
    cfg: &GuardConfig,
    permissions: &(dyn Permissions + Send + Sync),
) -> Result<(), Bypass> {
    check_static(event, cfg)?;
    match permissions.is_exempt(event.author.id, event.channel_id).await {
        Ok(true) => Err(Bypass::Exempt),
        Ok(false) => Ok(()),
        Err(err) => {
            logging::log_collaborator_error("permissions", event.id, &err.to_string());
            Ok(())
        }
    }
}
