//! Collaborator seams. The engine owns none of these: the host bot wires in
//! its gateway, settings store and moderation actions behind these traits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::GuardConfig;
use crate::detector::DetectorKind;
use crate::escalation::AuditRecord;
use crate::event::{ChannelId, GuildId, MessageId, UserId};
use crate::punishment::PunishmentAction;

mod memory;
mod recording;
mod stub;

pub use memory::{GuildSettings, MemorySettings, StaticPermissions};
pub use recording::{Call, Recording};
pub use stub::{LogDelivery, LogPunisher};

/// Read-only access to guild settings.
#[async_trait]
pub trait Settings {
    async fn guard_config(&self, guild: GuildId, kind: DetectorKind) -> Result<Option<GuardConfig>>;
    async fn log_channel(&self, guild: GuildId) -> Result<Option<ChannelId>>;
}

#[async_trait]
pub trait Permissions {
    /// Whether the user is privileged at or above the exempt level in scope.
    async fn is_exempt(&self, user: UserId, scope: ChannelId) -> Result<bool>;
}

#[async_trait]
pub trait Delivery {
    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<()>;
    /// Notice that disappears after `ttl`.
    async fn send_transient(&self, scope: ChannelId, text: &str, ttl: Duration) -> Result<()>;
    async fn send_log(&self, log_channel: ChannelId, record: &AuditRecord) -> Result<()>;
}

#[async_trait]
pub trait Punisher {
    async fn apply_soft(&self, user: UserId, scope: ChannelId, action: PunishmentAction) -> Result<()>;
    /// `duration_secs = None` is permanent.
    async fn apply_hard(
        &self,
        user: UserId,
        scope: ChannelId,
        action: PunishmentAction,
        duration_secs: Option<u64>,
    ) -> Result<()>;
}

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn Settings + Send + Sync>,
    pub permissions: Arc<dyn Permissions + Send + Sync>,
    pub delivery: Arc<dyn Delivery + Send + Sync>,
    pub punisher: Arc<dyn Punisher + Send + Sync>,
}
