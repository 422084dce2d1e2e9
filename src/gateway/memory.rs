use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GuardConfig;
use crate::detector::DetectorKind;
use crate::event::{ChannelId, GuildId, UserId};

use super::{Permissions, Settings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub log_channel: Option<ChannelId>,
    pub selfmod: BTreeMap<DetectorKind, GuardConfig>,
}

/// Settings held in memory, optionally loaded from a JSON document keyed by
/// guild ID.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    guilds: HashMap<GuildId, GuildSettings>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> crate::error::Result<Self> {
        let guilds: HashMap<GuildId, GuildSettings> = serde_json::from_str(text)?;
        Ok(Self { guilds })
    }

    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_guard(mut self, guild: GuildId, kind: DetectorKind, cfg: GuardConfig) -> Self {
        self.guilds.entry(guild).or_default().selfmod.insert(kind, cfg);
        self
    }

    pub fn with_log_channel(mut self, guild: GuildId, channel: ChannelId) -> Self {
        self.guilds.entry(guild).or_default().log_channel = Some(channel);
        self
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }
}

#[async_trait]
impl Settings for MemorySettings {
    async fn guard_config(&self, guild: GuildId, kind: DetectorKind) -> Result<Option<GuardConfig>> {
        Ok(self.guilds.get(&guild).and_then(|g| g.selfmod.get(&kind)).cloned())
    }

    async fn log_channel(&self, guild: GuildId) -> Result<Option<ChannelId>> {
        Ok(self.guilds.get(&guild).and_then(|g| g.log_channel))
    }
}

/// Fixed set of exempt users, e.g. moderators known at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    exempt: BTreeSet<UserId>,
}

impl StaticPermissions {
    pub fn new(exempt: impl IntoIterator<Item = UserId>) -> Self {
        Self { exempt: exempt.into_iter().collect() }
    }
}

#[async_trait]
impl Permissions for StaticPermissions {
    async fn is_exempt(&self, user: UserId, _scope: ChannelId) -> Result<bool> {
        Ok(self.exempt.contains(&user))
    }
}
