use serde::{Deserialize, Serialize};

pub type GuildId = u64;
pub type ChannelId = u64;
pub type UserId = u64;
pub type RoleId = u64;
pub type MessageId = u64;

/// Author of an inbound message as seen by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    /// Display tag, e.g. `name#0001`.
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub bot: bool,
}

/// One inbound guild message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub channel_name: String,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    /// Embed descriptions, used when the message text is empty.
    #[serde(default)]
    pub embeds: Vec<String>,
    #[serde(default)]
    pub webhook: bool,
    /// Epoch milliseconds.
    pub ts: u64,
}

impl MessageEvent {
    /// Only messages typed by a human member go through the detectors.
    pub fn is_user_message(&self) -> bool {
        !self.author.bot && !self.webhook
    }

    /// Text the detectors look at: the message body, or the first non-empty
    /// embed description when the body is empty.
    pub fn content(&self) -> Option<&str> {
        if !self.content.trim().is_empty() {
            return Some(self.content.as_str());
        }
        self.embeds
            .iter()
            .map(String::as_str)
            .find(|d| !d.trim().is_empty())
    }
}

#[cfg(test)]
pub(crate) fn sample(channel_id: ChannelId, author_id: UserId, content: &str, ts: u64) -> MessageEvent {
    MessageEvent {
        id: ts,
        guild_id: 1,
        channel_id,
        channel_name: "general".to_string(),
        author: Author {
            id: author_id,
            tag: format!("user{}#0001", author_id),
            roles: Vec::new(),
            bot: false,
        },
        content: content.to_string(),
        embeds: Vec::new(),
        webhook: false,
        ts,
    }
}
