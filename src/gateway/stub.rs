use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::escalation::AuditRecord;
use crate::event::{ChannelId, MessageId, UserId};
use crate::logging::{json_log, obj, v_str};
use crate::punishment::PunishmentAction;

use super::{Delivery, Punisher};

// Dry-run collaborators: every call becomes a log line and succeeds.

pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        json_log(
            "delivery",
            obj(&[("op", v_str("delete")), ("channel_id", json!(channel)), ("message_id", json!(message))]),
        );
        Ok(())
    }

    async fn send_transient(&self, scope: ChannelId, text: &str, ttl: Duration) -> Result<()> {
        json_log(
            "delivery",
            obj(&[
                ("op", v_str("send_transient")),
                ("channel_id", json!(scope)),
                ("text", v_str(text)),
                ("ttl_secs", json!(ttl.as_secs())),
            ]),
        );
        Ok(())
    }

    async fn send_log(&self, log_channel: ChannelId, record: &AuditRecord) -> Result<()> {
        json_log(
            "delivery",
            obj(&[
                ("op", v_str("send_log")),
                ("channel_id", json!(log_channel)),
                ("record", serde_json::to_value(record)?),
            ]),
        );
        Ok(())
    }
}

pub struct LogPunisher;

#[async_trait]
impl Punisher for LogPunisher {
    async fn apply_soft(&self, user: UserId, scope: ChannelId, action: PunishmentAction) -> Result<()> {
        json_log(
            "punisher",
            obj(&[
                ("op", v_str("apply_soft")),
                ("user_id", json!(user)),
                ("channel_id", json!(scope)),
                ("action", v_str(action.as_str())),
            ]),
        );
        Ok(())
    }

    async fn apply_hard(
        &self,
        user: UserId,
        scope: ChannelId,
        action: PunishmentAction,
        duration_secs: Option<u64>,
    ) -> Result<()> {
        json_log(
            "punisher",
            obj(&[
                ("op", v_str("apply_hard")),
                ("user_id", json!(user)),
                ("channel_id", json!(scope)),
                ("action", v_str(action.as_str())),
                ("duration_secs", json!(duration_secs)),
            ]),
        );
        Ok(())
    }
}
