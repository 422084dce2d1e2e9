use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::escalation::AuditRecord;
use crate::event::{ChannelId, MessageId, UserId};
use crate::fault::inject::{should_fault, FaultProfile};
use crate::punishment::PunishmentAction;

use super::{Delivery, Punisher};

/// A delivery or punishment call as the engine issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Delete { channel: ChannelId, message: MessageId },
    Alert { scope: ChannelId, text: String, ttl: Duration },
    Log { channel: ChannelId, record: AuditRecord },
    Soft { user: UserId, scope: ChannelId, action: PunishmentAction },
    Hard { user: UserId, scope: ChannelId, action: PunishmentAction, duration_secs: Option<u64> },
}

/// Delivery and punisher that keeps every call, with injectable faults.
/// Failed calls are recorded too.
#[derive(Debug, Default)]
pub struct Recording {
    faults: FaultProfile,
    seq: AtomicU64,
    calls: Mutex<Vec<Call>>,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultProfile) -> Self {
        Self { faults, ..Self::default() }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| pred(c))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, call: Call, rate: f64, what: &str) -> Result<()> {
        let seed = self.seq.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        if should_fault(seed, rate) {
            return Err(anyhow!("injected {} fault", what));
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for Recording {
    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        self.record(Call::Delete { channel, message }, self.faults.delete_rate, "delete")
    }

    async fn send_transient(&self, scope: ChannelId, text: &str, ttl: Duration) -> Result<()> {
        if self.faults.alert_stall_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.faults.alert_stall_ms)).await;
        }
        let call = Call::Alert { scope, text: text.to_string(), ttl };
        self.record(call, self.faults.alert_rate, "alert")
    }

    async fn send_log(&self, log_channel: ChannelId, record: &AuditRecord) -> Result<()> {
        let call = Call::Log { channel: log_channel, record: record.clone() };
        self.record(call, self.faults.log_rate, "log")
    }
}

#[async_trait]
impl Punisher for Recording {
    async fn apply_soft(&self, user: UserId, scope: ChannelId, action: PunishmentAction) -> Result<()> {
        self.record(Call::Soft { user, scope, action }, self.faults.soft_rate, "soft punishment")
    }

    async fn apply_hard(
        &self,
        user: UserId,
        scope: ChannelId,
        action: PunishmentAction,
        duration_secs: Option<u64>,
    ) -> Result<()> {
        let call = Call::Hard { user, scope, action, duration_secs };
        self.record(call, self.faults.hard_rate, "hard punishment")
    }
}
