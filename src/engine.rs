//! Event pipeline.
//!
//! ```text
//! event ──► guard policy ──► detector ──► evaluation ──► escalation
//!              │ bypass        │ window     │ no trigger    │ delete/alert/log (concurrent, bounded)
//!              ▼               ▼ store      ▼               │ soft punishment
//!            report          count        report            │ adder ──► hard punishment
//! ```
//!
//! Events for one scope pass through a per-scope gate, taken in arrival order
//! and held until every detector has observed the event, so window counts
//! follow arrival order. The gate is released before side effects and
//! punishments run. Every collaborator call is bounded by a timeout, and
//! every failure ends up in the report and the log, never in the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join3;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::adder::{Adder, Tick};
use crate::config::{EngineConfig, GuardConfig};
use crate::detector::{DetectorKind, Fingerprint};
use crate::error::{SelfmodError, SideEffect};
use crate::escalation::{
    AuditRecord, EffectStatus, Evaluation, HardStatus, Outcome, Phase, Report, SkipReason, SoftStatus,
    TransitionError, TriggerReport,
};
use crate::event::{ChannelId, GuildId, MessageEvent};
use crate::gateway::Collaborators;
use crate::logging::{self, Domain, Level, ProfileScope};
use crate::policy;
use crate::storage::AdderStore;
use crate::window::WindowStore;

pub struct Engine {
    cfg: EngineConfig,
    detectors: Vec<DetectorKind>,
    windows: WindowStore,
    adder: Adder,
    collab: Collaborators,
    /// Highest event timestamp seen, epoch ms.
    clock: AtomicU64,
    gates: Mutex<HashMap<ChannelId, Arc<AsyncMutex<()>>>>,
}

/// Result of the ordered part of a detector run.
enum Verdict {
    Done(Outcome),
    Trigger { cfg: GuardConfig, count: u32 },
}

impl Engine {
    /// Engine running every detector kind.
    pub fn new(cfg: EngineConfig, collab: Collaborators) -> Self {
        Self {
            cfg,
            detectors: DetectorKind::ALL.to_vec(),
            windows: WindowStore::new(),
            adder: Adder::new(),
            collab,
            clock: AtomicU64::new(0),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_detectors(mut self, detectors: &[DetectorKind]) -> Self {
        self.detectors = detectors.to_vec();
        self
    }

    pub fn windows(&self) -> &WindowStore {
        &self.windows
    }

    pub fn adder(&self) -> &Adder {
        &self.adder
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn advance_clock(&self, ts: u64) -> u64 {
        self.clock.fetch_max(ts, Ordering::SeqCst).max(ts)
    }

    fn gate(&self, scope: ChannelId) -> Arc<AsyncMutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.entry(scope).or_default().clone()
    }

    fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.side_effect_timeout_ms)
    }

    /// Runs every detector over one event. Never fails; one report per
    /// detector.
    pub async fn handle(&self, event: &MessageEvent) -> Vec<Report> {
        let _profile = ProfileScope::with_context("handle", &[("message_id", json!(event.id))]);
        if !event.is_user_message() {
            return self
                .detectors
                .iter()
                .map(|&kind| Report {
                    detector: kind,
                    message_id: event.id,
                    outcome: Outcome::Skipped { reason: SkipReason::NotUserMessage },
                })
                .collect();
        }

        let (now, verdicts) = {
            let gate = self.gate(event.channel_id);
            let _turn = gate.lock().await;
            let now = self.advance_clock(event.ts);
            let mut verdicts = Vec::with_capacity(self.detectors.len());
            for &kind in &self.detectors {
                verdicts.push((kind, self.evaluate(kind, event, now).await));
            }
            (now, verdicts)
        };

        let mut reports = Vec::with_capacity(verdicts.len());
        for (kind, verdict) in verdicts {
            let outcome = match verdict {
                Verdict::Done(outcome) => outcome,
                Verdict::Trigger { cfg, count } => {
                    Outcome::Triggered(self.escalate(kind, event, &cfg, count, now).await)
                }
            };
            reports.push(Report { detector: kind, message_id: event.id, outcome });
        }
        reports
    }

    /// Everything up to and including the window observation.
    async fn evaluate(&self, kind: DetectorKind, event: &MessageEvent, now: u64) -> Verdict {
        let lookup = self.collab.settings.guard_config(event.guild_id, kind);
        let cfg = match timeout(self.lookup_timeout(), lookup).await {
            Ok(Ok(Some(cfg))) => cfg,
            Ok(Ok(None)) => return Verdict::Done(Outcome::Skipped { reason: SkipReason::NotConfigured }),
            Ok(Err(err)) => {
                logging::log_collaborator_error("settings", event.id, &err.to_string());
                return Verdict::Done(Outcome::Skipped { reason: SkipReason::SettingsUnavailable });
            }
            Err(_) => {
                let err = SelfmodError::Timeout { operation: "settings", ms: self.cfg.side_effect_timeout_ms };
                logging::log_collaborator_error("settings", event.id, &err.to_string());
                return Verdict::Done(Outcome::Skipped { reason: SkipReason::SettingsUnavailable });
            }
        };

        let permissions = self.collab.permissions.as_ref();
        let policy = timeout(self.lookup_timeout(), policy::should_process(event, &cfg, permissions)).await;
        // A stalled permission lookup counts as not exempt, like a failed one.
        let policy = policy.unwrap_or_else(|_| {
            let err = SelfmodError::Timeout { operation: "permissions", ms: self.cfg.side_effect_timeout_ms };
            logging::log_collaborator_error("permissions", event.id, &err.to_string());
            Ok(())
        });
        if let Err(reason) = policy {
            logging::log_bypass(kind.as_str(), event.guild_id, event.channel_id, event.author.id, reason.as_str());
            return Verdict::Done(Outcome::Bypassed { reason });
        }
        if let Err(err) = cfg.validate(kind) {
            logging::log_config_invalid(event.guild_id, &err);
            return Verdict::Done(Outcome::Skipped { reason: SkipReason::ConfigInvalid });
        }

        let count = match kind.extract(event, &cfg) {
            None => return Verdict::Done(Outcome::Skipped { reason: SkipReason::NothingToCount }),
            Some(Fingerprint::Text(fp)) => self.windows.observe_at(event.channel_id, &fp, cfg.window_capacity, now),
            Some(Fingerprint::Count(n)) => n,
        };
        logging::log_count(kind.as_str(), event.channel_id, event.author.id, count, cfg.threshold);

        let mut eval = Evaluation::new();
        let phase = eval.begin().and_then(|_| eval.settle(count, cfg.threshold));
        if is_triggered(kind, event.id, phase) {
            Verdict::Trigger { cfg, count }
        } else {
            Verdict::Done(Outcome::NoTrigger { count, threshold: cfg.threshold })
        }
    }

    async fn escalate(
        &self,
        kind: DetectorKind,
        event: &MessageEvent,
        cfg: &GuardConfig,
        count: u32,
        now: u64,
    ) -> TriggerReport {
        let record = AuditRecord::build(kind, event, count, cfg.threshold);
        logging::log_trigger(
            kind.as_str(),
            event.guild_id,
            event.channel_id,
            event.author.id,
            event.id,
            &record.reason,
        );

        let effects = cfg.side_effects;
        let delivery = &self.collab.delivery;
        let alert_text = kind.alert_text(&format!("<@{}>", event.author.id));
        let ttl = Duration::from_secs(self.cfg.alert_ttl_secs);

        let delete = self.side_effect(
            SideEffect::Delete,
            effects.delete,
            kind,
            event.id,
            done(delivery.delete(event.channel_id, event.id)),
        );
        let alert = self.side_effect(
            SideEffect::Alert,
            effects.alert,
            kind,
            event.id,
            done(delivery.send_transient(event.channel_id, &alert_text, ttl)),
        );
        // The log channel lookup shares the log timeout.
        let log = self.side_effect(
            SideEffect::Log,
            effects.log,
            kind,
            event.id,
            self.deliver_log(event.guild_id, &record),
        );
        let (delete, alert, log) = join3(delete, alert, log).await;

        let soft = self.apply_soft(cfg, event).await;
        let hard = self.apply_hard(kind, cfg, event, now).await;

        TriggerReport {
            count,
            threshold: cfg.threshold,
            reason: record.reason.clone(),
            delete,
            alert,
            log,
            soft,
            hard,
        }
    }

    async fn side_effect<F>(
        &self,
        effect: SideEffect,
        enabled: bool,
        kind: DetectorKind,
        message_id: u64,
        call: F,
    ) -> EffectStatus
    where
        F: Future<Output = anyhow::Result<EffectStatus>>,
    {
        if !enabled {
            return EffectStatus::Disabled;
        }
        let ms = self.cfg.side_effect_timeout_ms;
        let (status, err) = match timeout(Duration::from_millis(ms), call).await {
            Ok(Ok(status)) => return status,
            Ok(Err(err)) => {
                let err = SelfmodError::SideEffect { effect, message: err.to_string() };
                (EffectStatus::Failed(err.to_string()), err)
            }
            Err(_) => (
                EffectStatus::TimedOut,
                SelfmodError::Timeout { operation: effect.as_str(), ms },
            ),
        };
        logging::log_side_effect_failure(effect.as_str(), kind.as_str(), message_id, &err.to_string());
        status
    }

    async fn deliver_log(&self, guild: GuildId, record: &AuditRecord) -> anyhow::Result<EffectStatus> {
        let Some(channel) = self.collab.settings.log_channel(guild).await? else {
            return Ok(EffectStatus::NoTarget);
        };
        self.collab.delivery.send_log(channel, record).await?;
        Ok(EffectStatus::Done)
    }

    async fn punish<F>(&self, call: F) -> Result<(), String>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let ms = self.cfg.punishment_timeout_ms;
        match timeout(Duration::from_millis(ms), call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(SelfmodError::Timeout { operation: "punishment", ms }.to_string()),
        }
    }

    async fn apply_soft(&self, cfg: &GuardConfig, event: &MessageEvent) -> SoftStatus {
        let Some(action) = cfg.soft() else {
            return SoftStatus::NotConfigured;
        };
        let user = event.author.id;
        let call = self.collab.punisher.apply_soft(user, event.channel_id, action);
        match self.punish(call).await {
            Ok(()) => {
                logging::log_punishment("soft", action.as_str(), user, event.channel_id, None);
                SoftStatus::Applied { action }
            }
            Err(message) => {
                let err = SelfmodError::Punishment { subject: user, action, message };
                logging::log_punishment("soft", action.as_str(), user, event.channel_id, Some(&err.to_string()));
                SoftStatus::Failed { action, error: err.to_string() }
            }
        }
    }

    async fn apply_hard(&self, kind: DetectorKind, cfg: &GuardConfig, event: &MessageEvent, now: u64) -> HardStatus {
        let Some(hard) = cfg.hard() else {
            return HardStatus::NotConfigured;
        };
        let key = if hard.adder_key.is_empty() {
            kind.default_adder_key().to_string()
        } else {
            hard.adder_key.clone()
        };
        let user = event.author.id;

        let tick = self.adder.increment(user, &key, now, hard.window_ms(), hard.threshold);
        logging::log_adder(user, &key, tick.count(), hard.threshold, matches!(tick, Tick::Overflow(_)));
        let Tick::Overflow(count) = tick else {
            return HardStatus::Accumulated { key, count: tick.count(), threshold: hard.threshold };
        };

        // Timed actions without a duration are permanent.
        let duration_secs = if hard.action.is_timed() { hard.duration_secs } else { None };
        let call = self.collab.punisher.apply_hard(user, event.channel_id, hard.action, duration_secs);
        match self.punish(call).await {
            Ok(()) => {
                self.adder.settle(user, &key, true);
                logging::log_punishment("hard", hard.action.as_str(), user, event.channel_id, None);
                HardStatus::Applied { key, action: hard.action, duration_secs }
            }
            Err(message) => {
                self.adder.settle(user, &key, false);
                let err = SelfmodError::Punishment { subject: user, action: hard.action, message };
                logging::log_punishment("hard", hard.action.as_str(), user, event.channel_id, Some(&err.to_string()));
                HardStatus::Failed { key, action: hard.action, count, error: err.to_string() }
            }
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Reclaims idle windows and expired adder counters as of `now_ms`.
    pub fn sweep_at(&self, now_ms: u64) -> (usize, usize) {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, gate| Arc::strong_count(gate) > 1);
        let windows = self.windows.sweep(now_ms, self.cfg.scope_idle_ms());
        let adder = self.adder.sweep(now_ms);
        logging::log_sweep(windows, adder, self.windows.scope_count(), self.adder.len());
        (windows, adder)
    }

    /// Sweep against the engine clock.
    pub fn sweep(&self) -> (usize, usize) {
        self.sweep_at(self.now_ms())
    }

    /// The scope was deleted on the platform side.
    pub fn forget_scope(&self, scope: u64) -> bool {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner).remove(&scope);
        self.windows.forget_scope(scope)
    }

    /// Loads persisted adder counters. Failures are logged and ignored.
    pub fn restore_adder(&self, store: &AdderStore, now_ms: u64) -> usize {
        match store.load() {
            Ok(entries) => self.adder.restore(entries, now_ms),
            Err(err) => {
                logging::log_collaborator_error("adder_store", 0, &err.to_string());
                0
            }
        }
    }

    /// Writes the adder snapshot. Failures are logged and ignored.
    pub fn persist_adder(&self, store: &mut AdderStore) -> bool {
        match store.persist_snapshot(&self.adder.snapshot()) {
            Ok(()) => true,
            Err(err) => {
                logging::log_collaborator_error("adder_store", 0, &err.to_string());
                false
            }
        }
    }

    /// Periodic sweep, aggregate stats flush and adder persistence.
    pub fn spawn_maintenance(self: &Arc<Self>, store: Option<Arc<AsyncMutex<AdderStore>>>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let every = Duration::from_secs(engine.cfg.sweep_every_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                engine.sweep();
                logging::tick_aggregator();
                if let Some(store) = &store {
                    let mut store = store.lock().await;
                    engine.persist_adder(&mut store);
                }
            }
        })
    }
}

async fn done<F>(call: F) -> anyhow::Result<EffectStatus>
where
    F: Future<Output = anyhow::Result<()>>,
{
    call.await.map(|()| EffectStatus::Done)
}

/// Only a settled `Triggered` phase escalates. A broken transition is logged
/// and treated as no trigger.
fn is_triggered(kind: DetectorKind, message_id: u64, phase: Result<Phase, TransitionError>) -> bool {
    match phase {
        Ok(phase) => phase == Phase::Triggered,
        Err(err) => {
            logging::log(
                Level::Error,
                Domain::Escalate,
                "transition_error",
                logging::obj(&[
                    ("detector", logging::v_str(kind.as_str())),
                    ("message_id", json!(message_id)),
                    ("error", logging::v_str(&err.msg)),
                ]),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sample;
    use crate::fault::inject::FaultProfile;
    use async_trait::async_trait;

    use crate::gateway::{Call, MemorySettings, Recording, Settings, StaticPermissions};
    use crate::punishment::{HardPunishment, PunishmentAction};

    const GUILD: u64 = 1;
    const LOG_CHANNEL: u64 = 99;

    fn duplicates(threshold: u32, capacity: usize) -> GuardConfig {
        GuardConfig {
            enabled: true,
            threshold,
            window_capacity: capacity,
            soft_punishment: Some(PunishmentAction::Alert),
            ..Default::default()
        }
    }

    fn engine_with(cfg: GuardConfig, rec: Arc<Recording>, exempt: &[u64]) -> Engine {
        let settings = MemorySettings::new()
            .with_guard(GUILD, DetectorKind::Duplicates, cfg)
            .with_log_channel(GUILD, LOG_CHANNEL);
        let collab = Collaborators {
            settings: Arc::new(settings),
            permissions: Arc::new(StaticPermissions::new(exempt.iter().copied())),
            delivery: rec.clone(),
            punisher: rec,
        };
        Engine::new(EngineConfig::default(), collab).with_detectors(&[DetectorKind::Duplicates])
    }

    /// Guard configs answer at once; the log channel lookup never does.
    struct StalledLogChannel(MemorySettings);

    #[async_trait]
    impl Settings for StalledLogChannel {
        async fn guard_config(&self, guild: GuildId, kind: DetectorKind) -> anyhow::Result<Option<GuardConfig>> {
            self.0.guard_config(guild, kind).await
        }

        async fn log_channel(&self, _guild: GuildId) -> anyhow::Result<Option<ChannelId>> {
            std::future::pending().await
        }
    }

    fn hard_after(threshold: u32) -> HardPunishment {
        HardPunishment {
            action: PunishmentAction::TimedRestrict,
            duration_secs: Some(60),
            adder_key: String::new(),
            threshold,
            window_secs: 600,
        }
    }

    async fn send(engine: &Engine, channel: u64, user: u64, text: &str, ts: u64) -> Outcome {
        let mut reports = engine.handle(&sample(channel, user, text, ts)).await;
        assert_eq!(reports.len(), 1);
        reports.remove(0).outcome
    }

    #[tokio::test]
    async fn triggers_on_threshold() {
        let rec = Arc::new(Recording::new());
        let engine = engine_with(duplicates(3, 5), rec.clone(), &[]);
        assert!(matches!(send(&engine, 10, 20, "buy now", 1).await, Outcome::NoTrigger { count: 1, .. }));
        assert!(matches!(send(&engine, 10, 20, "BUY NOW", 2).await, Outcome::NoTrigger { count: 2, .. }));
        let out = send(&engine, 10, 20, "buy now ", 3).await;
        let report = out.trigger().expect("third duplicate triggers");
        assert_eq!(report.count, 3);
        assert_eq!(report.delete, EffectStatus::Done);
        assert_eq!(report.alert, EffectStatus::Done);
        assert_eq!(report.log, EffectStatus::Done);
        assert_eq!(report.soft, SoftStatus::Applied { action: PunishmentAction::Alert });
        assert_eq!(report.hard, HardStatus::NotConfigured);
        assert_eq!(rec.count(|c| matches!(c, Call::Log { channel: LOG_CHANNEL, .. })), 1);
    }

    #[tokio::test]
    async fn delete_failure_does_not_block_alert_or_log() {
        let rec = Arc::new(Recording::with_faults(FaultProfile::failing_delete()));
        let engine = engine_with(duplicates(1, 5), rec.clone(), &[]);
        let out = send(&engine, 10, 20, "x", 1).await;
        let report = out.trigger().unwrap();
        assert!(matches!(report.delete, EffectStatus::Failed(_)));
        assert_eq!(report.alert, EffectStatus::Done);
        assert_eq!(report.log, EffectStatus::Done);
        assert!(!report.punishment_failed());
        assert_eq!(rec.count(|c| matches!(c, Call::Alert { .. })), 1);
        assert_eq!(rec.count(|c| matches!(c, Call::Log { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_alert_times_out() {
        let faults = FaultProfile { alert_stall_ms: 60_000, ..FaultProfile::disabled() };
        let rec = Arc::new(Recording::with_faults(faults));
        let engine = engine_with(duplicates(1, 5), rec.clone(), &[]);
        let out = send(&engine, 10, 20, "x", 1).await;
        let report = out.trigger().unwrap();
        assert_eq!(report.alert, EffectStatus::TimedOut);
        assert_eq!(report.delete, EffectStatus::Done);
        assert_eq!(report.log, EffectStatus::Done);
    }

    #[tokio::test]
    async fn exempt_user_is_bypassed_and_window_untouched() {
        let rec = Arc::new(Recording::new());
        let engine = engine_with(duplicates(1, 5), rec.clone(), &[20]);
        let out = send(&engine, 10, 20, "x", 1).await;
        assert_eq!(out, Outcome::Bypassed { reason: policy::Bypass::Exempt });
        assert_eq!(engine.windows().window_len(10), 0);
        assert!(rec.calls().is_empty());
    }

    #[tokio::test]
    async fn bots_are_skipped() {
        let rec = Arc::new(Recording::new());
        let engine = engine_with(duplicates(1, 5), rec.clone(), &[]);
        let mut ev = sample(10, 20, "x", 1);
        ev.author.bot = true;
        let reports = engine.handle(&ev).await;
        assert_eq!(reports[0].outcome, Outcome::Skipped { reason: SkipReason::NotUserMessage });
    }

    #[tokio::test]
    async fn zero_capacity_is_config_invalid() {
        let rec = Arc::new(Recording::new());
        let engine = engine_with(duplicates(1, 0), rec.clone(), &[]);
        let out = send(&engine, 10, 20, "x", 1).await;
        assert_eq!(out, Outcome::Skipped { reason: SkipReason::ConfigInvalid });
    }

    #[tokio::test]
    async fn disabled_side_effects_are_not_called() {
        let rec = Arc::new(Recording::new());
        let mut cfg = duplicates(1, 5);
        cfg.side_effects.delete = false;
        cfg.side_effects.log = false;
        let engine = engine_with(cfg, rec.clone(), &[]);
        let report = send(&engine, 10, 20, "x", 1).await.trigger().cloned().unwrap();
        assert_eq!(report.delete, EffectStatus::Disabled);
        assert_eq!(report.log, EffectStatus::Disabled);
        assert_eq!(report.alert, EffectStatus::Done);
        assert_eq!(rec.count(|c| matches!(c, Call::Delete { .. } | Call::Log { .. })), 0);
    }

    #[tokio::test]
    async fn failed_hard_punishment_retries_on_next_trigger() {
        let rec = Arc::new(Recording::with_faults(FaultProfile::failing_hard()));
        let mut cfg = duplicates(1, 5);
        cfg.hard_punishment = Some(hard_after(2));
        let engine = engine_with(cfg, rec.clone(), &[]);

        let first = send(&engine, 10, 20, "a", 1_000).await;
        assert!(matches!(
            first.trigger().unwrap().hard,
            HardStatus::Accumulated { count: 1, .. }
        ));
        let second = send(&engine, 10, 20, "b", 2_000).await;
        let report = second.trigger().unwrap();
        assert!(report.punishment_failed());
        assert!(matches!(&report.hard, HardStatus::Failed { key, count: 2, .. } if key == "messages"));
        assert_eq!(engine.adder().count(20, "messages", 2_000), 2);

        let third = send(&engine, 10, 20, "c", 3_000).await;
        assert!(matches!(third.trigger().unwrap().hard, HardStatus::Failed { count: 3, .. }));
        assert_eq!(rec.count(|c| matches!(c, Call::Hard { .. })), 2);
    }

    #[tokio::test]
    async fn sweep_uses_engine_clock() {
        let rec = Arc::new(Recording::new());
        let engine = engine_with(duplicates(5, 5), rec, &[]);
        send(&engine, 10, 20, "x", 1_000).await;
        send(&engine, 11, 20, "x", 1_000 + EngineConfig::default().scope_idle_ms() + 1).await;
        assert_eq!(engine.sweep(), (1, 0));
        assert_eq!(engine.windows().scope_count(), 1);
        assert!(engine.forget_scope(11));
    }

    #[tokio::test]
    async fn adder_round_trips_through_store() {
        let rec = Arc::new(Recording::new());
        let mut cfg = duplicates(1, 5);
        cfg.hard_punishment = Some(HardPunishment {
            action: PunishmentAction::PermanentRemove,
            duration_secs: None,
            adder_key: "messages".to_string(),
            threshold: 5,
            window_secs: 600,
        });
        let engine = engine_with(cfg.clone(), rec.clone(), &[]);
        send(&engine, 10, 20, "a", 1_000).await;
        send(&engine, 10, 20, "b", 2_000).await;

        let mut store = AdderStore::in_memory().unwrap();
        store.init().unwrap();
        assert!(engine.persist_adder(&mut store));

        let restarted = engine_with(cfg, rec, &[]);
        assert_eq!(restarted.restore_adder(&store, 2_500), 1);
        assert_eq!(restarted.adder().count(20, "messages", 2_500), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_log_channel_lookup_times_out() {
        let rec = Arc::new(Recording::new());
        let settings = MemorySettings::new().with_guard(GUILD, DetectorKind::Duplicates, duplicates(1, 5));
        let collab = Collaborators {
            settings: Arc::new(StalledLogChannel(settings)),
            permissions: Arc::new(StaticPermissions::default()),
            delivery: rec.clone(),
            punisher: rec.clone(),
        };
        let engine = Engine::new(EngineConfig::default(), collab).with_detectors(&[DetectorKind::Duplicates]);

        let reports = timeout(Duration::from_secs(600), engine.handle(&sample(10, 20, "x", 1)))
            .await
            .expect("handle is bounded");
        let report = reports[0].outcome.trigger().unwrap();
        assert_eq!(report.log, EffectStatus::TimedOut);
        assert_eq!(report.delete, EffectStatus::Done);
        assert_eq!(report.alert, EffectStatus::Done);
        assert_eq!(report.soft, SoftStatus::Applied { action: PunishmentAction::Alert });
        assert_eq!(rec.count(|c| matches!(c, Call::Log { .. })), 0);
    }

    #[tokio::test]
    async fn soft_failure_is_reported_and_hard_still_runs() {
        let faults = FaultProfile { soft_rate: 1.0, ..FaultProfile::disabled() };
        let rec = Arc::new(Recording::with_faults(faults));
        let mut cfg = duplicates(1, 5);
        cfg.hard_punishment = Some(hard_after(1));
        let engine = engine_with(cfg, rec.clone(), &[]);

        let out = send(&engine, 10, 20, "x", 1_000).await;
        let report = out.trigger().unwrap();
        assert!(matches!(report.soft, SoftStatus::Failed { action: PunishmentAction::Alert, .. }));
        assert!(report.punishment_failed());
        assert_eq!(report.delete, EffectStatus::Done);
        assert_eq!(report.alert, EffectStatus::Done);
        assert_eq!(report.log, EffectStatus::Done);
        assert!(matches!(report.hard, HardStatus::Applied { action: PunishmentAction::TimedRestrict, .. }));
        assert_eq!(rec.count(|c| matches!(c, Call::Hard { .. })), 1);
    }

    #[tokio::test]
    async fn log_failure_leaves_delete_and_alert() {
        let faults = FaultProfile { log_rate: 1.0, ..FaultProfile::disabled() };
        let rec = Arc::new(Recording::with_faults(faults));
        let engine = engine_with(duplicates(1, 5), rec.clone(), &[]);
        let out = send(&engine, 10, 20, "x", 1).await;
        let report = out.trigger().unwrap();
        assert!(matches!(report.log, EffectStatus::Failed(_)));
        assert_eq!(report.delete, EffectStatus::Done);
        assert_eq!(report.alert, EffectStatus::Done);
        assert!(!report.punishment_failed());
        assert_eq!(rec.count(|c| matches!(c, Call::Log { .. })), 1);
    }

    #[tokio::test]
    async fn alert_failure_is_not_a_punishment_failure() {
        let faults = FaultProfile { alert_rate: 1.0, ..FaultProfile::disabled() };
        let rec = Arc::new(Recording::with_faults(faults));
        let engine = engine_with(duplicates(1, 5), rec, &[]);
        let out = send(&engine, 10, 20, "x", 1).await;
        let report = out.trigger().unwrap();
        assert!(report.alert.is_failure());
        assert_eq!(report.soft, SoftStatus::Applied { action: PunishmentAction::Alert });
    }

    #[test]
    fn broken_transition_does_not_trigger() {
        let err = TransitionError { msg: "cannot settle from Idle".to_string() };
        assert!(!is_triggered(DetectorKind::Duplicates, 1, Err(err)));
        assert!(!is_triggered(DetectorKind::Duplicates, 1, Ok(Phase::NoTrigger)));
        assert!(is_triggered(DetectorKind::Duplicates, 1, Ok(Phase::Triggered)));
    }

    #[tokio::test]
    async fn sweep_drops_idle_gates() {
        let rec = Arc::new(Recording::new());
        let engine = engine_with(duplicates(5, 5), rec, &[]);
        send(&engine, 10, 20, "x", 1).await;
        send(&engine, 11, 20, "x", 2).await;
        assert_eq!(engine.gates.lock().unwrap().len(), 2);
        engine.sweep();
        assert!(engine.gates.lock().unwrap().is_empty());
    }
}
