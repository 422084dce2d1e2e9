//! Whole-pipeline scenarios: events in, collaborator calls and reports out.

use std::sync::Arc;

use selfmod::config::{EngineConfig, GuardConfig};
use selfmod::detector::DetectorKind;
use selfmod::engine::Engine;
use selfmod::escalation::{EffectStatus, HardStatus, Outcome, SoftStatus};
use selfmod::event::{Author, MessageEvent};
use selfmod::gateway::{Call, Collaborators, MemorySettings, Recording, StaticPermissions};
use selfmod::punishment::{HardPunishment, PunishmentAction};

const GUILD: u64 = 1;
const SCOPE: u64 = 10;
const USER: u64 = 42;
const LOG_CHANNEL: u64 = 99;

fn message(id: u64, channel: u64, user: u64, content: &str, ts: u64) -> MessageEvent {
    MessageEvent {
        id,
        guild_id: GUILD,
        channel_id: channel,
        channel_name: "general".to_string(),
        author: Author { id: user, tag: format!("user{}#0001", user), roles: Vec::new(), bot: false },
        content: content.to_string(),
        embeds: Vec::new(),
        webhook: false,
        ts,
    }
}

fn scenario_config() -> GuardConfig {
    GuardConfig {
        enabled: true,
        threshold: 3,
        window_capacity: 5,
        soft_punishment: Some(PunishmentAction::Alert),
        hard_punishment: Some(HardPunishment {
            action: PunishmentAction::TimedRemove,
            duration_secs: Some(600),
            adder_key: "messages".to_string(),
            threshold: 3,
            window_secs: 3_600,
        }),
        ..Default::default()
    }
}

fn build(settings: MemorySettings, rec: Arc<Recording>, detectors: &[DetectorKind]) -> Engine {
    let collab = Collaborators {
        settings: Arc::new(settings),
        permissions: Arc::new(StaticPermissions::default()),
        delivery: rec.clone(),
        punisher: rec,
    };
    Engine::new(EngineConfig::default(), collab).with_detectors(detectors)
}

#[tokio::test]
async fn three_bursts_fire_timed_remove_once() {
    let rec = Arc::new(Recording::new());
    let settings = MemorySettings::new()
        .with_guard(GUILD, DetectorKind::Duplicates, scenario_config())
        .with_log_channel(GUILD, LOG_CHANNEL);
    let engine = build(settings, rec.clone(), &[DetectorKind::Duplicates]);

    let mut id = 0;
    let mut ts = 1_700_000_000_000;
    let mut triggers = Vec::new();
    for burst in 1..=3 {
        let text = format!("free nitro {}", burst);
        for _ in 0..3 {
            id += 1;
            ts += 1_000;
            let reports = engine.handle(&message(id, SCOPE, USER, &text, ts)).await;
            if let Outcome::Triggered(report) = &reports[0].outcome {
                triggers.push(report.clone());
            }
        }
        if burst == 1 {
            assert_eq!(engine.adder().count(USER, "messages", ts), 1);
        }
    }

    assert_eq!(triggers.len(), 3);
    for report in &triggers {
        assert_eq!(report.count, 3);
        assert_eq!(report.delete, EffectStatus::Done);
        assert_eq!(report.alert, EffectStatus::Done);
        assert_eq!(report.log, EffectStatus::Done);
        assert_eq!(report.soft, SoftStatus::Applied { action: PunishmentAction::Alert });
    }
    assert!(matches!(triggers[0].hard, HardStatus::Accumulated { count: 1, threshold: 3, .. }));
    assert!(matches!(triggers[1].hard, HardStatus::Accumulated { count: 2, .. }));
    assert_eq!(
        triggers[2].hard,
        HardStatus::Applied {
            key: "messages".to_string(),
            action: PunishmentAction::TimedRemove,
            duration_secs: Some(600),
        }
    );

    let hard_calls: Vec<Call> = rec.calls().into_iter().filter(|c| matches!(c, Call::Hard { .. })).collect();
    assert_eq!(
        hard_calls,
        vec![Call::Hard {
            user: USER,
            scope: SCOPE,
            action: PunishmentAction::TimedRemove,
            duration_secs: Some(600),
        }]
    );
    assert_eq!(engine.adder().count(USER, "messages", ts), 0);
    assert_eq!(rec.count(|c| matches!(c, Call::Delete { .. })), 3);
    assert_eq!(rec.count(|c| matches!(c, Call::Soft { .. })), 3);
    assert!(engine.windows().window_len(SCOPE) <= 5);
}

#[tokio::test]
async fn audit_record_reaches_log_channel() {
    let rec = Arc::new(Recording::new());
    let settings = MemorySettings::new()
        .with_guard(GUILD, DetectorKind::Duplicates, scenario_config())
        .with_log_channel(GUILD, LOG_CHANNEL);
    let engine = build(settings, rec.clone(), &[DetectorKind::Duplicates]);
    for id in 1..=3 {
        engine.handle(&message(id, SCOPE, USER, "Same Thing", 1_700_000_000_000 + id)).await;
    }
    let logs: Vec<Call> = rec.calls().into_iter().filter(|c| matches!(c, Call::Log { .. })).collect();
    assert_eq!(logs.len(), 1);
    let Call::Log { channel, record } = &logs[0] else { unreachable!() };
    assert_eq!(*channel, LOG_CHANNEL);
    assert_eq!(record.author_id, USER);
    assert_eq!(record.channel_id, SCOPE);
    assert_eq!(record.content, "Same Thing");
    assert_eq!(record.reason, "Duplicated messages: reached threshold 3");
}

#[tokio::test]
async fn missing_log_channel_reports_no_target() {
    let rec = Arc::new(Recording::new());
    let settings = MemorySettings::new().with_guard(GUILD, DetectorKind::Duplicates, scenario_config());
    let engine = build(settings, rec.clone(), &[DetectorKind::Duplicates]);
    let mut last = Vec::new();
    for id in 1..=3 {
        last = engine.handle(&message(id, SCOPE, USER, "again", 1_000 + id)).await;
    }
    let report = last[0].outcome.trigger().expect("third message triggers");
    assert_eq!(report.log, EffectStatus::NoTarget);
    assert_eq!(report.delete, EffectStatus::Done);
}

#[tokio::test]
async fn scopes_count_independently() {
    let rec = Arc::new(Recording::new());
    let settings = MemorySettings::new().with_guard(GUILD, DetectorKind::Duplicates, scenario_config());
    let engine = build(settings, rec.clone(), &[DetectorKind::Duplicates]);
    for (id, channel) in [(1, 10), (2, 11), (3, 10), (4, 11)] {
        let reports = engine.handle(&message(id, channel, USER, "hello", 1_000 + id)).await;
        assert!(!reports[0].outcome.is_triggered());
    }
    assert!(rec.calls().is_empty());
}

#[tokio::test]
async fn detectors_share_an_adder_key() {
    let rec = Arc::new(Recording::new());
    let hard = HardPunishment {
        action: PunishmentAction::PermanentRemove,
        duration_secs: Some(30),
        adder_key: "messages".to_string(),
        threshold: 2,
        window_secs: 600,
    };
    let mentions = GuardConfig {
        enabled: true,
        threshold: 2,
        hard_punishment: Some(hard.clone()),
        ..Default::default()
    };
    let newlines = GuardConfig {
        enabled: true,
        threshold: 3,
        hard_punishment: Some(hard),
        ..Default::default()
    };
    let settings = MemorySettings::new()
        .with_guard(GUILD, DetectorKind::Mentions, mentions)
        .with_guard(GUILD, DetectorKind::Newlines, newlines);
    let engine = build(settings, rec.clone(), &[DetectorKind::Mentions, DetectorKind::Newlines]);

    let reports = engine.handle(&message(1, SCOPE, USER, "<@1> <@2>\nhi", 1_000)).await;
    assert!(reports[0].outcome.is_triggered());
    assert!(!reports[1].outcome.is_triggered());
    assert_eq!(engine.adder().count(USER, "messages", 1_000), 1);

    let reports = engine.handle(&message(2, SCOPE, USER, "a\nb\nc", 2_000)).await;
    let report = reports[1].outcome.trigger().expect("three lines trigger");
    // permanent actions drop the duration
    assert_eq!(
        report.hard,
        HardStatus::Applied {
            key: "messages".to_string(),
            action: PunishmentAction::PermanentRemove,
            duration_secs: None,
        }
    );
}

#[tokio::test]
async fn settings_file_drives_the_engine() {
    let json = r#"{
        "1": {
            "log_channel": 99,
            "selfmod": {
                "invites": { "enabled": true, "threshold": 1, "allowed": ["rust"] },
                "links": { "enabled": true, "threshold": 2, "allowed": ["example.com"] }
            }
        }
    }"#;
    let rec = Arc::new(Recording::new());
    let settings = MemorySettings::from_json(json).unwrap();
    let engine = build(settings, rec.clone(), &DetectorKind::ALL);

    let reports = engine.handle(&message(1, SCOPE, USER, "join discord.gg/rust", 1_000)).await;
    assert!(reports.iter().all(|r| !r.outcome.is_triggered()));

    let reports = engine
        .handle(&message(2, SCOPE, USER, "https://evil.test/a https://docs.example.com discord.gg/spam", 2_000))
        .await;
    let triggered: Vec<DetectorKind> =
        reports.iter().filter(|r| r.outcome.is_triggered()).map(|r| r.detector).collect();
    assert_eq!(triggered, vec![DetectorKind::Invites]);
}
