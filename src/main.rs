use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use selfmod::config::EngineConfig;
use selfmod::engine::Engine;
use selfmod::event::{MessageEvent, UserId};
use selfmod::gateway::{Collaborators, LogDelivery, LogPunisher, MemorySettings, StaticPermissions};
use selfmod::logging::{self, json_log, obj, v_str};
use selfmod::storage::AdderStore;

fn exempt_from_env() -> Vec<UserId> {
    std::env::var("EXEMPT_USERS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = EngineConfig::from_env();
    let settings = MemorySettings::load(Path::new(&cfg.settings_path))
        .with_context(|| format!("loading settings from {}", cfg.settings_path))?;
    let exempt = exempt_from_env();
    json_log(
        "startup",
        obj(&[
            ("settings_path", v_str(&cfg.settings_path)),
            ("guilds", json!(settings.guild_count())),
            ("exempt_users", json!(exempt.len())),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
        ]),
    );

    let collab = Collaborators {
        settings: Arc::new(settings),
        permissions: Arc::new(StaticPermissions::new(exempt)),
        delivery: Arc::new(LogDelivery),
        punisher: Arc::new(LogPunisher),
    };
    let engine = Arc::new(Engine::new(cfg.clone(), collab));

    let store = if cfg.sqlite_path.is_empty() {
        None
    } else {
        let mut store = AdderStore::new(&cfg.sqlite_path)?;
        store.init()?;
        let restored = engine.restore_adder(&store, logging::ts_epoch_ms());
        json_log("adder_restore", obj(&[("entries", json!(restored))]));
        Some(Arc::new(Mutex::new(store)))
    };
    let maintenance = engine.spawn_maintenance(store.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let (mut events, mut triggers) = (0u64, 0u64);
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event: MessageEvent = match serde_json::from_str(&line) {
            Ok(ev) => ev,
            Err(err) => {
                json_log("input_error", obj(&[("error", v_str(&err.to_string()))]));
                continue;
            }
        };
        let reports = engine.handle(&event).await;
        events += 1;
        triggers += reports.iter().filter(|r| r.outcome.is_triggered()).count() as u64;
        let out = json!({ "message_id": event.id, "reports": reports });
        stdout.write_all(format!("{}\n", out).as_bytes()).await?;
    }
    stdout.flush().await?;

    maintenance.abort();
    engine.sweep();
    if let Some(store) = store {
        let mut store = store.lock().await;
        engine.persist_adder(&mut store);
    }
    logging::tick_aggregator();
    json_log(
        "shutdown",
        obj(&[("events", json!(events)), ("triggers", json!(triggers)), ("adder_entries", json!(engine.adder().len()))]),
    );
    Ok(())
}
