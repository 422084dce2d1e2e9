//! Structured logging for the moderation engine.
//!
//! Every record is one JSON object on stderr carrying a run id and a sequence
//! number. `LOG_LEVEL` and `LOG_DOMAINS` filter records; `LOG_DIR` also
//! writes `events.jsonl` and `trace.jsonl` under a per-run directory. Busy
//! counters (triggers, bypasses, punishments) are also folded into a
//! periodic `aggregated_stats` record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::error::SelfmodError;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Guard,    // Bypass decisions
    Detect,   // Detector counts
    Window,   // Window store maintenance
    Adder,    // Repeat-offense counters
    Escalate, // Triggers and side effects
    Punish,   // Soft/hard moderation actions
    System,   // Startup, shutdown, sweeps
    Profile,  // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Guard => "guard",
            Domain::Detect => "detect",
            Domain::Window => "window",
            Domain::Adder => "adder",
            Domain::Escalate => "escalate",
            Domain::Punish => "punish",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sequence counter for ordering
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    /// Present only when LOG_DIR is set.
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let Ok(base) = std::env::var("LOG_DIR") else {
            return RunContext { run_id, events: None, trace: None };
        };
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("selfmod: cannot create log dir {}: {}", run_dir.display(), err);
            return RunContext { run_id, events: None, trace: None };
        }

        let open = |name: &str| match File::create(run_dir.join(name)) {
            Ok(f) => Some(Mutex::new(BufWriter::new(f))),
            Err(err) => {
                eprintln!("selfmod: cannot open {}: {}", name, err);
                None
            }
        };
        RunContext {
            events: open("events.jsonl"),
            trace: open("trace.jsonl"),
            run_id,
        }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "token", "bot_token"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["guild_id", "channel_id", "user_id", "detector", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    emit_record(level, domain.as_str(), event, fields);
}

/// Log with a free-form component name, always at info.
pub fn json_log(module: &str, fields: Map<String, Value>) {
    if Level::Info < Level::from_env() {
        return;
    }
    emit_record(Level::Info, module, module, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    // stdout is reserved for engine reports
    eprintln!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_bypass(detector: &str, guild_id: u64, channel_id: u64, user_id: u64, reason: &str) {
    log(
        Level::Trace,
        Domain::Guard,
        "bypass",
        obj(&[
            ("detector", v_str(detector)),
            ("guild_id", json!(guild_id)),
            ("channel_id", json!(channel_id)),
            ("user_id", json!(user_id)),
            ("reason", v_str(reason)),
        ]),
    );
    agg_increment("bypass");
}

pub fn log_count(detector: &str, channel_id: u64, user_id: u64, count: u32, threshold: u32) {
    log(
        Level::Trace,
        Domain::Detect,
        "count",
        obj(&[
            ("detector", v_str(detector)),
            ("channel_id", json!(channel_id)),
            ("user_id", json!(user_id)),
            ("count", json!(count)),
            ("threshold", json!(threshold)),
        ]),
    );
}

pub fn log_trigger(detector: &str, guild_id: u64, channel_id: u64, user_id: u64, message_id: u64, reason: &str) {
    log(
        Level::Info,
        Domain::Escalate,
        "trigger",
        obj(&[
            ("detector", v_str(detector)),
            ("guild_id", json!(guild_id)),
            ("channel_id", json!(channel_id)),
            ("user_id", json!(user_id)),
            ("message_id", json!(message_id)),
            ("msg", v_str(reason)),
        ]),
    );
    agg_increment("trigger");
}

pub fn log_side_effect_failure(effect: &str, detector: &str, message_id: u64, error: &str) {
    log(
        Level::Warn,
        Domain::Escalate,
        "side_effect_failed",
        obj(&[
            ("detector", v_str(detector)),
            ("effect", v_str(effect)),
            ("message_id", json!(message_id)),
            ("msg", v_str(error)),
        ]),
    );
    agg_increment("side_effect_failure");
}

pub fn log_punishment(stage: &str, action: &str, user_id: u64, channel_id: u64, error: Option<&str>) {
    let (level, event) = match error {
        Some(_) => (Level::Error, "punishment_failed"),
        None => (Level::Info, "punishment_applied"),
    };
    log(
        level,
        Domain::Punish,
        event,
        obj(&[
            ("user_id", json!(user_id)),
            ("channel_id", json!(channel_id)),
            ("stage", v_str(stage)),
            ("action", v_str(action)),
            ("msg", error.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
    agg_increment(if error.is_some() { "punishment_failure" } else { "punishment" });
}

pub fn log_adder(user_id: u64, key: &str, count: u32, threshold: u32, overflow: bool) {
    log(
        Level::Debug,
        Domain::Adder,
        "increment",
        obj(&[
            ("user_id", json!(user_id)),
            ("key", v_str(key)),
            ("count", json!(count)),
            ("threshold", json!(threshold)),
            ("overflow", json!(overflow)),
        ]),
    );
}

pub fn log_store_corruption(err: &SelfmodError) {
    log(
        Level::Warn,
        Domain::Window,
        "store_corruption",
        obj(&[("msg", v_str(&err.to_string()))]),
    );
}

pub fn log_config_invalid(guild_id: u64, err: &SelfmodError) {
    log(
        Level::Warn,
        Domain::Guard,
        "config_invalid",
        obj(&[("guild_id", json!(guild_id)), ("msg", v_str(&err.to_string()))]),
    );
}

pub fn log_collaborator_error(collaborator: &str, message_id: u64, error: &str) {
    log(
        Level::Warn,
        Domain::System,
        "collaborator_error",
        obj(&[
            ("collaborator", v_str(collaborator)),
            ("message_id", json!(message_id)),
            ("msg", v_str(error)),
        ]),
    );
}

pub fn log_sweep(windows: usize, adder_entries: usize, scopes_left: usize, adder_left: usize) {
    log(
        Level::Debug,
        Domain::System,
        "sweep",
        obj(&[
            ("windows_reclaimed", json!(windows)),
            ("adder_reclaimed", json!(adder_entries)),
            ("scopes", json!(scopes_left)),
            ("adder_entries", json!(adder_left)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(false)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Log Aggregator for Periodic Summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounts {
    pub triggers: u64,
    pub bypasses: u64,
    pub punishments: u64,
    pub punishment_failures: u64,
    pub side_effect_failures: u64,
}

struct LogAggregator {
    counts: AggregateCounts,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            counts: AggregateCounts::default(),
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    fn increment(&mut self, event: &str) {
        match event {
            "trigger" => self.counts.triggers += 1,
            "bypass" => self.counts.bypasses += 1,
            "punishment" => self.counts.punishments += 1,
            "punishment_failure" => self.counts.punishment_failures += 1,
            "side_effect_failure" => self.counts.side_effect_failures += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<AggregateCounts> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            let result = std::mem::take(&mut self.counts);
            self.last_flush = Instant::now();
            Some(result)
        } else {
            None
        }
    }
}

/// Call periodically to emit aggregated stats
pub fn tick_aggregator() {
    if let Ok(mut agg) = get_aggregator().lock() {
        if let Some(c) = agg.maybe_flush() {
            log(
                Level::Info,
                Domain::System,
                "aggregated_stats",
                obj(&[
                    ("triggers", json!(c.triggers)),
                    ("bypasses", json!(c.bypasses)),
                    ("punishments", json!(c.punishments)),
                    ("punishment_failures", json!(c.punishment_failures)),
                    ("side_effect_failures", json!(c.side_effect_failures)),
                ]),
            );
        }
    }
}

/// Increment a counter in the aggregator
pub fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}

// =============================================================================
// Tests
// =============================================================================
