//! Structured logging for the racing world.
//!
//! Every record is one JSON line carrying a run id, a monotonic sequence
//! number, a level and a domain. Records go to stdout and to
//! `LOG_DIR/<RUN_ID>/events.jsonl` (trace/debug go to `trace.jsonl`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

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
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
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
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Stable,   // Births, injuries, retirements
    Naming,   // Name generation
    Schedule, // Filling and popping the race queue
    Race,     // Simulation and commentary delivery
    Wager,    // Bets, settlement, payouts
    News,     // News feed items
    System,   // Startup, loop failures, recovery
    Profile,  // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Stable => "stable",
            Domain::Naming => "naming",
            Domain::Schedule => "schedule",
            Domain::Race => "race",
            Domain::Wager => "wager",
            Domain::News => "news",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS is a comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_log(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_log(run_dir.join("events.jsonl")),
            trace: open_log(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["race_id", "horse", "user_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
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
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_injury(horse: &str, impact: f64, career_length: u32, in_race: bool) {
    log(
        Level::Info,
        Domain::Stable,
        "injury",
        obj(&[
            ("horse", v_str(horse)),
            ("impact", v_num(impact)),
            ("career_length", json!(career_length)),
            ("in_race", json!(in_race)),
        ]),
    );
}

pub fn log_retirement(horse: &str, races_run: u32, avg_placement: f64) {
    log(
        Level::Info,
        Domain::Stable,
        "retirement",
        obj(&[
            ("horse", v_str(horse)),
            ("races_run", json!(races_run)),
            ("avg_placement", v_num(avg_placement)),
        ]),
    );
}

pub fn log_birth(horse: &str, parent: Option<&str>, score: f64) {
    log(
        Level::Info,
        Domain::Stable,
        "birth",
        obj(&[
            ("horse", v_str(horse)),
            ("parent", parent.map(v_str).unwrap_or(Value::Null)),
            ("score", v_num(score)),
        ]),
    );
}

pub fn log_name_retry(kind: &str, attempts: u32, last: &str) {
    log(
        Level::Warn,
        Domain::Naming,
        "name_retry",
        obj(&[
            ("kind", v_str(kind)),
            ("attempts", json!(attempts)),
            ("last_candidate", v_str(last)),
        ]),
    );
}

pub fn log_race_scheduled(race_id: u64, name: &str, start: &str, entrants: usize, championship: bool, audit: &str) {
    log(
        Level::Info,
        Domain::Schedule,
        "race_scheduled",
        obj(&[
            ("race_id", json!(race_id)),
            ("name", v_str(name)),
            ("start", v_str(start)),
            ("entrants", json!(entrants)),
            ("championship", json!(championship)),
            ("morning_line_hash", v_str(audit)),
        ]),
    );
}

pub fn log_opinion(race_id: u64, up: &str, down: &str, shift: f64) {
    log(
        Level::Debug,
        Domain::Schedule,
        "opinion",
        obj(&[
            ("race_id", json!(race_id)),
            ("favoured", v_str(up)),
            ("faded", v_str(down)),
            ("shift", v_num(shift)),
        ]),
    );
}

pub fn log_race_finished(race_id: u64, name: &str, winner: &str, wagers: usize) {
    log(
        Level::Info,
        Domain::Race,
        "race_finished",
        obj(&[
            ("race_id", json!(race_id)),
            ("name", v_str(name)),
            ("winner", v_str(winner)),
            ("wagers", json!(wagers)),
        ]),
    );
}

pub fn log_bet(race_id: u64, user_id: u64, kind: &str, horse: Option<&str>, amount: u64) {
    log(
        Level::Info,
        Domain::Wager,
        "bet_placed",
        obj(&[
            ("race_id", json!(race_id)),
            ("user_id", json!(user_id)),
            ("kind", v_str(kind)),
            ("horse", horse.map(v_str).unwrap_or(Value::Null)),
            ("amount", json!(amount)),
        ]),
    );
}

pub fn log_bet_rejected(race_id: u64, user_id: u64, reason: &str) {
    log(
        Level::Debug,
        Domain::Wager,
        "bet_rejected",
        obj(&[
            ("race_id", json!(race_id)),
            ("user_id", json!(user_id)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_payout(race_id: u64, user_id: u64, horse: &str, payout: u64, balance: i64) {
    log(
        Level::Info,
        Domain::Wager,
        "payout",
        obj(&[
            ("race_id", json!(race_id)),
            ("user_id", json!(user_id)),
            ("horse", v_str(horse)),
            ("payout", json!(payout)),
            ("balance", json!(balance)),
        ]),
    );
}

pub fn log_notify_dropped(server_id: u64, channel_id: u64, err: &str) {
    log(
        Level::Debug,
        Domain::Race,
        "notify_dropped",
        obj(&[
            ("server_id", json!(server_id)),
            ("channel_id", json!(channel_id)),
            ("error", v_str(err)),
        ]),
    );
}

pub fn log_news(items: &[String]) {
    for item in items {
        log(Level::Info, Domain::News, "news", obj(&[("msg", v_str(item))]));
    }
}

pub fn log_loop_failure(stage: &str, err: &str, cooldown_secs: u64) {
    log(
        Level::Error,
        Domain::System,
        "loop_failure",
        obj(&[
            ("stage", v_str(stage)),
            ("error", v_str(err)),
            ("cooldown_secs", json!(cooldown_secs)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

/// SHA-256 hex digest of an audit payload.
pub fn audit_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

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

/// Emits a trace record with the elapsed time when dropped.
pub struct ProfileScope {
    label: &'static str,
    context: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self { label, context: obj(fields), started: Instant::now() }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = std::mem::take(&mut self.context);
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
