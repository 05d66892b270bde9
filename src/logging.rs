//! Structured logging for the game transaction engine.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain-specific categories for filtering
//! 3. Summarization-friendly periodic checkpoints
//! 4. Replay/audit support via run ids, sequence numbers and account versions
//!
//! Every record is one JSON line written to the run directory and mirrored on
//! stderr. Stdout belongs to the command driver.

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
    Tap,       // Energy spend, points earned
    Boost,     // Daily boosts, paid packages
    Upgrade,   // Paid level increases
    Referral,  // Invitations and bonuses
    Presence,  // Heartbeats, daily actives
    Store,     // Commits, conflicts, retries
    Aggregate, // Global counters
    Notify,    // Post-commit notifications
    System,    // Startup, shutdown
    Profile,   // Performance profiling
    Audit,     // Replay/audit trail entries
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Tap => "tap",
            Domain::Boost => "boost",
            Domain::Upgrade => "upgrade",
            Domain::Referral => "referral",
            Domain::Presence => "presence",
            Domain::Store => "store",
            Domain::Aggregate => "aggregate",
            Domain::Notify => "notify",
            Domain::System => "system",
            Domain::Profile => "profile",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // Check LOG_DOMAINS env var (comma-separated list or "all")
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
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
    metrics: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
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
                "version": env!("CARGO_PKG_VERSION"),
            })
            .to_string(),
        );

        RunContext {
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            metrics: open_sink(run_dir.join("metrics.jsonl")),
            run_id,
        }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "init_data", "bot_token", "api_key"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["user_id", "op", "kind", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds (for replay correlation)
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
    if component == "aggregate" || event.starts_with("metrics.") {
        write_line(&ctx.metrics, &line);
    }
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    eprintln!("{}", line);
}

/// Flush buffered sinks (call on shutdown).
pub fn flush() {
    let ctx = ensure_run_context();
    for sink in [&ctx.events, &ctx.trace, &ctx.metrics] {
        if let Some(Ok(mut w)) = sink.as_ref().map(|m| m.lock()) {
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_tap(user_id: &str, gain: u64, energy_left: u64, version: u64) {
    log(
        Level::Debug,
        Domain::Tap,
        "tap",
        obj(&[
            ("user_id", v_str(user_id)),
            ("gain", json!(gain)),
            ("energy", json!(energy_left)),
            ("version", json!(version)),
        ]),
    );
    agg_increment("tap");
}

pub fn log_boost(user_id: &str, kind: &str, used_today: u32, version: u64) {
    log(
        Level::Info,
        Domain::Boost,
        "boost_activated",
        obj(&[
            ("user_id", v_str(user_id)),
            ("kind", v_str(kind)),
            ("used_today", json!(used_today)),
            ("version", json!(version)),
        ]),
    );
    agg_increment("boost");
}

pub fn log_upgrade(user_id: &str, item: &str, new_level: u32, cost: u64, points_after: u64) {
    log(
        Level::Info,
        Domain::Upgrade,
        "upgraded",
        obj(&[
            ("user_id", v_str(user_id)),
            ("kind", v_str(item)),
            ("new_level", json!(new_level)),
            ("cost", json!(cost)),
            ("points", json!(points_after)),
        ]),
    );
    agg_increment("upgrade");
}

pub fn log_referral(referred_id: &str, referrer_id: &str, outcome: &str) {
    log(
        Level::Info,
        Domain::Referral,
        "referral",
        obj(&[
            ("user_id", v_str(referred_id)),
            ("referrer_id", v_str(referrer_id)),
            ("outcome", v_str(outcome)),
        ]),
    );
    if outcome == "awarded" {
        agg_increment("referral");
    }
}

/// A request that was refused with a business rule or infrastructure error.
pub fn log_rejection(op: &str, user_id: &str, kind: &str, message: &str) {
    log(
        Level::Debug,
        Domain::Audit,
        "rejected",
        obj(&[
            ("op", v_str(op)),
            ("user_id", v_str(user_id)),
            ("kind", v_str(kind)),
            ("reason", v_str(message)),
        ]),
    );
    agg_increment("rejection");
}

/// Session summary on shutdown
pub fn log_session_summary(duration_secs: u64, commands: u64, failures: u64) {
    log(
        Level::Info,
        Domain::System,
        "session_summary",
        obj(&[
            ("duration_secs", json!(duration_secs)),
            ("commands", json!(commands)),
            ("failures", json!(failures)),
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
    domain: Domain,
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            domain: Domain::Profile,
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
            .unwrap_or(true)
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
        log(Level::Trace, self.domain, "profile", fields);
    }
}

// =============================================================================
// Log Aggregator for Periodic Summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

struct LogAggregator {
    taps: u64,
    boosts: u64,
    upgrades: u64,
    referrals: u64,
    rejections: u64,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            taps: 0,
            boosts: 0,
            upgrades: 0,
            referrals: 0,
            rejections: 0,
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    fn increment(&mut self, event: &str) {
        match event {
            "tap" => self.taps += 1,
            "boost" => self.boosts += 1,
            "upgrade" => self.upgrades += 1,
            "referral" => self.referrals += 1,
            "rejection" => self.rejections += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<[u64; 5]> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            let result = [self.taps, self.boosts, self.upgrades, self.referrals, self.rejections];
            self.taps = 0;
            self.boosts = 0;
            self.upgrades = 0;
            self.referrals = 0;
            self.rejections = 0;
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
        if let Some([taps, boosts, upgrades, referrals, rejections]) = agg.maybe_flush() {
            log(
                Level::Info,
                Domain::System,
                "aggregated_stats",
                obj(&[
                    ("taps", json!(taps)),
                    ("boosts", json!(boosts)),
                    ("upgrades", json!(upgrades)),
                    ("referrals", json!(referrals)),
                    ("rejections", json!(rejections)),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_split_promotes_user_fields() {
        let (top, data) = split_fields(obj(&[
            ("user_id", v_str("7")),
            ("op", v_str("tap")),
            ("gain", json!(2)),
        ]));
        assert_eq!(top.get("user_id").unwrap(), "7");
        assert_eq!(top.get("op").unwrap(), "tap");
        assert!(data.contains_key("gain"));
        assert!(!data.contains_key("user_id"));
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let m = sanitize_fields(obj(&[("init_data", v_str("secret")), ("user_id", v_str("7"))]));
        assert_eq!(m.get("init_data").unwrap(), "[REDACTED]");
        assert_eq!(m.get("user_id").unwrap(), "7");
    }

    #[test]
    fn test_aggregator_counts_known_events() {
        let mut agg = LogAggregator::new();
        agg.flush_interval_secs = 0;
        agg.increment("tap");
        agg.increment("tap");
        agg.increment("upgrade");
        agg.increment("unknown");
        assert_eq!(agg.maybe_flush(), Some([2, 0, 1, 0, 0]));
        assert_eq!(agg.maybe_flush(), Some([0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
