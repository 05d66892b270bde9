//! Process entry point: owns the store lifecycle and runs a JSON-lines command
//! driver on stdin/stdout.
//!
//! ```text
//! {"op":"ensure_account","user_id":"42"}
//! {"op":"tap","user_id":"42"}
//! {"op":"activate_boost","user_id":"42","kind":"full"}
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tapengine::account::BoostKind;
use tapengine::clock::SystemClock;
use tapengine::config::{GameConfig, StoreBackend};
use tapengine::engine::GameEngine;
use tapengine::error::GameError;
use tapengine::logging::{self, log, obj, v_str, Domain, Level};
use tapengine::notify::LogNotifier;
use tapengine::reply::Reply;
use tapengine::store::{AccountStore, AggregateStore, MemoryStore, SqliteStore};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    EnsureAccount { user_id: String },
    Tap { user_id: String },
    ActivateBoost { user_id: String, kind: String },
    UpgradeItem { user_id: String, item: String },
    RegisterReferral { user_id: String, referrer_id: String },
    Heartbeat { user_id: String },
    ActivatePackage { user_id: String, package: String },
    Status { user_id: String },
    BoostLevels { user_id: String },
    DailyInfo { user_id: String },
    ReferralSummary { user_id: String },
    GlobalStats,
}

fn build_stores(cfg: &GameConfig) -> Result<(Arc<dyn AccountStore>, Arc<dyn AggregateStore>)> {
    match cfg.store_backend {
        StoreBackend::Sqlite => {
            let store = Arc::new(SqliteStore::new(&cfg.sqlite_path)?);
            store.init()?;
            let accounts: Arc<dyn AccountStore> = store.clone();
            let aggregates: Arc<dyn AggregateStore> = store;
            Ok((accounts, aggregates))
        }
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let accounts: Arc<dyn AccountStore> = store.clone();
            let aggregates: Arc<dyn AggregateStore> = store;
            Ok((accounts, aggregates))
        }
    }
}

async fn execute(engine: &GameEngine, command: Command) -> Reply {
    match command {
        Command::EnsureAccount { user_id } => Reply::from_result(
            "ensure_account",
            engine.ensure_account(&user_id).await.map(|created| json!({ "created": created })),
        ),
        Command::Tap { user_id } => Reply::from_result("tap", engine.tap(&user_id).await),
        Command::ActivateBoost { user_id, kind } => {
            let result = match BoostKind::parse(&kind) {
                Some(kind) => engine.activate_boost(&user_id, kind).await,
                None => Err(GameError::InvalidItem(kind)),
            };
            Reply::from_result("activate_boost", result)
        }
        Command::UpgradeItem { user_id, item } => {
            Reply::from_result("upgrade_item", engine.upgrade_item(&user_id, &item).await)
        }
        Command::RegisterReferral { user_id, referrer_id } => Reply::from_result(
            "register_referral",
            engine.register_referral(&user_id, &referrer_id).await,
        ),
        Command::Heartbeat { user_id } => Reply::from_result("heartbeat", engine.heartbeat(&user_id).await),
        Command::ActivatePackage { user_id, package } => {
            Reply::from_result("activate_package", engine.activate_package(&user_id, &package).await)
        }
        Command::Status { user_id } => Reply::from_result("status", engine.status(&user_id).await),
        Command::BoostLevels { user_id } => Reply::from_result("boost_levels", engine.boost_levels(&user_id).await),
        Command::DailyInfo { user_id } => Reply::from_result("daily_info", engine.daily_info(&user_id).await),
        Command::ReferralSummary { user_id } => {
            Reply::from_result("referral_summary", engine.referral_summary(&user_id).await)
        }
        Command::GlobalStats => Reply::from_result("global_stats", engine.global_stats().await),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = GameConfig::from_env();
    let (accounts, aggregates) = build_stores(&cfg)?;
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("backend", v_str(&format!("{:?}", cfg.store_backend).to_lowercase())),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("version", v_str(env!("CARGO_PKG_VERSION"))),
        ]),
    );

    let engine = GameEngine::new(accounts, aggregates, Arc::new(LogNotifier), Arc::new(SystemClock), cfg);
    engine.init().await?;

    let started = Instant::now();
    let mut commands = 0u64;
    let mut failures = 0u64;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        commands += 1;
        let reply = match serde_json::from_str::<Command>(line) {
            Ok(command) => execute(&engine, command).await,
            Err(err) => Reply::failure("unknown", "bad_request", err.to_string()),
        };
        if !reply.success {
            failures += 1;
        }
        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
        logging::tick_aggregator();
    }

    logging::log_session_summary(started.elapsed().as_secs(), commands, failures);
    logging::flush();
    Ok(())
}
