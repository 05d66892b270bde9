//! Concurrent tap stress test - checks that contended accounts lose no updates.
//!
//! Every account starts with exactly enough energy for the taps aimed at it and
//! the clock is frozen, so the expected end state is known in advance:
//! energy 0, points == taps, and one more tap rejected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use futures_util::future::join_all;

use tapengine::account::Account;
use tapengine::clock::ManualClock;
use tapengine::config::GameConfig;
use tapengine::engine::GameEngine;
use tapengine::error::GameError;
use tapengine::notify::LogNotifier;
use tapengine::store::fault::FaultProfile;
use tapengine::store::{AccountStore, MemoryStore, RetryPolicy};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    println!("=== CONCURRENT TAP STRESS TEST ===\n");

    let workers = num_cpus::get().clamp(2, 16);
    let accounts: usize = std::env::var("STRESS_ACCOUNTS").ok().and_then(|v| v.parse().ok()).unwrap_or(4);
    let taps_per_account: u64 = std::env::var("STRESS_TAPS").ok().and_then(|v| v.parse().ok()).unwrap_or(400);
    let conflict_rate: f64 = std::env::var("STRESS_CONFLICT_RATE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.05);

    println!("Workers: {}", workers);
    println!("Accounts: {}", accounts);
    println!("Taps per account: {}", taps_per_account);
    println!("Injected conflict rate: {:.2}", conflict_rate);
    println!();

    let store = Arc::new(MemoryStore::with_faults(FaultProfile { conflict_rate, ..FaultProfile::disabled() }));
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let mut cfg = GameConfig::default();
    cfg.retry = RetryPolicy { max_attempts: 500, base_delay_ms: 1, max_delay_ms: 20, jitter_factor: 0.5 };
    cfg.economy.base_max_energy = taps_per_account;

    let engine = Arc::new(GameEngine::new(store.clone(), store.clone(), Arc::new(LogNotifier), clock.clone(), cfg));
    engine.init().await?;

    let ids: Vec<String> = (0..accounts).map(|i| format!("stress-{}", i)).collect();
    for id in &ids {
        engine.ensure_account(id).await?;
    }

    let ok = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let total = accounts as u64 * taps_per_account;
    let mut handles = Vec::with_capacity(workers);
    for w in 0..workers {
        let engine = Arc::clone(&engine);
        let ids = ids.clone();
        let ok = Arc::clone(&ok);
        let rejected = Arc::clone(&rejected);
        handles.push(tokio::spawn(async move {
            let mut n = w as u64;
            while n < total {
                let id = &ids[(n % ids.len() as u64) as usize];
                match engine.tap(id).await {
                    Ok(_) => ok.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
                n += workers as u64;
            }
        }));
    }
    for joined in join_all(handles).await {
        joined?;
    }
    let elapsed = start.elapsed();

    println!("=== Summary ===");
    println!("Time: {:.2?}", elapsed);
    println!("Taps committed: {}", ok.load(Ordering::Relaxed));
    println!("Taps rejected: {}", rejected.load(Ordering::Relaxed));
    println!("Throughput: {:.0} taps/sec", total as f64 / elapsed.as_secs_f64());
    println!();

    let mut failures = 0;
    for id in &ids {
        let Some(stored) = store.load(id).await? else {
            bail!("account {} vanished", id);
        };
        let account: Account = stored.value;
        let extra = engine.tap(id).await;
        let drained = matches!(extra, Err(GameError::InsufficientEnergy { .. }));
        let sound = account.energy == 0 && account.points == taps_per_account && account.touches == taps_per_account;
        println!(
            "{:>10} energy={:>4} points={:>6} touches={:>6} version={:>6} {}",
            id,
            account.energy,
            account.points,
            account.touches,
            stored.version,
            if sound && drained { "ok" } else { "LOST UPDATES" }
        );
        if !(sound && drained) {
            failures += 1;
        }
    }

    let stats = engine.global_stats().await?;
    println!("\nGlobal touches: {} (best effort, expected {})", stats.total_touches, total);

    if failures > 0 {
        bail!("{} account(s) inconsistent", failures);
    }
    println!("\n✓ No lost updates");
    Ok(())
}
