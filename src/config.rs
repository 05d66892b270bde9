use crate::economy::EconomyConfig;
use crate::store::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl StoreBackend {
    pub fn from_env() -> Self {
        match std::env::var("STORE_BACKEND").map(|v| v.to_lowercase()).as_deref() {
            Ok("memory") | Ok("mem") => StoreBackend::Memory,
            _ => StoreBackend::Sqlite,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub economy: EconomyConfig,
    pub retry: RetryPolicy,
    /// Accounts seen within this window count as online.
    pub online_window_ms: i64,
    pub referral_list_limit: usize,
    pub store_backend: StoreBackend,
    pub sqlite_path: String,
    pub breaker_threshold: u32,
    pub breaker_cooldown_ms: i64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            economy: EconomyConfig::default(),
            retry: RetryPolicy::default(),
            online_window_ms: 60_000,
            referral_list_limit: 100,
            store_backend: StoreBackend::Memory,
            sqlite_path: "./tapengine.sqlite".to_string(),
            breaker_threshold: 5,
            breaker_cooldown_ms: 30_000,
        }
    }
}

impl GameConfig {
    pub fn from_env() -> Self {
        let econ = EconomyConfig::default();
        let taping_secs: i64 = std::env::var("TAPING_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(10);
        let online_secs: i64 = std::env::var("ONLINE_WINDOW_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60);
        let cooldown_secs: i64 = std::env::var("AGG_BREAKER_COOLDOWN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30);
        Self {
            economy: EconomyConfig {
                base_max_energy: std::env::var("MAX_ENERGY").ok().and_then(|v| v.parse().ok()).unwrap_or(econ.base_max_energy),
                base_regen_rate: std::env::var("REGEN_RATE").ok().and_then(|v| v.parse().ok()).unwrap_or(econ.base_regen_rate),
                first_time_gift: std::env::var("FIRST_TIME_GIFT").ok().and_then(|v| v.parse().ok()).unwrap_or(econ.first_time_gift),
                referrer_bonus: std::env::var("REFERRER_BONUS").ok().and_then(|v| v.parse().ok()).unwrap_or(econ.referrer_bonus),
                daily_boost_limit: std::env::var("DAILY_BOOST_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(econ.daily_boost_limit),
                taping_duration_ms: taping_secs.saturating_mul(1_000),
                ..econ
            },
            retry: RetryPolicy {
                max_attempts: std::env::var("TXN_MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(8),
                base_delay_ms: std::env::var("TXN_BASE_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(2),
                max_delay_ms: std::env::var("TXN_MAX_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(200),
                jitter_factor: std::env::var("TXN_JITTER").ok().and_then(|v| v.parse().ok()).unwrap_or(0.3),
            },
            online_window_ms: online_secs.saturating_mul(1_000),
            referral_list_limit: std::env::var("REFERRAL_LIST_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            store_backend: StoreBackend::from_env(),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./tapengine.sqlite".to_string()),
            breaker_threshold: std::env::var("AGG_BREAKER_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            breaker_cooldown_ms: cooldown_secs.saturating_mul(1_000),
        }
    }
}
