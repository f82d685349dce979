//! Immutable service configuration, loaded once at startup from the
//! environment. Mirrors the teacher's `Config::from_env()` pattern: every
//! field has an explicit default and is parsed defensively.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_path: String,
    pub environment: String,

    pub borrow_rate_base_url: String,
    pub volatility_base_url: String,
    pub event_risk_base_url: String,

    pub v_factor: Decimal,
    pub e_factor: Decimal,
    pub global_min_rate: Decimal,

    pub ttl_borrow_rate: Duration,
    pub ttl_volatility: Duration,
    pub ttl_event_risk: Duration,
    pub ttl_broker_config: Duration,
    pub ttl_calculation: Duration,
    pub ttl_min_rate: Duration,

    pub l1_max_entries: usize,

    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout: Duration,
    pub breaker_success_threshold: u32,

    pub upstream_retry_attempts: u32,
    pub upstream_base_backoff: Duration,

    pub request_deadline: Duration,
    pub upstream_deadline: Duration,
    pub cache_deadline: Duration,
    pub audit_deadline: Duration,
    pub rate_limiter_deadline: Duration,

    pub rate_limit_default_capacity: u64,
    pub rate_limit_default_refill: u64,
    pub rate_limit_default_burst: u64,

    pub enable_fallback: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_decimal(key: &str, default: &str) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or_else(|| Decimal::from_str(default).expect("valid default decimal literal"))
}

fn env_or_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_or(key, default_secs))
}

fn env_or_millis(key: &str, default_millis: u64) -> Duration {
    Duration::from_millis(env_or(key, default_millis))
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Config {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8080),
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "pricing.db".to_string()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "prod".to_string()),

            borrow_rate_base_url: std::env::var("BORROW_RATE_URL")
                .unwrap_or_else(|_| "http://localhost:9001/borrow-rate".to_string()),
            volatility_base_url: std::env::var("VOLATILITY_URL")
                .unwrap_or_else(|_| "http://localhost:9002/volatility".to_string()),
            event_risk_base_url: std::env::var("EVENT_RISK_URL")
                .unwrap_or_else(|_| "http://localhost:9003/event-risk".to_string()),

            v_factor: env_or_decimal("V_FACTOR", "0.01"),
            e_factor: env_or_decimal("E_FACTOR", "0.05"),
            global_min_rate: env_or_decimal("GLOBAL_MIN_RATE", "0.01"),

            ttl_borrow_rate: env_or_secs("TTL_BORROW_RATE", 300),
            ttl_volatility: env_or_secs("TTL_VOLATILITY", 900),
            ttl_event_risk: env_or_secs("TTL_EVENT_RISK", 3600),
            ttl_broker_config: env_or_secs("TTL_BROKER_CONFIG", 1800),
            ttl_calculation: env_or_secs("TTL_CALCULATION", 60),
            ttl_min_rate: env_or_secs("TTL_MIN_RATE", 86400),

            l1_max_entries: env_or("L1_MAX_ENTRIES", 1000),

            breaker_failure_threshold: env_or("BREAKER_FAILURE_THRESHOLD", 3),
            breaker_recovery_timeout: env_or_secs("BREAKER_RECOVERY_TIMEOUT", 30),
            breaker_success_threshold: env_or("BREAKER_SUCCESS_THRESHOLD", 2),

            upstream_retry_attempts: env_or("UPSTREAM_RETRY_ATTEMPTS", 3),
            upstream_base_backoff: env_or_millis("UPSTREAM_BASE_BACKOFF_MS", 100),

            request_deadline: env_or_secs("REQUEST_DEADLINE_SECS", 5),
            upstream_deadline: env_or_secs("UPSTREAM_DEADLINE_SECS", 5),
            cache_deadline: env_or_millis("CACHE_DEADLINE_MS", 200),
            audit_deadline: env_or_secs("AUDIT_DEADLINE_SECS", 1),
            rate_limiter_deadline: env_or_millis("RATE_LIMITER_DEADLINE_MS", 50),

            rate_limit_default_capacity: env_or("RATE_LIMIT_DEFAULT_CAPACITY", 60),
            rate_limit_default_refill: env_or("RATE_LIMIT_DEFAULT_REFILL", 1),
            rate_limit_default_burst: env_or("RATE_LIMIT_DEFAULT_BURST", 0),

            enable_fallback: env_or("ENABLE_FALLBACK", true),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // Used by tests: same defaults as `from_env` would produce with no
        // environment variables set, without touching process env.
        Config {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            database_path: ":memory:".to_string(),
            environment: "test".to_string(),
            borrow_rate_base_url: "http://localhost:9001/borrow-rate".to_string(),
            volatility_base_url: "http://localhost:9002/volatility".to_string(),
            event_risk_base_url: "http://localhost:9003/event-risk".to_string(),
            v_factor: Decimal::from_str("0.01").unwrap(),
            e_factor: Decimal::from_str("0.05").unwrap(),
            global_min_rate: Decimal::from_str("0.01").unwrap(),
            ttl_borrow_rate: Duration::from_secs(300),
            ttl_volatility: Duration::from_secs(900),
            ttl_event_risk: Duration::from_secs(3600),
            ttl_broker_config: Duration::from_secs(1800),
            ttl_calculation: Duration::from_secs(60),
            ttl_min_rate: Duration::from_secs(86400),
            l1_max_entries: 1000,
            breaker_failure_threshold: 3,
            breaker_recovery_timeout: Duration::from_secs(30),
            breaker_success_threshold: 2,
            upstream_retry_attempts: 3,
            upstream_base_backoff: Duration::from_millis(100),
            request_deadline: Duration::from_secs(5),
            upstream_deadline: Duration::from_secs(5),
            cache_deadline: Duration::from_millis(200),
            audit_deadline: Duration::from_secs(1),
            rate_limiter_deadline: Duration::from_millis(50),
            rate_limit_default_capacity: 60,
            rate_limit_default_refill: 1,
            rate_limit_default_burst: 0,
            enable_fallback: true,
        }
    }
}
