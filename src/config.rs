use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub sweep_interval: Duration,
    pub dispatch_interval: Duration,
    pub reservation_ttl_hours: i64,
    pub dispatch_batch_size: i64,
    pub notification_max_attempts: i32,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Like [`env_or`], but values below `min` also fall back to the default.
fn env_at_least<T: FromStr + PartialOrd>(key: &str, min: T, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .filter(|v| *v >= min)
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections: env_at_least("DB_MAX_CONNECTIONS", 1, 10),
            run_migrations: env_or("RUN_MIGRATIONS", true),
            sweep_interval: Duration::from_secs(env_at_least("SWEEP_INTERVAL_SECS", 1, 60)),
            dispatch_interval: Duration::from_secs(env_at_least("DISPATCH_INTERVAL_SECS", 1, 30)),
            reservation_ttl_hours: env_at_least("RESERVATION_TTL_HOURS", 1, 48),
            dispatch_batch_size: env_at_least("DISPATCH_BATCH_SIZE", 1, 50),
            notification_max_attempts: env_at_least("NOTIFICATION_MAX_ATTEMPTS", 1, 3),
        })
    }
}
