// Runtime configuration from the environment (.env honoured)

use crate::activity::DEFAULT_ACTIVITY_CAPACITY;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{warn, Level};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// 0 disables periodic snapshots
    pub snapshot_interval: Duration,
    /// Bonus credited the first time a user joins a trip
    pub starting_balance: Decimal,
    pub activity_capacity: usize,
    pub log_level: Level,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            data_dir: PathBuf::from("data/contest-engine"),
            snapshot_interval: Duration::from_secs(30),
            starting_balance: dec!(100),
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            log_level: Level::INFO,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr),
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            snapshot_interval: Duration::from_secs(parse_or(
                &lookup,
                "SNAPSHOT_INTERVAL_SECS",
                defaults.snapshot_interval.as_secs(),
            )),
            starting_balance: parse_or(&lookup, "STARTING_BALANCE", defaults.starting_balance),
            activity_capacity: parse_or(&lookup, "ACTIVITY_CAPACITY", defaults.activity_capacity),
            log_level: parse_or(&lookup, "LOG_LEVEL", defaults.log_level),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("{}={:?} is not valid, using default", key, raw);
                default
            }
        },
        None => default,
    }
}
