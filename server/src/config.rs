//! Configuration loading from environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::clock::FIVE_MINUTES;

const DEFAULT_DB_PATH: &str = "database";
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// Public origin used when building paste links. Falls back to the
    /// request's `Host` header when unset.
    pub base_url: Option<String>,
    /// Honour the `x-test-now-ms` clock override and skip housekeeping.
    pub test_mode: bool,
    pub cleanup_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_addr: SocketAddr::from(DEFAULT_BIND_ADDR),
            base_url: None,
            test_mode: false,
            cleanup_interval: FIVE_MINUTES,
        }
    }
}

/// Truthy: `1`, `true`, `yes`, `on`. Falsy: `0`, `false`, `no`, `off`, empty.
/// Case-insensitive.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            db_path: parsed("DB_PATH").map_or(defaults.db_path, PathBuf::from),
            bind_addr: parsed("BIND_ADDR")
                .and_then(|v| parse_or_warn("BIND_ADDR", &v))
                .unwrap_or(defaults.bind_addr),
            base_url: parsed("BASE_URL").map(|v| v.trim_end_matches('/').to_string()),
            test_mode: parsed("TEST_MODE")
                .and_then(|v| {
                    let flag = parse_flag(&v);
                    if flag.is_none() {
                        warn!("Ignoring unrecognized TEST_MODE value {:?}", v);
                    }
                    flag
                })
                .unwrap_or(defaults.test_mode),
            cleanup_interval: parsed("CLEANUP_INTERVAL_SECS")
                .and_then(|v| parse_or_warn::<u64>("CLEANUP_INTERVAL_SECS", &v))
                .filter(|secs| *secs > 0)
                .map_or(defaults.cleanup_interval, Duration::from_secs),
        }
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!("Ignoring unparsable {} value {:?}", key, value);
    }
    parsed
}
