//! Configuration parsing for the Meridian server.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides (`MERIDIAN_*`)
//! - Human readable durations (`50ms`, `3s`, `24h`)

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::allocator::settings::{
    DEFAULT_MAX_RESET_TS_GAP, DEFAULT_SAVE_INTERVAL, DEFAULT_UPDATE_PHYSICAL_INTERVAL,
    MIN_SAVE_INTERVAL,
};
use crate::observability::tracing::LogFormat;
use crate::stream::StreamKey;

/// Meridian: a timestamp oracle handing out unique, monotonic hybrid timestamps.
#[derive(Parser, Debug, Clone)]
#[command(name = "meridian")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Member name used in leader elections (default: meridian-<uuid>)
    #[arg(long, env = "MERIDIAN_NAME")]
    pub name: Option<String>,

    /// gRPC listen address
    #[arg(long, env = "MERIDIAN_LISTEN_ADDR", default_value = "127.0.0.1:3379")]
    pub listen_addr: SocketAddr,

    /// Shared metadata store (SQLite database path)
    #[arg(long, env = "MERIDIAN_BACKEND_ENDPOINTS", default_value = "./data/meridian.db")]
    pub backend_endpoints: PathBuf,

    /// Address of the metrics and health HTTP endpoint (disabled when unset)
    #[arg(long, env = "MERIDIAN_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "MERIDIAN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "MERIDIAN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Period of the physical time update tick, clamped to [1ms, 10s]
    #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
    pub tso_update_physical_interval: Duration,

    /// How far ahead of the cursor checkpoints are persisted
    #[arg(long, default_value = "3s", value_parser = humantime::parse_duration)]
    pub tso_save_interval: Duration,

    /// Bound on clock catch-up waits and forward resets
    #[arg(long, default_value = "24h", value_parser = humantime::parse_duration)]
    pub max_gap_reset_ts: Duration,

    /// Serve local (per-region) timestamp streams
    #[arg(long)]
    pub enable_local_tso: bool,

    /// Regions served when local TSO is enabled (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub local_tso_regions: Vec<String>,

    /// Checkpoint save attempts before giving up
    #[arg(long, default_value_t = 3)]
    pub tso_save_retry_attempts: u32,

    /// Delay after the first failed save; doubles per attempt
    #[arg(long, default_value = "20ms", value_parser = humantime::parse_duration)]
    pub tso_save_retry_backoff: Duration,

    /// Leader lease time to live
    #[arg(long, default_value = "3s", value_parser = humantime::parse_duration)]
    pub leader_lease: Duration,

    /// Size of the metadata store connection pool
    #[arg(long, default_value_t = 4)]
    pub store_pool_size: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--tso-save-interval must be at least 1ms")]
    SaveIntervalTooShort,
    #[error("--leader-lease must be greater than zero")]
    ZeroLease,
    #[error("--store-pool-size must be greater than zero")]
    ZeroPoolSize,
    #[error("invalid local TSO region: {0}")]
    InvalidRegion(String),
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Member name, generated when not configured.
    pub fn member_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("meridian-{}", uuid::Uuid::now_v7()))
    }

    /// Local streams to serve; empty unless local TSO is enabled.
    pub fn local_streams(&self) -> Result<Vec<StreamKey>, ConfigError> {
        if !self.enable_local_tso {
            return Ok(Vec::new());
        }
        let mut streams = Vec::with_capacity(self.local_tso_regions.len());
        for region in &self.local_tso_regions {
            let key = StreamKey::local(region.trim())
                .map_err(|e| ConfigError::InvalidRegion(e.to_string()))?;
            if !streams.contains(&key) {
                streams.push(key);
            }
        }
        Ok(streams)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tso_save_interval < MIN_SAVE_INTERVAL {
            return Err(ConfigError::SaveIntervalTooShort);
        }
        if self.leader_lease.is_zero() {
            return Err(ConfigError::ZeroLease);
        }
        if self.store_pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        self.local_streams()?;
        Ok(())
    }

    /// Create a configuration for tests: ephemeral port, fast timers.
    pub fn test_config(backend: PathBuf) -> Self {
        Self {
            name: Some("meridian-test".into()),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            backend_endpoints: backend,
            log_level: "debug".into(),
            tso_update_physical_interval: Duration::from_millis(5),
            tso_save_interval: Duration::from_millis(500),
            tso_save_retry_backoff: Duration::from_millis(1),
            leader_lease: Duration::from_millis(300),
            store_pool_size: 2,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3379)),
            backend_endpoints: PathBuf::from("./data/meridian.db"),
            metrics_addr: None,
            log_level: "info".into(),
            log_format: LogFormat::Text,
            tso_update_physical_interval: DEFAULT_UPDATE_PHYSICAL_INTERVAL,
            tso_save_interval: DEFAULT_SAVE_INTERVAL,
            max_gap_reset_ts: DEFAULT_MAX_RESET_TS_GAP,
            enable_local_tso: false,
            local_tso_regions: Vec::new(),
            tso_save_retry_attempts: 3,
            tso_save_retry_backoff: Duration::from_millis(20),
            leader_lease: Duration::from_secs(3),
            store_pool_size: 4,
        }
    }
}
