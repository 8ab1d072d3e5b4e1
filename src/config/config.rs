use config::{Config, File};
use serde::Deserialize;

use crate::error::IndexerError;

/// PostgreSQL database connection configuration.
///
/// The durable store for everything the pipeline writes:
/// marketplace entities (datapods, purchases, escrow, reviews, users)
/// and the ingestion checkpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Ingestion pipeline configuration.
///
/// Controls the batch writer's dual flush trigger and the checkpoint
/// cache tier.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    /// Flush as soon as this many events are queued
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush at most this long after the first queued event
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// TTL for the in-process checkpoint cache
    #[serde(default = "default_checkpoint_cache_ttl_secs")]
    pub checkpoint_cache_ttl_secs: u64,
    /// Capacity of the raw-event channel between the subscriber and ingester
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    3000
}

fn default_checkpoint_cache_ttl_secs() -> u64 {
    3600
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            checkpoint_cache_ttl_secs: default_checkpoint_cache_ttl_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Pipeline health alerting thresholds.
///
/// Consumed by the monitor task; alerting is advisory only and never
/// affects ingestion correctness.
#[derive(Debug, Deserialize, Clone)]
pub struct AlertSettings {
    /// Seconds behind before a processing-lag alert fires
    #[serde(default = "default_lag_threshold_secs")]
    pub processing_lag_threshold_secs: i64,
    /// Fraction of failed batches (0.0 - 1.0) per monitor window
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Milliseconds for a single batch transaction before alerting
    #[serde(default = "default_write_latency_threshold_ms")]
    pub write_latency_threshold_ms: u64,
    /// Consecutive failures of the same batch before escalating
    #[serde(default = "default_max_batch_retries")]
    pub max_batch_retries: u32,
    /// How often lag and error rate are evaluated
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

fn default_lag_threshold_secs() -> i64 {
    300
}

fn default_error_rate_threshold() -> f64 {
    0.1
}

fn default_write_latency_threshold_ms() -> u64 {
    5000
}

fn default_max_batch_retries() -> u32 {
    5
}

fn default_monitor_interval_secs() -> u64 {
    30
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            processing_lag_threshold_secs: default_lag_threshold_secs(),
            error_rate_threshold: default_error_rate_threshold(),
            write_latency_threshold_ms: default_write_latency_threshold_ms(),
            max_batch_retries: default_max_batch_retries(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

/// Redpanda (Kafka-compatible) pub/sub configuration.
///
/// The upstream chain listener publishes raw marketplace events to
/// `{prefix}.events`; the pipeline consumes them from there. Alerts go
/// out on `{prefix}.alerts` when publishing is enabled.
#[derive(Debug, Deserialize, Clone)]
pub struct RedpandaSettings {
    /// Enable/disable the Redpanda integration
    #[serde(default)]
    pub enabled: bool,
    /// Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[serde(default = "default_redpanda_brokers")]
    pub brokers: String,
    /// Consumer group id for the raw-event subscription
    #[serde(default = "default_redpanda_group_id")]
    pub group_id: String,
    /// Topic name prefix (topics: {prefix}.events, {prefix}.alerts)
    #[serde(default = "default_redpanda_topic_prefix")]
    pub topic_prefix: String,
}

fn default_redpanda_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_redpanda_group_id() -> String {
    "bazaar-indexer".to_string()
}

fn default_redpanda_topic_prefix() -> String {
    "bazaar".to_string()
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub redpanda: Option<RedpandaSettings>,
}

impl Settings {
    pub fn new() -> anyhow::Result<Self> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()
            .map_err(|e| IndexerError::config(format!("failed to read configuration: {}", e)))?;

        let settings: Settings = s
            .try_deserialize()
            .map_err(|e| IndexerError::config(format!("invalid configuration: {}", e)))?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_file_yields_config_error() {
        let err = Settings::new().unwrap_err();
        let indexer_err = err.downcast_ref::<IndexerError>().unwrap();
        assert_eq!(indexer_err.kind, crate::error::ErrorKind::Config);
    }
}
