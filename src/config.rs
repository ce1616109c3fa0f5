//! Typed configuration consumed by the core.
//!
//! YAML loading and CLI argument parsing live outside this crate (§1);
//! this module only needs to deserialize the already-typed
//! document an external loader hands it, and validate the inline bounds
//! described in the external-interfaces section of the design.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub ctx_buffer_size: usize,
    pub decay_interval_sec: u64,
    pub decay_alpha: f32,
    pub dedup_window_sec: u64,
    pub dedup_cache_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            ctx_buffer_size: 256,
            decay_interval_sec: 3600,
            decay_alpha: 0.99,
            dedup_window_sec: 60,
            dedup_cache_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    Dot,
    L2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorsConfig {
    pub default_dimension: usize,
    pub distance_metric: DistanceMetric,
}

impl Default for VectorsConfig {
    fn default() -> Self {
        Self {
            default_dimension: 0,
            distance_metric: DistanceMetric::Cosine,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub fusion_alpha: f32,
    pub fusion_beta: f32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_top_k: 100,
            fusion_alpha: 0.5,
            fusion_beta: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub dir: String,
    pub default_filename: String,
    pub interval_sec: u64,
    pub retain: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: "./snapshots".to_string(),
            default_filename: "nvecd.dmp".to_string(),
            interval_sec: 0,
            retain: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfConfig {
    pub thread_pool_size: usize,
    pub max_connections: usize,
    pub connection_timeout_sec: u64,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 0,
            max_connections: 1024,
            connection_timeout_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7999,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub tcp: TcpConfig,
    pub max_query_length: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            tcp: TcpConfig::default(),
            max_query_length: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub allow_cidrs: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allow_cidrs: vec!["127.0.0.1/32".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_memory_bytes: u64,
    pub min_query_cost_ms: f64,
    pub ttl_seconds: u64,
    pub compression_enabled: bool,
    pub eviction_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memory_bytes: 64 * 1024 * 1024,
            min_query_cost_ms: 0.0,
            ttl_seconds: 0,
            compression_enabled: true,
            eviction_batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub vectors: VectorsConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub perf: PerfConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Validates the inline bounds from the external-interfaces section.
    /// Returns the first violation found rather than accumulating all of them.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.events.decay_alpha) {
            return Err(Error::ConfigValidationError(format!(
                "events.decay_alpha must be in [0, 1], got {}",
                self.events.decay_alpha
            )));
        }
        if self.similarity.max_top_k < self.similarity.default_top_k {
            return Err(Error::ConfigValidationError(format!(
                "similarity.max_top_k ({}) must be >= similarity.default_top_k ({})",
                self.similarity.max_top_k, self.similarity.default_top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity.fusion_alpha) {
            return Err(Error::ConfigValidationError(
                "similarity.fusion_alpha must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity.fusion_beta) {
            return Err(Error::ConfigValidationError(
                "similarity.fusion_beta must be in [0, 1]".to_string(),
            ));
        }
        if self.api.tcp.port == 0 {
            return Err(Error::ConfigValidationError(
                "api.tcp.port must be in 1..=65535".to_string(),
            ));
        }
        if self.api.max_query_length == 0 {
            return Err(Error::ConfigValidationError(
                "api.max_query_length must be > 0".to_string(),
            ));
        }
        if self.cache.max_memory_bytes == 0 {
            return Err(Error::ConfigValidationError(
                "cache.max_memory_bytes must be > 0".to_string(),
            ));
        }
        if self.cache.min_query_cost_ms < 0.0 {
            return Err(Error::ConfigValidationError(
                "cache.min_query_cost_ms must be >= 0".to_string(),
            ));
        }
        if self.cache.eviction_batch_size == 0 {
            return Err(Error::ConfigValidationError(
                "cache.eviction_batch_size must be >= 1".to_string(),
            ));
        }
        for cidr in &self.network.allow_cidrs {
            if cidr.parse::<ipnet::IpNet>().is_err() {
                log::warn!("invalid CIDR entry in network.allow_cidrs: {cidr}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_decay_alpha() {
        let mut cfg = Config::default();
        cfg.events.decay_alpha = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_max_top_k_below_default() {
        let mut cfg = Config::default();
        cfg.similarity.max_top_k = 1;
        cfg.similarity.default_top_k = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_cache_memory_budget() {
        let mut cfg = Config::default();
        cfg.cache.max_memory_bytes = 0;
        assert!(cfg.validate().is_err());
    }
}
