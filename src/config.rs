//! Flat, serde-deserialized configuration loaded from a TOML file with
//! environment-variable overrides.

use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::path::Path;

fn env_override<T: std::str::FromStr>(key: &str, current: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(current)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CzarConfig {
    pub listen_addr: String,
    pub max_transmits: u32,
    pub max_transmits_per_qid: u32,
    pub czar_stats_update_ival_sec: u64,
    pub seconds_between_qmeta_updates: u64,
    pub result_max_http_connections: usize,
    pub max_job_attempts: u8,
}

impl Default for CzarConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4040".to_string(),
            max_transmits: 40,
            max_transmits_per_qid: 10,
            czar_stats_update_ival_sec: 5,
            seconds_between_qmeta_updates: 5,
            result_max_http_connections: 8,
            max_job_attempts: crate::common::MAX_JOB_ATTEMPTS,
        }
    }
}

impl CzarConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg: Self = toml::from_str(&text).map_err(|e| CoreError::Configuration(e.to_string()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        self.listen_addr = std::env::var("MESHQUERY_CZAR_LISTEN_ADDR").unwrap_or_else(|_| self.listen_addr.clone());
        self.max_transmits = env_override("MESHQUERY_CZAR_MAX_TRANSMITS", self.max_transmits);
        self.max_transmits_per_qid = env_override("MESHQUERY_CZAR_MAX_TRANSMITS_PER_QID", self.max_transmits_per_qid);
        self.czar_stats_update_ival_sec = env_override("MESHQUERY_CZAR_STATS_IVAL_SEC", self.czar_stats_update_ival_sec);
        self.result_max_http_connections = env_override("MESHQUERY_CZAR_MAX_HTTP_CONNS", self.result_max_http_connections);
    }
}

/// One scan-rating band boundary, `[min, max)`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RatingBand {
    pub name_suffix: &'static str,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub listen_addr: String,
    pub worker_name: String,
    pub sched_max_threads: i32,
    pub max_active_chunks_per_band: usize,
    pub group_max_in_flight: i32,
    pub num_stripes: i32,
    pub num_sub_stripes: i32,
    pub overlap_deg: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5050".to_string(),
            worker_name: "worker1".to_string(),
            sched_max_threads: (num_cpus::get() as i32).max(4),
            max_active_chunks_per_band: 2,
            group_max_in_flight: 8,
            num_stripes: 18,
            num_sub_stripes: 100,
            overlap_deg: 0.01,
        }
    }
}

impl WorkerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg: Self = toml::from_str(&text).map_err(|e| CoreError::Configuration(e.to_string()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        self.listen_addr = std::env::var("MESHQUERY_WORKER_LISTEN_ADDR").unwrap_or_else(|_| self.listen_addr.clone());
        self.worker_name = std::env::var("MESHQUERY_WORKER_NAME").unwrap_or_else(|_| self.worker_name.clone());
        self.sched_max_threads = env_override("MESHQUERY_WORKER_SCHED_MAX_THREADS", self.sched_max_threads);
    }

    /// Default fast/medium/slow rating bands used to build the worker's
    /// `ScanScheduler` trio.
    pub fn default_rating_bands() -> [RatingBand; 3] {
        [
            RatingBand { name_suffix: "fast", min: 0, max: 100 },
            RatingBand { name_suffix: "medium", min: 100, max: 1000 },
            RatingBand { name_suffix: "slow", min: 1000, max: i32::MAX },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn czar_config_defaults_are_sane() {
        let cfg = CzarConfig::default();
        assert_eq!(cfg.max_job_attempts, crate::common::MAX_JOB_ATTEMPTS);
        assert!(cfg.max_transmits_per_qid <= cfg.max_transmits);
    }

    #[test]
    fn worker_config_rating_bands_cover_all_ratings() {
        let bands = WorkerConfig::default_rating_bands();
        assert_eq!(bands[0].min, 0);
        assert_eq!(bands[2].max, i32::MAX);
        assert_eq!(bands[0].max, bands[1].min);
        assert_eq!(bands[1].max, bands[2].min);
    }
}
