use std::{str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value for {key}: {value}")]
pub struct ConfigError {
    key: &'static str,
    value: String,
}

/// The engine's recognized configuration surface. Every knob comes from
/// this closed set of environment variables, parsed once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relational catalog URL; unset selects the embedded store.
    pub metadata_db_url: Option<String>,
    pub chunk_size: u64,
    pub batch_size: u32,
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    pub liveness_threshold: Duration,
    pub failure_threshold_percent: u8,
    pub log_level: String,

    // Fixed operational defaults, overridable in code but not env.
    pub reap_interval: Duration,
    pub supervisor_interval: Duration,
    pub chunk_hard_timeout: Duration,
    pub min_chunks_for_failure_rate: u64,
    pub target_insert_latency_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata_db_url: None,
            chunk_size: 100_000,
            batch_size: 5_000,
            max_retries: 3,
            heartbeat_interval: Duration::from_secs(10),
            liveness_threshold: Duration::from_secs(120),
            failure_threshold_percent: 5,
            log_level: "INFO".to_string(),
            reap_interval: Duration::from_secs(30),
            supervisor_interval: Duration::from_secs(10),
            chunk_hard_timeout: Duration::from_secs(3600),
            min_chunks_for_failure_rate: 20,
            target_insert_latency_ms: 200.0,
        }
    }
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError {
            key,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            metadata_db_url: std::env::var("METADATA_DB_URL").ok().filter(|v| !v.is_empty()),
            chunk_size: env_parse("MIGRATION_CHUNK_SIZE", defaults.chunk_size)?,
            batch_size: env_parse("MIGRATION_BATCH_SIZE", defaults.batch_size)?,
            max_retries: env_parse("MIGRATION_MAX_RETRIES", defaults.max_retries)?,
            heartbeat_interval: Duration::from_secs(env_parse(
                "MIGRATION_HEARTBEAT_INTERVAL_S",
                defaults.heartbeat_interval.as_secs(),
            )?),
            liveness_threshold: Duration::from_secs(env_parse(
                "MIGRATION_LIVENESS_THRESHOLD_S",
                defaults.liveness_threshold.as_secs(),
            )?),
            failure_threshold_percent: env_parse(
                "MIGRATION_FAILURE_THRESHOLD_PCT",
                defaults.failure_threshold_percent,
            )?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 100_000);
        assert_eq!(config.batch_size, 5_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.liveness_threshold, Duration::from_secs(120));
        assert_eq!(config.failure_threshold_percent, 5);
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn env_overrides_are_parsed() {
        // Env mutation is process-global; scope it to one test.
        unsafe {
            std::env::set_var("MIGRATION_CHUNK_SIZE", "2500");
            std::env::set_var("MIGRATION_HEARTBEAT_INTERVAL_S", "3");
        }
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.chunk_size, 2_500);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(3));
        unsafe {
            std::env::remove_var("MIGRATION_CHUNK_SIZE");
            std::env::remove_var("MIGRATION_HEARTBEAT_INTERVAL_S");
        }
    }
}
