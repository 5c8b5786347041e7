use crate::spec::{connection::ConnectionDescriptor, mapping::TableMapping};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_CHUNK_SIZE: u64 = 100_000;
pub const DEFAULT_BATCH_SIZE: u32 = 5_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_FAILURE_THRESHOLD_PCT: u8 = 5;
pub const DEFAULT_MAX_CONCURRENT_WORKERS: u32 = 8;
pub const DEFAULT_JOB_PRIORITY: i32 = 100;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("job spec maps no tables")]
    NoTables,

    #[error("chunk_size must be positive")]
    ZeroChunkSize,

    #[error("batch_size must be positive")]
    ZeroBatchSize,

    #[error("failure_threshold_percent must be 1-100, got {0}")]
    BadFailureThreshold(u8),
}

/// Everything needed to create and plan one migration job. Deserialized
/// from the operator's YAML spec file; tuning fields fall back to the
/// engine-wide defaults when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub source: ConnectionDescriptor,
    pub target: ConnectionDescriptor,

    /// source table name -> mapping; empty mapping = identity.
    pub tables: BTreeMap<String, TableMapping>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold_percent: u8,
    #[serde(default = "default_max_concurrent_workers")]
    pub max_concurrent_workers: u32,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub drop_constraints: bool,
    #[serde(default = "default_validate")]
    pub validate: bool,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_failure_threshold() -> u8 {
    DEFAULT_FAILURE_THRESHOLD_PCT
}

fn default_max_concurrent_workers() -> u32 {
    DEFAULT_MAX_CONCURRENT_WORKERS
}

fn default_priority() -> i32 {
    DEFAULT_JOB_PRIORITY
}

fn default_validate() -> bool {
    true
}

impl JobSpec {
    pub fn validate_spec(&self) -> Result<(), SpecError> {
        if self.tables.is_empty() {
            return Err(SpecError::NoTables);
        }
        if self.chunk_size == 0 {
            return Err(SpecError::ZeroChunkSize);
        }
        if self.batch_size == 0 {
            return Err(SpecError::ZeroBatchSize);
        }
        if self.failure_threshold_percent == 0 || self.failure_threshold_percent > 100 {
            return Err(SpecError::BadFailureThreshold(self.failure_threshold_percent));
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::connection::Secret;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "localhost".into(),
            port: None,
            database: "db".into(),
            username: "u".into(),
            password: Secret::new("p"),
            tls: false,
            driver: None,
        }
    }

    #[test]
    fn defaults_apply_to_sparse_specs() {
        let spec = JobSpec {
            source: descriptor(),
            target: descriptor(),
            tables: BTreeMap::from([("users".to_string(), TableMapping::default())]),
            chunk_size: default_chunk_size(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            failure_threshold_percent: default_failure_threshold(),
            max_concurrent_workers: default_max_concurrent_workers(),
            priority: default_priority(),
            drop_constraints: false,
            validate: default_validate(),
        };
        assert!(spec.validate_spec().is_ok());
        assert_eq!(spec.chunk_size, 100_000);
        assert_eq!(spec.batch_size, 5_000);
    }

    #[test]
    fn empty_table_set_is_rejected() {
        let spec = JobSpec {
            source: descriptor(),
            target: descriptor(),
            tables: BTreeMap::new(),
            chunk_size: 1,
            batch_size: 1,
            max_retries: 3,
            failure_threshold_percent: 5,
            max_concurrent_workers: 8,
            priority: 100,
            drop_constraints: false,
            validate: true,
        };
        assert!(matches!(spec.validate_spec(), Err(SpecError::NoTables)));
    }
}
