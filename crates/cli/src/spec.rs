use engine::EngineConfig;
use model::spec::{
    connection::ConnectionDescriptor,
    job::{DEFAULT_JOB_PRIORITY, DEFAULT_MAX_CONCURRENT_WORKERS, JobSpec},
    mapping::TableMapping,
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// The YAML job-spec file as written by operators. Tuning fields are
/// optional; anything omitted falls back to the engine's environment
/// configuration.
#[derive(Debug, Deserialize)]
pub struct JobSpecFile {
    pub source: ConnectionDescriptor,
    pub target: ConnectionDescriptor,
    #[serde(default)]
    pub tables: BTreeMap<String, TableMapping>,
    pub chunk_size: Option<u64>,
    pub batch_size: Option<u32>,
    pub max_retries: Option<u32>,
    pub failure_threshold_percent: Option<u8>,
    pub max_concurrent_workers: Option<u32>,
    pub priority: Option<i32>,
    pub drop_constraints: Option<bool>,
    pub validate: Option<bool>,
}

impl JobSpecFile {
    pub fn resolve(self, config: &EngineConfig) -> JobSpec {
        JobSpec {
            source: self.source,
            target: self.target,
            tables: self.tables,
            chunk_size: self.chunk_size.unwrap_or(config.chunk_size),
            batch_size: self.batch_size.unwrap_or(config.batch_size),
            max_retries: self.max_retries.unwrap_or(config.max_retries),
            failure_threshold_percent: self
                .failure_threshold_percent
                .unwrap_or(config.failure_threshold_percent),
            max_concurrent_workers: self
                .max_concurrent_workers
                .unwrap_or(DEFAULT_MAX_CONCURRENT_WORKERS),
            priority: self.priority.unwrap_or(DEFAULT_JOB_PRIORITY),
            drop_constraints: self.drop_constraints.unwrap_or(false),
            validate: self.validate.unwrap_or(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_SPEC: &str = r#"
source:
  host: src.internal
  database: app
  username: migrator
  password: s3cret
  driver: mysql
target:
  host: tgt.internal
  database: app
  username: migrator
  password: s3cret
  driver: postgres
tables:
  users:
    target_table: customers
    column_mapping:
      email: email_address
    transforms:
      name: "UPPER(name)"
  orders: {}
"#;

    #[test]
    fn minimal_spec_takes_engine_defaults() {
        let file: JobSpecFile = serde_yaml::from_str(MINIMAL_SPEC).unwrap();
        let spec = file.resolve(&EngineConfig::default());
        assert_eq!(spec.chunk_size, 100_000);
        assert_eq!(spec.batch_size, 5_000);
        assert_eq!(spec.max_retries, 3);
        assert_eq!(spec.failure_threshold_percent, 5);
        assert!(spec.validate);
        assert!(!spec.drop_constraints);
        assert!(spec.validate_spec().is_ok());

        let users = spec.tables.get("users").unwrap();
        assert_eq!(users.target_table_or("users"), "customers");
        assert_eq!(users.target_column("email"), "email_address");
        assert_eq!(users.transform_for("name"), Some("UPPER(name)"));
        assert!(spec.tables.contains_key("orders"));
    }

    #[test]
    fn explicit_tuning_wins_over_defaults() {
        let raw = format!("{MINIMAL_SPEC}\nchunk_size: 1000\nbatch_size: 250\n");
        let file: JobSpecFile = serde_yaml::from_str(&raw).unwrap();
        let spec = file.resolve(&EngineConfig::default());
        assert_eq!(spec.chunk_size, 1_000);
        assert_eq!(spec.batch_size, 250);
    }
}
