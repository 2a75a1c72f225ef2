//! Pipeline settings.
//!
//! Stored as a JSON object on disk; every field is optional:
//! ```json
//! {
//!   "batch_size": 500,
//!   "concurrency": 8,
//!   "state_dir": "state",
//!   "output_dir": "out",
//!   "dashboard_url": "http://localhost:3000"
//! }
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// `None` numbers batches after the highest id already committed.
    pub first_batch_id: Option<u64>,
    /// `None` keeps state in memory for the life of the process.
    pub state_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub dashboard_url: Option<String>,
    pub log_emissions: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            concurrency: 8,
            max_retries: 3,
            retry_backoff_ms: 200,
            first_batch_id: None,
            state_dir: None,
            output_dir: None,
            dashboard_url: None,
            log_emissions: false,
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("cannot read config {path}"))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("invalid config {path}"))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"batch_size": 50, "state_dir": "state"}"#).unwrap();

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.state_dir, Some(PathBuf::from("state")));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.first_batch_id, None);
    }

    #[test]
    fn test_explicit_first_batch_id() {
        let config: PipelineConfig = serde_json::from_str(r#"{"first_batch_id": 40}"#).unwrap();
        assert_eq!(config.first_batch_id, Some(40));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<PipelineConfig, _> = serde_json::from_str(r#"{"batchsize": 50}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(PipelineConfig::load("/nonexistent/taxi_stream.json").is_err());
    }
}
