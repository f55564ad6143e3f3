use crate::config::types::{EvaluatorConfig, EvaluatorError, Result};
/// Configuration loading from a JSON file and the environment
use std::path::Path;

/// Environment variable overriding [`EvaluatorConfig::timeout_ms`].
pub const TIMEOUT_ENV_VAR: &str = "FUNCTION_EVALUATOR_TIMEOUT_MS";

impl EvaluatorConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| EvaluatorError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json(&config_content)
    }

    /// Parse configuration from JSON text; absent fields take their defaults
    pub fn from_json(content: &str) -> Result<Self> {
        let config: EvaluatorConfig = serde_json::from_str(content)
            .map_err(|e| EvaluatorError::Config(format!("Failed to parse config JSON: {}", e)))?;

        if config.timeout_ms == 0 {
            return Err(EvaluatorError::Config(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    /// Apply `FUNCTION_EVALUATOR_TIMEOUT_MS` when it is set
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(TIMEOUT_ENV_VAR) {
            self.timeout_ms = parse_timeout(&raw)?;
        }
        Ok(self)
    }
}

fn parse_timeout(raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(EvaluatorError::Config(format!(
            "{} must be a positive integer, got {:?}",
            TIMEOUT_ENV_VAR, raw
        ))),
        Ok(ms) => Ok(ms),
    }
}
