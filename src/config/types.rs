/// Core types and the error taxonomy for the function evaluator
use crate::codec::CodecError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Default wall-clock budget for one function call.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Error type ids carried in the `Z5K1` slot of error envelopes.
///
/// Every [`EvaluatorError`] maps onto exactly one of these; see
/// [`EvaluatorError::error_code`].
pub mod error_codes {
    /// Request is not well-formed (missing name/code, malformed argument key).
    pub const NOT_WELLFORMED: &str = "Z502";
    /// Generic evaluation error (process, payload, execution, codec, timeout).
    pub const EVALUATION_ERROR: &str = "Z507";
    /// A global and a local key were both supplied for the same argument.
    pub const COMPETING_KEYS: &str = "Z508";
    /// No implementation language or no registered executor for it.
    pub const LANGUAGE_NOT_SUPPORTED: &str = "Z558";
}

/// Custom error types for the evaluator
#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing function name/code, malformed argument keys.
    #[error("{0}")]
    RequestShape(String),

    #[error("{0}")]
    CompetingKeys(String),

    /// Unrecognised language id, no registered executor.
    #[error("{0}")]
    Resolution(String),

    /// Spawn failure, unexpected exit, non-reentrant callback.
    #[error("{0}")]
    Process(String),

    /// Empty or non-parseable worker output.
    #[error("{0}")]
    Payload(String),

    /// The implementation itself failed.
    #[error("{0}")]
    Execution(String),

    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("Function evaluation timed out after {0} ms")]
    Timeout(u64),
}

impl EvaluatorError {
    /// Stable error type id reported to callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            EvaluatorError::RequestShape(_) => error_codes::NOT_WELLFORMED,
            EvaluatorError::CompetingKeys(_) => error_codes::COMPETING_KEYS,
            EvaluatorError::Resolution(_) => error_codes::LANGUAGE_NOT_SUPPORTED,
            EvaluatorError::Io(_)
            | EvaluatorError::Config(_)
            | EvaluatorError::Process(_)
            | EvaluatorError::Payload(_)
            | EvaluatorError::Execution(_)
            | EvaluatorError::Codec(_)
            | EvaluatorError::Timeout(_) => error_codes::EVALUATION_ERROR,
        }
    }

    /// Errors detected before any worker process exists.
    pub fn is_pre_spawn(&self) -> bool {
        matches!(
            self,
            EvaluatorError::RequestShape(_)
                | EvaluatorError::CompetingKeys(_)
                | EvaluatorError::Resolution(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EvaluatorError>;

/// How to launch the worker for one language id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    /// Executable name or path
    pub executable: String,
    /// Invocation arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides merged over the orchestrator's environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ExecutorSpec {
    pub fn new(executable: impl Into<String>, args: &[&str]) -> Self {
        Self {
            executable: executable.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Script paths among the arguments that do not exist on disk.
    ///
    /// Only single-token arguments containing a `/` count as paths, so inline
    /// shell snippets and flags are never flagged.
    pub fn missing_files(&self) -> Vec<&str> {
        self.args
            .iter()
            .map(String::as_str)
            .filter(|arg| {
                !arg.starts_with('-') && arg.contains('/') && !arg.contains(char::is_whitespace)
            })
            .filter(|arg| !std::path::Path::new(arg).exists())
            .collect()
    }
}

/// Orchestrator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Wall-clock budget per call, in milliseconds
    pub timeout_ms: u64,
    /// Language id -> executor overrides, merged over the built-in table
    pub executors: BTreeMap<String, ExecutorSpec>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            executors: BTreeMap::new(),
        }
    }
}

impl EvaluatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
