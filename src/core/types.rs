use crate::core::process::ExecutorProcess;
use serde_json::Value as Json;
use std::sync::Arc;

/// Language and source text read from a function call's first implementation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Implementation {
    pub language: String,
    pub code: Option<String>,
}

/// What the bridge hands back: the envelope, plus the process it drove so the
/// caller can guarantee termination.
#[derive(Debug)]
pub struct BridgeOutcome {
    pub envelope: Json,
    pub process: Option<Arc<ExecutorProcess>>,
}

/// Lines from the worker's two output streams, merged into one queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Stdout(String),
    StdoutClosed,
    Stderr(String),
    StderrClosed,
}
