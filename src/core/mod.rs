//! Orchestration core.
//!
//! Owns the executor process model, the bridge that drives one call against
//! one worker, reentrant callback relaying, timeout racing, and resource
//! accounting. Language-specific execution lives in the workers.

pub mod bridge;
pub mod orchestrator;
pub mod process;
pub mod reentrant;
pub mod types;
pub mod usage;
