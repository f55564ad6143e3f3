//! # Function Evaluator
//!
//! Evaluates function calls expressed as ZObjects by running the function's
//! source code in an out-of-process language worker.
//!
//! ## Modules
//!
//! - [`codec`]: ZObject <-> native value conversion, type inference
//! - [`envelope`]: `Z22` result envelopes, metadata maps, `Z5` errors
//! - [`config`]: Evaluator configuration and the language registry
//! - [`core`]: Worker processes, the bridge, reentrant calls, orchestration
//! - [`worker`]: The worker side of the line protocol, plus the ZScript runtime
//! - [`cli`]: Entrypoint wiring for the `evaluator` and `zscript-worker` binaries
//!
//! ## Evaluation flow
//!
//! 1. The orchestrator reads the call's first implementation and picks an
//!    executor for its language.
//! 2. The worker is spawned and receives one JSON request on stdin.
//! 3. Worker lines starting with `call ` are relayed to a reentrant channel;
//!    every reply goes back to the worker on stdin.
//! 4. The first other stdout line is the result envelope. Metadata (timings,
//!    resource usage, host) is attached and the worker is killed.

pub mod cli;
pub mod codec;
pub mod config;
pub mod core;
pub mod envelope;
pub mod worker;

pub use config::types::{EvaluatorConfig, EvaluatorError, Result};
pub use core::orchestrator::Orchestrator;
