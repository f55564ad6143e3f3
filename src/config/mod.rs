//! Configuration
//!
//! Error taxonomy, orchestrator configuration and the language capability table.

pub mod loader;
pub mod presets;
pub mod types;
