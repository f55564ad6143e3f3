//! Orchestrator: one bridge run per call, raced against the timeout.

use crate::config::presets::LanguageRegistry;
use crate::config::types::{EvaluatorConfig, EvaluatorError};
use crate::core::bridge::Bridge;
use crate::core::reentrant::ReentrantChannel;
use crate::envelope::error_envelope;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// First claimant wins the right to respond; everyone after it is suppressed.
#[derive(Debug, Default)]
pub struct ResponseGuard {
    responded: AtomicBool,
}

impl ResponseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> bool {
        self.responded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }
}

/// Evaluates function calls. Cheap to clone; the registry is shared read-only.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    bridge: Arc<Bridge>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(registry: Arc<LanguageRegistry>, timeout: Duration) -> Self {
        Self {
            bridge: Arc::new(Bridge::new(registry)),
            timeout,
        }
    }

    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self::new(
            Arc::new(LanguageRegistry::from_config(config)),
            config.timeout(),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Evaluate `call` to a result envelope.
    ///
    /// The worker is spawned here so this side holds its handle: it is
    /// terminated exactly once after the response is decided, whether the
    /// bridge finished or the timeout fired first.
    pub fn evaluate(&self, call: &Json, channel: Option<Box<dyn ReentrantChannel>>) -> Json {
        let call_id = Uuid::new_v4();
        let started = Instant::now();
        log::info!("[{}] evaluating function call", call_id);

        let process = match self.bridge.spawn_for(call) {
            Ok(process) => Arc::new(process),
            Err(err) => {
                log::info!("[{}] rejected before spawn: {}", call_id, err);
                return error_envelope(&err);
            }
        };

        let guard = Arc::new(ResponseGuard::new());
        let (tx, rx) = crossbeam_channel::bounded(1);
        let spawned = {
            let bridge = Arc::clone(&self.bridge);
            let guard = Arc::clone(&guard);
            let worker = Arc::clone(&process);
            let call = call.clone();
            thread::Builder::new()
                .name(format!("bridge-{}", call_id))
                .spawn(move || {
                    let mut channel = channel;
                    let channel_ref: Option<&mut dyn ReentrantChannel> = match channel.as_mut() {
                        Some(boxed) => Some(&mut **boxed),
                        None => None,
                    };
                    let outcome = bridge.run(&call, Some(worker), channel_ref);
                    if guard.claim() {
                        let _ = tx.send(outcome.envelope);
                    }
                })
        };
        if let Err(e) = spawned {
            process.terminate();
            return error_envelope(&EvaluatorError::Process(format!(
                "could not start bridge thread: {}",
                e
            )));
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        let remaining = self.timeout.saturating_sub(started.elapsed());
        let envelope = match rx.recv_timeout(remaining) {
            Ok(envelope) => envelope,
            Err(_) if guard.claim() => {
                log::warn!(
                    "[{}] timed out after {} ms, killing pid {}",
                    call_id,
                    timeout_ms,
                    process.pid()
                );
                error_envelope(&EvaluatorError::Timeout(timeout_ms))
            }
            // The bridge claimed the response just as the timer fired.
            Err(_) => rx
                .recv()
                .unwrap_or_else(|_| error_envelope(&EvaluatorError::Timeout(timeout_ms))),
        };

        if process.terminate() {
            log::debug!("[{}] terminated pid {}", call_id, process.pid());
        }
        log::info!(
            "[{}] finished in {} ms",
            call_id,
            started.elapsed().as_millis()
        );
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_admits_one_claimant() {
        let guard = Arc::new(ResponseGuard::new());
        assert!(!guard.is_claimed());

        let winners: usize = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || guard.claim())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
        assert!(guard.is_claimed());
    }

    #[test]
    fn from_config_uses_configured_timeout() {
        let config = EvaluatorConfig {
            timeout_ms: 250,
            ..EvaluatorConfig::default()
        };
        let orchestrator = Orchestrator::from_config(&config);
        assert_eq!(orchestrator.timeout(), Duration::from_millis(250));
        assert!(orchestrator.bridge().registry().has("zscript"));
    }

    #[test]
    fn pre_spawn_errors_are_returned_directly() {
        let orchestrator = Orchestrator::new(
            Arc::new(LanguageRegistry::empty()),
            Duration::from_secs(1),
        );
        let envelope = orchestrator.evaluate(&serde_json::json!({"Z1K1": "Z7"}), None);
        assert_eq!(
            crate::envelope::error_code(&envelope).as_deref(),
            Some("Z558")
        );
    }
}
