//! Orchestration/Reentrancy Bridge
//!
//! Drives one function call against one worker process: writes the request,
//! relays reentrant `call` lines to an attached channel and the channel's
//! replies back to the worker, collects the final payload, and attaches
//! timing and resource metadata. Timeouts belong to the caller
//! ([`crate::core::orchestrator`]).

use crate::codec::generics::{list_items, string_literal};
use crate::config::presets::LanguageRegistry;
use crate::config::types::{EvaluatorError, ExecutorSpec, Result};
use crate::core::process::ExecutorProcess;
use crate::core::reentrant::ReentrantChannel;
use crate::core::types::{BridgeOutcome, Implementation, StreamEvent};
use crate::core::usage::{self, ResourceSample};
use crate::envelope::{error_envelope, parse_envelope, set_metadata_value};
use crate::worker::{FunctionCallRequest, CALL_PREFIX, END_SIGNAL};
use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam_channel::{select, Sender};
use serde_json::{Map, Value as Json};
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const START_TIME_KEY: &str = "evaluationStartTime";
pub const END_TIME_KEY: &str = "evaluationEndTime";
pub const DURATION_KEY: &str = "evaluationDuration";
pub const CPU_USAGE_KEY: &str = "evaluationCpuUsage";
pub const MEMORY_USAGE_KEY: &str = "evaluationMemoryUsage";
pub const HOSTNAME_KEY: &str = "evaluationHostname";
pub const EXECUTION_CPU_USAGE_KEY: &str = "executionCpuUsage";
pub const EXECUTION_MEMORY_USAGE_KEY: &str = "executionMemoryUsage";

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> EvaluatorError {
    EvaluatorError::Process(format!("{prefix}: {err}"))
}

/// A bare string, a `Z6` literal or a `Z9` reference, as text.
pub(crate) fn text_of(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Object(object) => object
            .get("Z6K1")
            .or_else(|| object.get("Z9K1"))
            .and_then(Json::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn language_not_found() -> EvaluatorError {
    EvaluatorError::Resolution(
        "Unable to find programming language in function call.".to_string(),
    )
}

/// The called function object (`Z7K1`), when it is given inline.
fn function_of(call: &Json) -> Option<&Json> {
    call.get("Z7K1").filter(|function| function.is_object())
}

/// `Z8K4`, as a typed list, a legacy list, or a canonical array whose first
/// element is the item type.
fn implementations(function: &Json) -> Vec<&Json> {
    match function.get("Z8K4") {
        Some(Json::Array(items)) => {
            let skip = usize::from(items.first().is_some_and(Json::is_string));
            items.iter().skip(skip).collect()
        }
        Some(list) => list_items(list).unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Language and code of the call's first implementation.
pub fn read_implementation(call: &Json) -> Result<Implementation> {
    let function = function_of(call).ok_or_else(language_not_found)?;
    let code = implementations(function)
        .first()
        .and_then(|implementation| implementation.get("Z14K3"))
        .ok_or_else(language_not_found)?;
    let language = code
        .get("Z16K1")
        .and_then(|language| {
            language
                .get("Z61K1")
                .and_then(text_of)
                .or_else(|| text_of(language))
        })
        .filter(|language| !language.is_empty())
        .ok_or_else(language_not_found)?;

    Ok(Implementation {
        language,
        code: code.get("Z16K2").and_then(text_of),
    })
}

/// Worker-protocol request for `call`: its code, the function's identity as
/// name, every field but the type tags as arguments.
pub fn build_request(call: &Json, implementation: &Implementation) -> FunctionCallRequest {
    let function = function_of(call);
    let function_arguments: Map<String, Json> = call
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, _)| key.as_str() != "Z1K1" && key.as_str() != "Z7K1")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    FunctionCallRequest {
        function_name: function.and_then(|f| f.get("Z8K5")).and_then(text_of),
        code_string: implementation.code.clone(),
        function_arguments,
        return_type: function.and_then(|f| f.get("Z8K2")).cloned(),
    }
}

fn is_call_line(line: &str) -> bool {
    line.trim_start().starts_with(CALL_PREFIX)
}

fn is_end_line(line: &str) -> bool {
    line.trim() == END_SIGNAL
}

fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    events: Sender<StreamEvent>,
    on_line: fn(String) -> StreamEvent,
    on_close: StreamEvent,
) {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => {
                    if events.send(on_line(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::debug!("stopped reading worker stream: {}", e);
                    break;
                }
            }
        }
        let _ = events.send(on_close);
    });
}

fn sample_worker(process: &ExecutorProcess) -> Option<ResourceSample> {
    match usage::sample_process(process.pid()) {
        Ok(sample) => Some(sample),
        Err(e) => {
            log::warn!("could not sample pid {}: {}", process.pid(), e);
            None
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Registry lookup plus the per-call exchange with a worker.
#[derive(Debug, Clone)]
pub struct Bridge {
    registry: Arc<LanguageRegistry>,
}

impl Bridge {
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Implementation of `call` and the executor registered for its language.
    pub fn resolve_executor(&self, call: &Json) -> Result<(Implementation, &ExecutorSpec)> {
        let implementation = read_implementation(call)?;
        let spec = self
            .registry
            .lookup(&implementation.language)
            .ok_or_else(|| {
                EvaluatorError::Resolution(format!(
                    "No executor found for programming language {}.",
                    implementation.language
                ))
            })?;
        if let Some(missing) = spec.missing_files().first() {
            return Err(EvaluatorError::Resolution(format!(
                "Executor for programming language {} is not installed: {} not found.",
                implementation.language, missing
            )));
        }
        Ok((implementation, spec))
    }

    /// Start a worker for `call`. Resolution errors leave no process behind.
    pub fn spawn_for(&self, call: &Json) -> Result<ExecutorProcess> {
        let (implementation, spec) = self.resolve_executor(call)?;
        let process = ExecutorProcess::spawn(&implementation.language, spec)?;
        log::info!(
            "spawned {} executor (pid {})",
            implementation.language,
            process.pid()
        );
        Ok(process)
    }

    /// Evaluate `call` on `process`, spawning one when none is supplied.
    ///
    /// Never fails: every error ends up in the envelope. The process (if any)
    /// is returned so the caller can terminate it.
    pub fn run(
        &self,
        call: &Json,
        process: Option<Arc<ExecutorProcess>>,
        channel: Option<&mut dyn ReentrantChannel>,
    ) -> BridgeOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        let cpu_before = usage::self_cpu_time()
            .map_err(|e| log::warn!("could not read orchestrator CPU time: {}", e))
            .ok();

        let process = match process {
            Some(process) => Ok(process),
            None => self.spawn_for(call).map(Arc::new),
        };

        let mut worker_usage = None;
        let (process, result) = match process {
            Ok(process) => {
                let result = self.exchange(call, &process, channel, &mut worker_usage);
                (Some(process), result)
            }
            Err(err) => (None, Err(err)),
        };

        let mut envelope = result.unwrap_or_else(|err| {
            log::info!("function call failed: {}", err);
            error_envelope(&err)
        });
        attach_metadata(
            &mut envelope,
            started_at,
            clock.elapsed(),
            cpu_before,
            worker_usage,
        );
        BridgeOutcome { envelope, process }
    }

    fn exchange(
        &self,
        call: &Json,
        process: &ExecutorProcess,
        mut channel: Option<&mut dyn ReentrantChannel>,
        worker_usage: &mut Option<ResourceSample>,
    ) -> Result<Json> {
        let implementation = read_implementation(call)?;
        let request = serde_json::to_string(&build_request(call, &implementation))
            .map_err(|e| to_process_error("could not encode request", e))?;

        let (stdout, stderr) = match (process.take_stdout(), process.take_stderr()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(EvaluatorError::Process(format!(
                    "output of pid {} is already being read",
                    process.pid()
                )))
            }
        };
        let (events_tx, events) = crossbeam_channel::unbounded();
        spawn_line_reader(
            stdout,
            events_tx.clone(),
            StreamEvent::Stdout,
            StreamEvent::StdoutClosed,
        );
        spawn_line_reader(
            stderr,
            events_tx,
            StreamEvent::Stderr,
            StreamEvent::StderrClosed,
        );

        if let Err(e) = process.write_line(&request) {
            log::warn!("could not write request to pid {}: {}", process.pid(), e);
        }

        let replies = channel
            .as_ref()
            .map(|channel| channel.replies())
            .unwrap_or_else(crossbeam_channel::never);
        let mut payload: Vec<String> = Vec::new();

        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(StreamEvent::Stdout(line)) => {
                        if is_call_line(&line) {
                            let Some(channel) = channel.as_mut() else {
                                process.terminate();
                                return Err(EvaluatorError::Process(
                                    "Non-reentrant executor tried to call back.".to_string(),
                                ));
                            };
                            log::info!("relaying reentrant call from pid {}", process.pid());
                            channel.forward(line.trim())?;
                        } else if !line.trim().is_empty() {
                            payload.push(line);
                        }
                    }
                    Ok(StreamEvent::Stderr(line)) => {
                        if is_end_line(&line) {
                            if worker_usage.is_none() {
                                *worker_usage = sample_worker(process);
                            }
                            process.close_stdin();
                        } else {
                            log::info!("[{} pid {}] {}", process.language(), process.pid(), line);
                        }
                    }
                    Ok(StreamEvent::StderrClosed) => {}
                    Ok(StreamEvent::StdoutClosed) | Err(_) => break,
                },
                recv(replies) -> reply => {
                    if let Ok(reply) = reply {
                        log::debug!("returning reentrant reply to pid {}", process.pid());
                        if let Err(e) = process.write_line(reply.trim_end()) {
                            log::warn!("could not deliver reply to pid {}: {}", process.pid(), e);
                        }
                    }
                },
            }
        }

        if worker_usage.is_none() {
            *worker_usage = sample_worker(process);
        }
        parse_envelope(&payload.join("\n"))
    }
}

fn attach_metadata(
    envelope: &mut Json,
    started_at: DateTime<Utc>,
    elapsed: Duration,
    cpu_before: Option<Duration>,
    worker: Option<ResourceSample>,
) {
    let mut entries = vec![
        (START_TIME_KEY, timestamp(started_at)),
        (END_TIME_KEY, timestamp(Utc::now())),
        (DURATION_KEY, usage::format_millis(elapsed)),
    ];
    match usage::sample_self() {
        Ok(now) => {
            if let Some(before) = cpu_before {
                let cpu = now.cpu.saturating_sub(before);
                entries.push((CPU_USAGE_KEY, usage::format_millis(cpu)));
            }
            entries.push((MEMORY_USAGE_KEY, usage::format_mebibytes(now.rss_bytes)));
        }
        Err(e) => log::warn!("could not sample orchestrator usage: {}", e),
    }
    entries.push((HOSTNAME_KEY, usage::hostname()));
    if let Some(worker) = worker {
        entries.push((EXECUTION_CPU_USAGE_KEY, usage::format_millis(worker.cpu)));
        entries.push((
            EXECUTION_MEMORY_USAGE_KEY,
            usage::format_mebibytes(worker.rss_bytes),
        ));
    }

    log::debug!("evaluation metadata: {:?}", entries);
    for (key, value) in entries {
        set_metadata_value(envelope, key, string_literal(&value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::generics::reference;
    use crate::envelope::{error_code, error_message, get_metadata_value, get_value};
    use serde_json::json;

    fn call_with(code_object: Json) -> Json {
        json!({
            "Z1K1": reference("Z7"),
            "Z7K1": {
                "Z1K1": reference("Z8"),
                "Z8K2": reference("Z6"),
                "Z8K4": ["Z14", {"Z1K1": "Z14", "Z14K3": code_object}],
                "Z8K5": reference("Z1000"),
            },
            "Z1000K1": string_literal("2"),
        })
    }

    #[test]
    fn reads_language_in_every_accepted_shape() {
        let shapes = [
            json!({"Z1K1": "Z61", "Z61K1": string_literal("javascript")}),
            json!({"Z1K1": "Z61", "Z61K1": "javascript"}),
            json!("javascript"),
            string_literal("javascript"),
        ];
        for language in shapes {
            let call = call_with(json!({"Z1K1": "Z16", "Z16K1": language, "Z16K2": "code"}));
            let implementation = read_implementation(&call).unwrap();
            assert_eq!(implementation.language, "javascript");
            assert_eq!(implementation.code.as_deref(), Some("code"));
        }
    }

    #[test]
    fn reads_typed_implementation_lists() {
        let code = json!({"Z1K1": "Z16", "Z16K1": "Z600", "Z16K2": string_literal("x")});
        let mut call = call_with(code.clone());
        call["Z7K1"]["Z8K4"] = json!({
            "Z1K1": reference("Z881"),
            "K1": {"Z1K1": "Z14", "Z14K3": code},
            "K2": {"Z1K1": reference("Z881")},
        });
        assert_eq!(read_implementation(&call).unwrap().language, "Z600");
    }

    #[test]
    fn missing_language_is_a_resolution_error() {
        let err = read_implementation(&json!({"Z1K1": "Z7", "Z7K1": "Z1000"})).unwrap_err();
        assert_eq!(err.to_string(), "Unable to find programming language in function call.");
        assert_eq!(err.error_code(), "Z558");

        let no_language = call_with(json!({"Z1K1": "Z16", "Z16K2": "code"}));
        assert!(read_implementation(&no_language).is_err());
    }

    #[test]
    fn builds_worker_request() {
        let call = call_with(json!({
            "Z1K1": "Z16",
            "Z16K1": "zscript",
            "Z16K2": "function Z1000(a) { return a; }",
        }));
        let implementation = read_implementation(&call).unwrap();
        let request = build_request(&call, &implementation);

        assert_eq!(request.function_name.as_deref(), Some("Z1000"));
        assert_eq!(request.code_string, implementation.code);
        assert_eq!(request.return_type, Some(reference("Z6")));
        assert_eq!(request.function_arguments.len(), 1);
        assert_eq!(request.function_arguments["Z1000K1"], string_literal("2"));
    }

    #[test]
    fn unknown_language_never_spawns() {
        let bridge = Bridge::new(Arc::new(LanguageRegistry::empty()));
        let call = call_with(json!({"Z1K1": "Z16", "Z16K1": "cobol-85", "Z16K2": "x"}));
        let outcome = bridge.run(&call, None, None);

        assert!(outcome.process.is_none());
        assert!(get_value(&outcome.envelope).is_none());
        assert_eq!(error_code(&outcome.envelope).as_deref(), Some("Z558"));
        assert_eq!(
            error_message(&outcome.envelope),
            Some("No executor found for programming language cobol-85.")
        );
        assert!(get_metadata_value(&outcome.envelope, DURATION_KEY).is_some());
    }

    #[test]
    fn uninstalled_executor_is_a_resolution_error() {
        let registry = LanguageRegistry::empty().with(
            "javascript",
            ExecutorSpec::new("node", &["executors/nowhere/executor.js"]),
        );
        let bridge = Bridge::new(Arc::new(registry));
        let call = call_with(json!({"Z1K1": "Z16", "Z16K1": "javascript", "Z16K2": "x"}));
        let outcome = bridge.run(&call, None, None);

        assert!(outcome.process.is_none());
        assert_eq!(error_code(&outcome.envelope).as_deref(), Some("Z558"));
        assert_eq!(
            error_message(&outcome.envelope),
            Some(
                "Executor for programming language javascript is not installed: \
                 executors/nowhere/executor.js not found."
            )
        );
    }

    #[test]
    fn call_and_end_line_detection() {
        assert!(is_call_line("call {}"));
        assert!(is_call_line("  call {\"Z1K1\":\"Z7\"}"));
        assert!(!is_call_line("caller"));
        assert!(is_end_line(" end \n"));
        assert!(!is_end_line("ending"));
    }

    #[test]
    fn timestamps_are_rfc3339_with_millis() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(at), "2024-05-01T12:00:00.500Z");
    }
}
