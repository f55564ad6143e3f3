//! Reentrant callbacks: a worker asks the orchestrator to evaluate another call.

use crate::codec::generics::{reference, Z_CALL};
use crate::config::types::{EvaluatorError, Result};
use crate::core::bridge::text_of;
use crate::core::orchestrator::Orchestrator;
use crate::envelope::error_envelope;
use crate::worker::CALL_PREFIX;
use crossbeam_channel::{Receiver, Sender};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Nested reentrant evaluations deeper than this are answered with an error.
pub const MAX_REENTRANT_DEPTH: usize = 8;

/// Side channel a bridge relays `call` lines over.
pub trait ReentrantChannel: Send {
    /// Hand over one `call {...}` line, exactly as the worker wrote it.
    fn forward(&mut self, line: &str) -> Result<()>;

    /// Replies to forwarded calls, one line each, in the order they become available.
    fn replies(&self) -> Receiver<String>;
}

/// Looks up function objects by id; the object repository is out of scope.
pub trait FunctionResolver: Send + Sync {
    fn resolve(&self, function_id: &str) -> Option<Json>;
}

/// In-memory function definitions.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    functions: HashMap<String, Json>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, function_id: &str, function: Json) -> Self {
        self.insert(function_id, function);
        self
    }

    pub fn insert(&mut self, function_id: &str, function: Json) {
        self.functions.insert(function_id.to_string(), function);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// A JSON object mapping function ids to function (`Z8`) objects.
    pub fn from_json(content: &str) -> Result<Self> {
        let definitions: Map<String, Json> = serde_json::from_str(content)
            .map_err(|e| EvaluatorError::Config(format!("Invalid function definitions: {}", e)))?;
        Ok(Self {
            functions: definitions.into_iter().collect(),
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl FunctionResolver for StaticResolver {
    fn resolve(&self, function_id: &str) -> Option<Json> {
        self.functions.get(function_id).cloned()
    }
}

/// A reentrant channel whose remote side is the orchestrator itself: every
/// forwarded call is evaluated on a fresh orchestration and its envelope sent
/// back as the reply.
pub struct LoopbackChannel {
    orchestrator: Orchestrator,
    resolver: Arc<dyn FunctionResolver>,
    depth: usize,
    replies_tx: Sender<String>,
    replies_rx: Receiver<String>,
}

impl LoopbackChannel {
    pub fn new(orchestrator: Orchestrator, resolver: Arc<dyn FunctionResolver>) -> Self {
        Self::at_depth(orchestrator, resolver, 0)
    }

    fn at_depth(
        orchestrator: Orchestrator,
        resolver: Arc<dyn FunctionResolver>,
        depth: usize,
    ) -> Self {
        let (replies_tx, replies_rx) = crossbeam_channel::unbounded();
        Self {
            orchestrator,
            resolver,
            depth,
            replies_tx,
            replies_rx,
        }
    }

    /// Channel for calls made by the evaluation this channel starts.
    fn nested(&self) -> Self {
        Self::at_depth(
            self.orchestrator.clone(),
            Arc::clone(&self.resolver),
            self.depth + 1,
        )
    }

    /// Turn a worker's `{Z1K1: Z7, Z7K1: <id>, ...}` into a full call by
    /// resolving the function id. Inline function objects are kept as given.
    pub fn expand_call(&self, request: &Json) -> Result<Json> {
        let fields = request.as_object().ok_or_else(|| {
            EvaluatorError::RequestShape(
                "Reentrant call is not a function call object.".to_string(),
            )
        })?;
        let target = fields.get("Z7K1").ok_or_else(|| {
            EvaluatorError::RequestShape("Reentrant call does not name a function.".to_string())
        })?;

        let function = if target.is_object() && target.get("Z9K1").is_none() {
            target.clone()
        } else {
            let function_id = text_of(target).ok_or_else(|| {
                EvaluatorError::RequestShape(format!("Unusable function reference {}.", target))
            })?;
            self.resolver.resolve(&function_id).ok_or_else(|| {
                EvaluatorError::Resolution(format!("Unable to resolve function {}.", function_id))
            })?
        };

        let mut call = fields.clone();
        call.insert("Z1K1".to_string(), reference(Z_CALL));
        call.insert("Z7K1".to_string(), function);
        Ok(Json::Object(call))
    }

    fn prepare(&self, line: &str) -> Result<Json> {
        if self.depth >= MAX_REENTRANT_DEPTH {
            return Err(EvaluatorError::Process(format!(
                "Reentrant calls nested deeper than {} levels.",
                MAX_REENTRANT_DEPTH
            )));
        }
        let body = line.trim().strip_prefix(CALL_PREFIX.trim_end()).unwrap_or(line);
        let request: Json = serde_json::from_str(body.trim()).map_err(|e| {
            EvaluatorError::RequestShape(format!("Malformed reentrant call: {}", e))
        })?;
        self.expand_call(&request)
    }
}

impl ReentrantChannel for LoopbackChannel {
    fn forward(&mut self, line: &str) -> Result<()> {
        let reply_to = self.replies_tx.clone();
        let call = match self.prepare(line) {
            Ok(call) => call,
            Err(err) => {
                log::info!("rejected reentrant call: {}", err);
                let _ = reply_to.send(error_envelope(&err).to_string());
                return Ok(());
            }
        };

        let orchestrator = self.orchestrator.clone();
        let nested = self.nested();
        thread::Builder::new()
            .name(format!("reentrant-{}", self.depth + 1))
            .spawn(move || {
                let envelope = orchestrator.evaluate(&call, Some(Box::new(nested)));
                if reply_to.send(envelope.to_string()).is_err() {
                    log::debug!("reentrant reply dropped: caller already finished");
                }
            })
            .map_err(|e| {
                EvaluatorError::Process(format!("could not start reentrant evaluation: {}", e))
            })?;
        Ok(())
    }

    fn replies(&self) -> Receiver<String> {
        self.replies_rx.clone()
    }
}
