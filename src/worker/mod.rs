//! Worker Protocol Handler
//!
//! A worker process answers exactly one function-call request. It reads the
//! request line, binds and decodes arguments, runs the implementation through a
//! [`runtime::Runtime`], and writes one result envelope followed by `end` on the
//! diagnostics stream. Reentrant calls made by the implementation are written
//! as `call {...}` lines and answered on the same input stream.

pub mod runtime;
pub mod zscript;

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use crate::codec::generics::{reference, Z_ANY, Z_CALL, Z_UNIT};
use crate::codec::{Codec, Value};
use crate::config::types::{EvaluatorError, Result};
use crate::envelope::{self, error_envelope, make_result_envelope};
use runtime::{CallbackHost, Runtime};

/// Prefix of a reentrant call line on the worker's stdout.
pub const CALL_PREFIX: &str = "call ";

/// Line written to the diagnostics stream once no more input will be read.
pub const END_SIGNAL: &str = "end";

/// The message the orchestrator writes to a worker's stdin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_string: Option<String>,
    #[serde(default)]
    pub function_arguments: Map<String, Json>,
    /// Declared return type; the result is encoded against `Z1` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<Json>,
}

fn to_protocol_error(prefix: &str, err: impl std::fmt::Display) -> EvaluatorError {
    EvaluatorError::Process(format!("{prefix}: {err}"))
}

/// `K<n>` suffix -> n
fn key_index(suffix: &str) -> Option<u32> {
    let digits = suffix.strip_prefix('K')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Order the arguments of `function_name` by position.
///
/// Keys are either global (`<function_name>K<n>`) or local (`K<n>`); both
/// forms for the same position is a competing-keys error.
pub fn bind_arguments<'a>(
    function_name: &str,
    arguments: &'a Map<String, Json>,
) -> Result<Vec<&'a Json>> {
    let mut bound: BTreeMap<u32, (&str, &Json)> = BTreeMap::new();
    for (key, value) in arguments {
        let index = key
            .strip_prefix(function_name)
            .and_then(key_index)
            .or_else(|| key_index(key))
            .ok_or_else(|| {
                EvaluatorError::RequestShape(format!(
                    "Argument key {} is neither {}K<n> nor K<n>.",
                    key, function_name
                ))
            })?;
        if let Some((existing, _)) = bound.insert(index, (key.as_str(), value)) {
            return Err(EvaluatorError::CompetingKeys(format!(
                "Function call supplies competing keys {} and {} for argument {}.",
                existing, key, index
            )));
        }
    }
    Ok(bound.into_values().map(|(_, value)| value).collect())
}

/// Drives one request through a [`Runtime`].
pub struct ProtocolHandler<R: Runtime> {
    runtime: R,
    codec: Codec,
}

impl<R: Runtime> ProtocolHandler<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            codec: Codec::new(),
        }
    }

    /// Serve a single request: read it from `input`, answer on `output`, then
    /// signal `end` on `diagnostics`.
    ///
    /// Every failure of the request itself becomes an error envelope; only
    /// stream failures are returned.
    pub fn serve(
        &self,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
        diagnostics: &mut dyn Write,
    ) -> Result<()> {
        let envelope = match read_non_blank_line(input)? {
            None => error_envelope(&EvaluatorError::RequestShape(
                "No function call request received.".to_string(),
            )),
            Some(line) => match serde_json::from_str::<FunctionCallRequest>(&line) {
                Ok(request) => {
                    let mut host = StreamHost {
                        input: &mut *input,
                        output: &mut *output,
                        codec: &self.codec,
                    };
                    self.execute(&request, &mut host).unwrap_or_else(|err| {
                        log::debug!("evaluation failed: {}", err);
                        error_envelope(&err)
                    })
                }
                Err(err) => error_envelope(&EvaluatorError::RequestShape(format!(
                    "Could not parse function call request: {}",
                    err
                ))),
            },
        };

        writeln!(output, "{}", envelope)?;
        output.flush()?;
        writeln!(diagnostics, "{}", END_SIGNAL)?;
        diagnostics.flush()?;
        Ok(())
    }

    /// Evaluate a request to a success envelope, or the error that stopped it.
    pub fn execute(
        &self,
        request: &FunctionCallRequest,
        host: &mut dyn CallbackHost,
    ) -> Result<Json> {
        let function_name = request
            .function_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                EvaluatorError::RequestShape(
                    "Function call request did not supply functionName.".to_string(),
                )
            })?;
        let code = request
            .code_string
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| {
                EvaluatorError::RequestShape(
                    "Function call request did not supply codeString.".to_string(),
                )
            })?;

        let arguments = bind_arguments(function_name, &request.function_arguments)?
            .into_iter()
            .map(|wire| self.codec.decode(wire))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let callable = self.runtime.compile(function_name, code)?;
        let result = callable.invoke(arguments, host)?;

        let return_type = request
            .return_type
            .clone()
            .unwrap_or_else(|| reference(Z_ANY));
        let mut wire = self.codec.encode(&result, &return_type)?;
        // A void value slot reads as "no value"; the success must stay visible.
        if envelope::is_void(&wire) {
            wire = json!({"Z1K1": reference(Z_UNIT)});
        }
        Ok(make_result_envelope(Some(wire), None))
    }
}

fn read_non_blank_line(input: &mut dyn BufRead) -> Result<Option<String>> {
    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(line.trim().to_string()));
        }
    }
}

/// Reentrant calls over the worker's own stdin/stdout.
struct StreamHost<'a> {
    input: &'a mut dyn BufRead,
    output: &'a mut dyn Write,
    codec: &'a Codec,
}

impl CallbackHost for StreamHost<'_> {
    fn call(&mut self, function_id: &str, arguments: Vec<Value>) -> Result<Value> {
        let mut call = Map::new();
        call.insert("Z1K1".to_string(), Json::from(Z_CALL));
        call.insert("Z7K1".to_string(), Json::from(function_id));
        for (position, argument) in arguments.iter().enumerate() {
            call.insert(
                format!("{}K{}", function_id, position + 1),
                self.codec.encode_any(argument)?,
            );
        }

        writeln!(self.output, "{}{}", CALL_PREFIX, Json::Object(call))?;
        self.output.flush()?;
        log::debug!("waiting for reply to call to {}", function_id);

        let reply = read_non_blank_line(self.input)?.ok_or_else(|| {
            EvaluatorError::Process(format!(
                "Input closed before the call to {} was answered.",
                function_id
            ))
        })?;
        let reply: Json = serde_json::from_str(&reply).map_err(|e| {
            to_protocol_error(&format!("malformed reply to call to {}", function_id), e)
        })?;

        if !envelope::is_envelope(&reply) {
            return Ok(self.codec.decode(&reply)?);
        }
        if envelope::get_error(&reply).is_some() {
            let message = envelope::error_message(&reply).unwrap_or("unknown error");
            return Err(EvaluatorError::Execution(format!(
                "Call to {} failed: {}",
                function_id, message
            )));
        }
        match envelope::get_value(&reply) {
            Some(value) => Ok(self.codec.decode(value)?),
            None => Ok(Value::Unit),
        }
    }
}
