//! Seams between the protocol handler and a language implementation.

use crate::codec::Value;
use crate::config::types::Result;

/// Turns source text into something callable; one compile per request.
pub trait Runtime {
    fn compile(&self, function_name: &str, code: &str) -> Result<Box<dyn Callable>>;
}

pub trait Callable {
    /// Run with decoded arguments in call order. Reentrant calls go through `host`.
    fn invoke(&self, arguments: Vec<Value>, host: &mut dyn CallbackHost) -> Result<Value>;
}

/// Evaluates another function on behalf of running code and blocks until it answers.
pub trait CallbackHost {
    fn call(&mut self, function_id: &str, arguments: Vec<Value>) -> Result<Value>;
}
