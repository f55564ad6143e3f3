//! `zscript`: the in-process language hosted by the built-in worker.
//!
//! Source text is lexed and parsed once per call, then the named function is
//! looked up in a fresh global scope and invoked with the decoded arguments.

mod ast;
mod interp;
mod lexer;
mod parser;

use thiserror::Error;

use crate::codec::Value;
use crate::config::types::{EvaluatorError, Result};
use crate::worker::runtime::{CallbackHost, Callable, Runtime};

use ast::Program;
use interp::{from_value, to_value, Interpreter};

pub use interp::MAX_CALL_DEPTH;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("SyntaxError (line {line}): {message}")]
    Syntax { line: usize, message: String },

    #[error("{0}")]
    Runtime(String),

    /// Value of a `throw` statement, rendered as text.
    #[error("{0}")]
    Thrown(String),

    /// A reentrant call failed; surfaced unchanged.
    #[error(transparent)]
    Host(#[from] EvaluatorError),
}

impl From<ScriptError> for EvaluatorError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Host(inner) => inner,
            other => EvaluatorError::Execution(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ZScriptRuntime;

impl Runtime for ZScriptRuntime {
    fn compile(&self, function_name: &str, code: &str) -> Result<Box<dyn Callable>> {
        let program = lexer::lex(code).and_then(parser::parse_program)?;
        log::debug!(
            "compiled {} ({} top-level statements)",
            function_name,
            program.statements.len()
        );
        Ok(Box::new(ZScriptFunction {
            program,
            name: function_name.to_string(),
        }))
    }
}

struct ZScriptFunction {
    program: Program,
    name: String,
}

impl Callable for ZScriptFunction {
    fn invoke(&self, arguments: Vec<Value>, host: &mut dyn CallbackHost) -> Result<Value> {
        let arguments = arguments.into_iter().map(from_value).collect();
        let result = Interpreter::new(host).run(&self.program, &self.name, arguments)?;
        Ok(to_value(&result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHost;

    impl CallbackHost for NoHost {
        fn call(&mut self, function_id: &str, _arguments: Vec<Value>) -> Result<Value> {
            Err(EvaluatorError::Process(format!("unexpected call to {}", function_id)))
        }
    }

    fn evaluate(name: &str, code: &str, args: Vec<Value>) -> Result<Value> {
        ZScriptRuntime.compile(name, code)?.invoke(args, &mut NoHost)
    }

    #[test]
    fn compiles_and_invokes() {
        let value = evaluate(
            "Z1000",
            "function Z1000(a, b) { return a + b; }",
            vec![Value::str("2"), Value::str("3")],
        )
        .unwrap();
        assert_eq!(value, Value::str("23"));
    }

    #[test]
    fn syntax_errors_are_execution_errors() {
        let err = evaluate("f", "function f( {", vec![]).unwrap_err();
        assert!(matches!(err, EvaluatorError::Execution(_)));
        assert!(err.to_string().starts_with("SyntaxError (line 1):"));
        assert_eq!(err.error_code(), "Z507");
    }

    #[test]
    fn returning_an_integer_is_a_codec_error() {
        let err = evaluate("f", "const f = () => 1 + 2;", vec![]).unwrap_err();
        assert!(matches!(err, EvaluatorError::Codec(_)));
        assert!(err.to_string().starts_with("Could not serialize input value: 3"));
    }

    #[test]
    fn host_failures_pass_through() {
        let err = evaluate("f", "function f() { return call('Z10'); }", vec![]).unwrap_err();
        match err {
            EvaluatorError::Process(msg) => assert_eq!(msg, "unexpected call to Z10"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn each_invocation_starts_from_a_fresh_scope() {
        let callable = ZScriptRuntime
            .compile("f", "let seen = ''; function f(x) { seen = seen + x; return seen; }")
            .unwrap();
        let first = callable.invoke(vec![Value::str("a")], &mut NoHost).unwrap();
        let second = callable.invoke(vec![Value::str("b")], &mut NoHost).unwrap();
        assert_eq!(first, Value::str("a"));
        assert_eq!(second, Value::str("b"));
    }
}
