#![allow(dead_code)]

use function_evaluator::codec::generics::{reference, string_literal};
use function_evaluator::config::presets::LanguageRegistry;
use function_evaluator::config::types::ExecutorSpec;
use serde_json::{json, Map, Value as Json};
use std::sync::Arc;

/// A `Z8` with one code implementation.
pub fn function_object(language: &str, code: Option<&str>, name: &str) -> Json {
    let mut code_object = json!({
        "Z1K1": "Z16",
        "Z16K1": {"Z1K1": "Z61", "Z61K1": language},
    });
    if let Some(code) = code {
        code_object["Z16K2"] = json!(code);
    }
    json!({
        "Z1K1": reference("Z8"),
        "Z8K4": ["Z14", {"Z1K1": "Z14", "Z14K3": code_object}],
        "Z8K5": reference(name),
    })
}

/// A `Z7` calling `name` with string arguments bound to `<name>K1..`.
pub fn function_call(language: &str, code: Option<&str>, name: &str, args: &[&str]) -> Json {
    let mut call = Map::new();
    call.insert("Z1K1".to_string(), reference("Z7"));
    call.insert("Z7K1".to_string(), function_object(language, code, name));
    for (index, arg) in args.iter().enumerate() {
        call.insert(format!("{}K{}", name, index + 1), string_literal(arg));
    }
    Json::Object(call)
}

/// A registry whose only language runs `script` under `/bin/sh`.
pub fn shell_registry(language: &str, script: &str) -> Arc<LanguageRegistry> {
    Arc::new(
        LanguageRegistry::empty().with(language, ExecutorSpec::new("/bin/sh", &["-c", script])),
    )
}

/// A registry serving `zscript` from the freshly built worker binary.
pub fn zscript_registry() -> Arc<LanguageRegistry> {
    Arc::new(LanguageRegistry::empty().with(
        "zscript",
        ExecutorSpec::new(env!("CARGO_BIN_EXE_zscript-worker"), &[]),
    ))
}
