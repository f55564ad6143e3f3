//! Result envelope helpers
//!
//! Every evaluation answers with a `Z22`: `Z22K1` holds the value (or void),
//! `Z22K2` holds an error, a metadata map, or void. When metadata is attached
//! to an errored envelope the error moves into the map under `errors`, which
//! is always the first entry.

use crate::codec::generics::{
    self, list_items, list_of, map_of, pair_of, reference, string_literal, typed_list,
};
use crate::config::types::{EvaluatorError, Result};
use serde_json::{json, Value as Json};

/// Metadata key under which an error is kept once metadata is attached.
pub const ERRORS_KEY: &str = "errors";

/// `Z24`
pub fn void() -> Json {
    reference(generics::Z_VOID)
}

pub fn is_void(value: &Json) -> bool {
    matches!(
        generics::tag_id(value),
        Some(generics::Z_VOID) | Some(generics::Z_NOTHING)
    ) || value.is_null()
}

pub fn make_result_envelope(value: Option<Json>, error_or_metadata: Option<Json>) -> Json {
    json!({
        "Z1K1": reference(generics::Z_ENVELOPE),
        "Z22K1": value.unwrap_or_else(void),
        "Z22K2": error_or_metadata.unwrap_or_else(void),
    })
}

/// `Z5` error with an error type id and a message
pub fn make_error(code: &str, message: &str) -> Json {
    json!({
        "Z1K1": reference(generics::Z_ERROR),
        "Z5K1": reference(code),
        "Z5K2": string_literal(message),
    })
}

/// The only route from an [`EvaluatorError`] to the wire.
pub fn error_envelope(err: &EvaluatorError) -> Json {
    make_result_envelope(None, Some(make_error(err.error_code(), &err.to_string())))
}

pub fn is_envelope(value: &Json) -> bool {
    value.get("Z1K1").and_then(generics::tag_id) == Some(generics::Z_ENVELOPE)
        && value.get("Z22K1").is_some()
        && value.get("Z22K2").is_some()
}

fn is_error(value: &Json) -> bool {
    value.get("Z1K1").and_then(generics::tag_id) == Some(generics::Z_ERROR)
}

fn is_map(value: &Json) -> bool {
    value
        .get("Z1K1")
        .map(|tag| generics::get_zid(tag).ok().as_deref() == Some(generics::Z_MAP))
        .unwrap_or(false)
}

/// Populated value slot, if any
pub fn get_value(envelope: &Json) -> Option<&Json> {
    envelope.get("Z22K1").filter(|v| !is_void(v))
}

/// The error of an envelope, whether stored directly or under `errors`.
pub fn get_error(envelope: &Json) -> Option<&Json> {
    let slot = envelope.get("Z22K2")?;
    if is_error(slot) {
        return Some(slot);
    }
    get_metadata_value(envelope, ERRORS_KEY).filter(|e| !is_void(e))
}

/// Message of an envelope's error, when it is a plain string literal.
pub fn error_message(envelope: &Json) -> Option<&str> {
    let detail = get_error(envelope)?.get("Z5K2")?;
    detail.get("Z6K1").and_then(Json::as_str).or_else(|| detail.as_str())
}

/// Error type id of an envelope's error.
pub fn error_code(envelope: &Json) -> Option<String> {
    get_error(envelope)?
        .get("Z5K1")
        .and_then(|code| generics::get_zid(code).ok())
}

fn metadata_key(entry: &Json) -> Option<&str> {
    let key = entry.get("K1")?;
    key.get("Z6K1").and_then(Json::as_str).or_else(|| key.as_str())
}

fn metadata_entries(map: &Json) -> Vec<(String, Json)> {
    let Some(list) = map.get("K1") else {
        return Vec::new();
    };
    list_items(list)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            let key = metadata_key(entry)?.to_string();
            Some((key, entry.get("K2")?.clone()))
        })
        .collect()
}

fn metadata_map(entries: Vec<(String, Json)>) -> Json {
    let key_type = reference(generics::Z_STRING);
    let value_type = reference(generics::Z_ANY);
    let pair_type = pair_of(&key_type, &value_type);
    let pairs = entries
        .into_iter()
        .map(|(k, v)| json!({"Z1K1": pair_type.clone(), "K1": string_literal(&k), "K2": v}))
        .collect();
    json!({
        "Z1K1": map_of(&key_type, &value_type),
        "K1": typed_list(&list_of(&pair_type), pairs),
    })
}

/// Set one metadata entry, replacing an existing entry with the same key.
///
/// An error already in the slot is kept under `errors`.
pub fn set_metadata_value(envelope: &mut Json, key: &str, value: Json) {
    let slot = envelope.get("Z22K2").cloned().unwrap_or_else(void);
    let mut entries = if is_map(&slot) {
        metadata_entries(&slot)
    } else if is_error(&slot) {
        vec![(ERRORS_KEY.to_string(), slot)]
    } else {
        Vec::new()
    };

    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key.to_string(), value)),
    }

    if let Some(object) = envelope.as_object_mut() {
        object.insert("Z22K2".to_string(), metadata_map(entries));
    }
}

pub fn get_metadata_value<'a>(envelope: &'a Json, key: &str) -> Option<&'a Json> {
    let slot = envelope.get("Z22K2")?;
    if !is_map(slot) {
        return None;
    }
    list_items(slot.get("K1")?)
        .ok()?
        .into_iter()
        .find(|entry| metadata_key(entry) == Some(key))
        .and_then(|entry| entry.get("K2"))
}

/// Parse the accumulated worker output as an envelope.
///
/// Empty output and anything that is not a `Z22` are distinct failures. A
/// `Z22` must carry exactly one of a value and an error.
pub fn parse_envelope(payload: &str) -> Result<Json> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(EvaluatorError::Payload(
            "Executor returned an empty response.".to_string(),
        ));
    }
    let nonsense = || {
        EvaluatorError::Payload(format!("Executor returned some nonsense: {}.", trimmed))
    };
    let parsed: Json = serde_json::from_str(trimmed).map_err(|_| nonsense())?;
    if is_envelope(&parsed) && get_value(&parsed).is_some() != get_error(&parsed).is_some() {
        Ok(parsed)
    } else {
        Err(nonsense())
    }
}
