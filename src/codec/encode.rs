use super::generics::{
    self, as_reference_form, canonical_type_key, is_any, list_items, list_of, map_of, pair_of,
    reference, string_literal, tag_id, type_argument, typed_list,
};
use super::value::{Value, ZMap, ZPair};
use super::{Codec, CodecError, CodecResult};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

pub(super) fn register_builtins(codec: &mut Codec) {
    codec.register_encoder(generics::Z_ANY, |codec, value, _| encode_inferred(codec, value));
    codec.register_encoder(generics::Z_STRING, |_, value, _| match value {
        Value::Str(s) => Ok(string_literal(s)),
        other => Err(mismatch(other, generics::Z_STRING)),
    });
    codec.register_encoder(generics::Z_REFERENCE, |_, value, _| match value {
        Value::Reference(id) => Ok(reference(id)),
        Value::Str(id) if generics::is_reference_token(id) => Ok(reference(id)),
        other => Err(mismatch(other, generics::Z_REFERENCE)),
    });
    codec.register_encoder(generics::Z_LEGACY_LIST, encode_legacy_list);
    codec.register_encoder(generics::Z_UNIT, |_, value, _| match value {
        Value::Unit => Ok(unit()),
        other => Err(mismatch(other, generics::Z_UNIT)),
    });
    for sentinel in [generics::Z_NOTHING, generics::Z_VOID] {
        codec.register_encoder(sentinel, move |_, value, _| match value {
            Value::Unit => Ok(reference(sentinel)),
            other => Err(mismatch(other, sentinel)),
        });
    }
    codec.register_encoder(generics::Z_BOOLEAN, |_, value, _| match value {
        Value::Bool(b) => Ok(boolean(*b)),
        other => Err(mismatch(other, generics::Z_BOOLEAN)),
    });
    codec.register_encoder(generics::Z_CODE_POINT, |_, value, _| match value {
        Value::Str(s) if s.chars().count() == 1 => Ok(json!({
            "Z1K1": reference(generics::Z_CODE_POINT),
            "Z86K1": string_literal(s),
        })),
        other => Err(mismatch(other, generics::Z_CODE_POINT)),
    });
    codec.register_encoder(generics::Z_LIST, encode_list);
    codec.register_encoder(generics::Z_PAIR, encode_pair);
    codec.register_encoder(generics::Z_MAP, encode_map);
}

fn mismatch(value: &Value, zid: &str) -> CodecError {
    CodecError::Encode(format!("{} ({} does not fit type {})", value, value.kind(), zid))
}

fn unit() -> Json {
    json!({"Z1K1": reference(generics::Z_UNIT)})
}

fn boolean(b: bool) -> Json {
    let flag = if b { generics::Z_TRUE } else { generics::Z_FALSE };
    json!({"Z1K1": reference(generics::Z_BOOLEAN), "Z40K1": reference(flag)})
}

/// The one type shared by every tag, or `Z1` when they disagree (or there are none).
///
/// Tags are compared by their canonical key so the result does not depend on
/// the order they arrive in.
fn common_type<'a>(tags: impl Iterator<Item = &'a Json>) -> Json {
    let distinct: BTreeMap<String, &Json> =
        tags.map(|tag| (canonical_type_key(tag), tag)).collect();
    match distinct.values().next() {
        Some(tag) if distinct.len() == 1 => as_reference_form(tag),
        _ => reference(generics::Z_ANY),
    }
}

static NO_TAG: Json = Json::Null;

fn type_tag(wire: &Json) -> &Json {
    wire.get("Z1K1").unwrap_or(&NO_TAG)
}

fn encode_all(codec: &Codec, items: &[Value], expected: &Json) -> CodecResult<Vec<Json>> {
    items.iter().map(|item| codec.encode(item, expected)).collect()
}

/// Encoding against `Z1`: the native shape picks the type.
fn encode_inferred(codec: &Codec, value: &Value) -> CodecResult<Json> {
    match value {
        Value::Str(s) => Ok(string_literal(s)),
        Value::Reference(id) => Ok(reference(id)),
        Value::Bool(b) => Ok(boolean(*b)),
        Value::Unit => Ok(unit()),
        Value::List(items) => infer_list(codec, items),
        Value::Pair(pair) => infer_pair(codec, pair),
        Value::Map(map) => infer_map(codec, map),
        Value::Record(record) => match &record.declared_type {
            Some(declared) if !is_any(declared) => codec.encode(value, declared),
            _ => Err(CodecError::Encode(format!(
                "{} (record without a declared type)",
                value
            ))),
        },
    }
}

fn infer_list(codec: &Codec, items: &[Value]) -> CodecResult<Json> {
    let elements = encode_all(codec, items, &reference(generics::Z_ANY))?;
    let element_type = common_type(elements.iter().map(type_tag));
    Ok(typed_list(&list_of(&element_type), elements))
}

fn encode_list(codec: &Codec, value: &Value, expected: &Json) -> CodecResult<Json> {
    let Value::List(items) = value else {
        return Err(mismatch(value, generics::Z_LIST));
    };
    match type_argument(expected, "Z881K1") {
        Some(element_type) => {
            let elements = encode_all(codec, items, element_type)?;
            Ok(typed_list(expected, elements))
        }
        None => infer_list(codec, items),
    }
}

fn encode_legacy_list(codec: &Codec, value: &Value, _: &Json) -> CodecResult<Json> {
    let Value::List(items) = value else {
        return Err(mismatch(value, generics::Z_LEGACY_LIST));
    };
    let mut tail = json!({"Z1K1": reference(generics::Z_LEGACY_LIST)});
    for element in encode_all(codec, items, &reference(generics::Z_ANY))?.into_iter().rev() {
        tail = json!({
            "Z1K1": reference(generics::Z_LEGACY_LIST),
            "Z10K1": element,
            "Z10K2": tail,
        });
    }
    Ok(tail)
}

fn pair_wire(pair_type: Json, k1: Json, k2: Json) -> Json {
    json!({"Z1K1": pair_type, "K1": k1, "K2": k2})
}

/// Pairs reuse the type they were decoded with when it names both slot types.
fn infer_pair(codec: &Codec, pair: &ZPair) -> CodecResult<Json> {
    if let Some(declared) = &pair.declared_type {
        if type_argument(declared, "Z882K1").is_some()
            && type_argument(declared, "Z882K2").is_some()
        {
            return encode_pair(codec, &Value::Pair(pair.clone()), declared);
        }
    }
    let k1 = codec.encode_any(&pair.k1)?;
    let k2 = codec.encode_any(&pair.k2)?;
    let pair_type = pair_of(type_tag(&k1), type_tag(&k2));
    Ok(pair_wire(pair_type, k1, k2))
}

fn encode_pair(codec: &Codec, value: &Value, expected: &Json) -> CodecResult<Json> {
    let Value::Pair(pair) = value else {
        return Err(mismatch(value, generics::Z_PAIR));
    };
    match (
        type_argument(expected, "Z882K1"),
        type_argument(expected, "Z882K2"),
    ) {
        (Some(first), Some(second)) => Ok(pair_wire(
            expected.clone(),
            codec.encode(&pair.k1, first)?,
            codec.encode(&pair.k2, second)?,
        )),
        _ => {
            let undeclared = ZPair::new((*pair.k1).clone(), (*pair.k2).clone());
            infer_pair(codec, &undeclared)
        }
    }
}

fn assemble_map(map_type: Json, pair_type: &Json, entries: Vec<(Json, Json)>) -> Json {
    let pairs = entries
        .into_iter()
        .map(|(k, v)| pair_wire(pair_type.clone(), k, v))
        .collect();
    json!({"Z1K1": map_type, "K1": typed_list(&list_of(pair_type), pairs)})
}

/// Key and value types are inferred independently, over every entry.
fn infer_map(codec: &Codec, map: &ZMap) -> CodecResult<Json> {
    let entries = map
        .iter()
        .map(|(k, v)| Ok((codec.encode_any(k)?, codec.encode_any(v)?)))
        .collect::<CodecResult<Vec<_>>>()?;
    let key_type = common_type(entries.iter().map(|(k, _)| type_tag(k)));
    let value_type = common_type(entries.iter().map(|(_, v)| type_tag(v)));
    let pair_type = pair_of(&key_type, &value_type);
    Ok(assemble_map(map_of(&key_type, &value_type), &pair_type, entries))
}

fn encode_map(codec: &Codec, value: &Value, expected: &Json) -> CodecResult<Json> {
    let Value::Map(map) = value else {
        return Err(mismatch(value, generics::Z_MAP));
    };
    match (
        type_argument(expected, "Z883K1"),
        type_argument(expected, "Z883K2"),
    ) {
        (Some(key_type), Some(value_type)) => {
            let entries = map
                .iter()
                .map(|(k, v)| Ok((codec.encode(k, key_type)?, codec.encode(v, value_type)?)))
                .collect::<CodecResult<Vec<_>>>()?;
            let pair_type = pair_of(key_type, value_type);
            Ok(assemble_map(expected.clone(), &pair_type, entries))
        }
        _ => infer_map(codec, map),
    }
}

/// Declared keys of a `Z4` descriptor as `(label, type)`.
fn declared_keys(descriptor: &Json) -> CodecResult<Option<Vec<(String, &Json)>>> {
    if descriptor.get("Z1K1").and_then(tag_id) != Some(generics::Z_TYPE) {
        return Ok(None);
    }
    let Some(declarations) = descriptor.get("Z4K2") else {
        return Ok(None);
    };
    let mut keys = Vec::new();
    for declaration in list_items(declarations)? {
        let label = match declaration.get("Z3K2") {
            Some(Json::String(s)) => s.clone(),
            Some(literal) => literal
                .get("Z6K1")
                .and_then(Json::as_str)
                .map(str::to_string)
                .ok_or_else(|| CodecError::Encode(format!("bad key label {}", literal)))?,
            None => return Err(CodecError::Encode(format!("bad key declaration {}", declaration))),
        };
        let key_type = declaration
            .get("Z3K1")
            .ok_or_else(|| CodecError::Encode(format!("bad key declaration {}", declaration)))?;
        keys.push((label, key_type));
    }
    Ok(Some(keys))
}

/// Fallback: a record tagged with the expected type.
///
/// A `Z4` descriptor fixes which fields are written and their types;
/// otherwise every field is encoded against `Z1`.
pub(super) fn encode_record(codec: &Codec, value: &Value, expected: &Json) -> CodecResult<Json> {
    let Value::Record(record) = value else {
        let zid = generics::get_zid(expected).unwrap_or_default();
        return Err(mismatch(value, &zid));
    };

    let mut wire = Map::new();
    wire.insert("Z1K1".to_string(), expected.clone());
    match declared_keys(expected)? {
        Some(keys) => {
            for (label, key_type) in keys {
                let field = record.get(&label).ok_or_else(|| {
                    CodecError::Encode(format!("{} (missing declared key {})", value, label))
                })?;
                wire.insert(label, codec.encode(field, key_type)?);
            }
        }
        None => {
            for (key, field) in &record.fields {
                wire.insert(key.clone(), codec.encode_any(field)?);
            }
        }
    }
    Ok(Json::Object(wire))
}
