/// Type ids, type-tag inspection and generic type instantiation
///
/// Generic instances appear on the wire as the normal-form type call
/// `{Z1K1: Z7, Z7K1: Z881, Z881K1: T}`; the `describe_*` builders produce the
/// equivalent `Z4` descriptor with its `Z3` key declarations. Both forms are
/// accepted wherever a type is expected.
use crate::codec::{CodecError, CodecResult};
use serde_json::{json, Map, Value as Json};

pub const Z_ANY: &str = "Z1";
pub const Z_KEY: &str = "Z3";
pub const Z_TYPE: &str = "Z4";
pub const Z_ERROR: &str = "Z5";
pub const Z_STRING: &str = "Z6";
pub const Z_CALL: &str = "Z7";
pub const Z_FUNCTION: &str = "Z8";
pub const Z_REFERENCE: &str = "Z9";
pub const Z_LEGACY_LIST: &str = "Z10";
pub const Z_UNIT: &str = "Z21";
pub const Z_ENVELOPE: &str = "Z22";
pub const Z_NOTHING: &str = "Z23";
pub const Z_VOID: &str = "Z24";
pub const Z_BOOLEAN: &str = "Z40";
pub const Z_TRUE: &str = "Z41";
pub const Z_FALSE: &str = "Z42";
pub const Z_CODE_POINT: &str = "Z86";
pub const Z_LIST: &str = "Z881";
pub const Z_PAIR: &str = "Z882";
pub const Z_MAP: &str = "Z883";

const Z_MONOLINGUAL_LIST: &str = "Z11";
const Z_MULTILINGUAL: &str = "Z12";
const Z_VALIDATOR: &str = "Z104";

/// `{Z1K1: Z9, Z9K1: id}`
pub fn reference(id: &str) -> Json {
    json!({"Z1K1": Z_REFERENCE, "Z9K1": id})
}

/// `{Z1K1: Z6, Z6K1: s}`
pub fn string_literal(s: &str) -> Json {
    json!({"Z1K1": Z_STRING, "Z6K1": s})
}

/// `Z<n>` or `Z<n>K<n>`, the shape of a bare reference in canonical form.
pub fn is_reference_token(s: &str) -> bool {
    fn digits(part: &str) -> bool {
        !part.is_empty()
            && part.bytes().all(|b| b.is_ascii_digit())
            && !part.starts_with('0')
    }

    let Some(rest) = s.strip_prefix('Z') else {
        return false;
    };
    match rest.split_once('K') {
        Some((zid, key)) => digits(zid) && digits(key),
        None => digits(rest),
    }
}

/// Id of a type tag written either bare or as a reference.
pub fn tag_id(tag: &Json) -> Option<&str> {
    match tag {
        Json::String(s) => Some(s),
        Json::Object(map) if map.get("Z1K1").and_then(Json::as_str) == Some(Z_REFERENCE) => {
            map.get("Z9K1").and_then(Json::as_str)
        }
        _ => None,
    }
}

/// The type id a type (or function) denotes.
///
/// Strings are ids already; references yield their target; type calls,
/// descriptors and functions are followed to the id they instantiate.
pub fn get_zid(value: &Json) -> CodecResult<String> {
    let unknown = || CodecError::UnknownType(value.to_string());

    match value {
        Json::String(s) => Ok(s.clone()),
        Json::Object(map) => {
            let tag = map.get("Z1K1").and_then(tag_id).ok_or_else(unknown)?;
            let next = match tag {
                Z_REFERENCE => {
                    return map
                        .get("Z9K1")
                        .and_then(Json::as_str)
                        .map(str::to_string)
                        .ok_or_else(unknown)
                }
                Z_CALL => "Z7K1",
                Z_TYPE => "Z4K1",
                Z_FUNCTION => "Z8K5",
                _ => return Err(unknown()),
            };
            map.get(next).ok_or_else(unknown).and_then(get_zid)
        }
        _ => Err(unknown()),
    }
}

/// Type id of a wire value, read from its `Z1K1`.
pub fn type_of(wire: &Json) -> CodecResult<String> {
    match wire.get("Z1K1") {
        Some(tag) => get_zid(tag),
        None => Err(CodecError::UnknownType(wire.to_string())),
    }
}

/// Bare ids become references; everything else is returned unchanged.
pub fn as_reference_form(tag: &Json) -> Json {
    match tag {
        Json::String(s) => reference(s),
        other => other.clone(),
    }
}

/// Order-independent text form of a type, used to compare types for equality.
pub fn canonical_type_key(tag: &Json) -> String {
    fn canonical(value: &Json) -> Json {
        match value {
            Json::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    sorted.insert(key.clone(), canonical(&map[key]));
                }
                Json::Object(sorted)
            }
            Json::Array(items) => Json::Array(items.iter().map(canonical).collect()),
            other => other.clone(),
        }
    }

    canonical(&as_reference_form(tag)).to_string()
}

/// Whether `tag` is the unconstrained type.
pub fn is_any(tag: &Json) -> bool {
    tag_id(tag) == Some(Z_ANY)
}

/// Type argument `key` of a generic instance given as a type call or a descriptor.
pub fn type_argument<'a>(expected: &'a Json, key: &str) -> Option<&'a Json> {
    let map = expected.as_object()?;
    match map.get("Z1K1").and_then(tag_id) {
        Some(Z_CALL) => map.get(key),
        Some(Z_TYPE) => map.get("Z4K1").and_then(|call| type_argument(call, key)),
        _ => None,
    }
}

fn type_call(generic: &str, arguments: &[(&str, &Json)]) -> Json {
    let mut call = Map::new();
    call.insert("Z1K1".to_string(), reference(Z_CALL));
    call.insert("Z7K1".to_string(), reference(generic));
    for (key, argument) in arguments {
        call.insert(key.to_string(), as_reference_form(argument));
    }
    Json::Object(call)
}

/// Typed list of `element_type`
pub fn list_of(element_type: &Json) -> Json {
    type_call(Z_LIST, &[("Z881K1", element_type)])
}

/// Typed pair of `first` and `second`
pub fn pair_of(first: &Json, second: &Json) -> Json {
    type_call(Z_PAIR, &[("Z882K1", first), ("Z882K2", second)])
}

/// Typed map from `key_type` to `value_type`
pub fn map_of(key_type: &Json, value_type: &Json) -> Json {
    type_call(Z_MAP, &[("Z883K1", key_type), ("Z883K2", value_type)])
}

fn key_declaration(key_type: &Json, label: &str) -> Json {
    json!({
        "Z1K1": reference(Z_KEY),
        "Z3K1": as_reference_form(key_type),
        "Z3K2": string_literal(label),
        "Z3K3": {
            "Z1K1": reference(Z_MULTILINGUAL),
            "Z12K1": typed_list(&list_of(&reference(Z_MONOLINGUAL_LIST)), Vec::new()),
        },
    })
}

fn descriptor(call: Json, declarations: Vec<Json>) -> Json {
    json!({
        "Z1K1": reference(Z_TYPE),
        "Z4K1": call,
        "Z4K2": typed_list(&list_of(&reference(Z_KEY)), declarations),
        "Z4K3": reference(Z_VALIDATOR),
    })
}

/// `Z4` descriptor of [`list_of`]: keys `K1` (head) and `K2` (tail)
pub fn describe_list(element_type: &Json) -> Json {
    let call = list_of(element_type);
    let declarations = vec![
        key_declaration(element_type, "K1"),
        key_declaration(&call, "K2"),
    ];
    descriptor(call, declarations)
}

/// `Z4` descriptor of [`pair_of`]
pub fn describe_pair(first: &Json, second: &Json) -> Json {
    let declarations = vec![
        key_declaration(first, "K1"),
        key_declaration(second, "K2"),
    ];
    descriptor(pair_of(first, second), declarations)
}

/// `Z4` descriptor of [`map_of`]: one key `K1` holding a list of pairs
pub fn describe_map(key_type: &Json, value_type: &Json) -> Json {
    let pairs = list_of(&pair_of(key_type, value_type));
    descriptor(
        map_of(key_type, value_type),
        vec![key_declaration(&pairs, "K1")],
    )
}

/// Typed list wire value with the given (already encoded) elements.
pub fn typed_list(list_type: &Json, elements: Vec<Json>) -> Json {
    let mut tail = json!({"Z1K1": list_type.clone()});
    for element in elements.into_iter().rev() {
        tail = json!({"Z1K1": list_type.clone(), "K1": element, "K2": tail});
    }
    tail
}

/// Elements of a typed list (`K1`/`K2`) or legacy list (`Z10K1`/`Z10K2`).
pub fn list_items(list: &Json) -> CodecResult<Vec<&Json>> {
    let mut items = Vec::new();
    let mut current = list;
    loop {
        if !current.is_object() {
            return Err(CodecError::Decode(format!("malformed list cell {}", current)));
        }
        let head = current.get("K1").or_else(|| current.get("Z10K1"));
        let Some(head) = head else {
            break;
        };
        items.push(head);
        match current.get("K2").or_else(|| current.get("Z10K2")) {
            Some(tail) => current = tail,
            None => break,
        }
    }
    Ok(items)
}
