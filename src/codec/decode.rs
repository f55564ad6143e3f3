use super::generics::{self, is_reference_token, list_items};
use super::value::{Value, ZMap, ZPair, ZRecord};
use super::{Codec, CodecError, CodecResult};
use serde_json::Value as Json;

pub(super) fn register_builtins(codec: &mut Codec) {
    codec.register_decoder(generics::Z_STRING, |_, wire| decode_string(wire));
    codec.register_decoder(generics::Z_REFERENCE, |_, wire| {
        let id = field_str(wire, "Z9K1")?;
        Ok(reference_value(id))
    });
    codec.register_decoder(generics::Z_LEGACY_LIST, decode_list);
    codec.register_decoder(generics::Z_LIST, decode_list);
    for unit in [generics::Z_UNIT, generics::Z_NOTHING, generics::Z_VOID] {
        codec.register_decoder(unit, |_, _| Ok(Value::Unit));
    }
    codec.register_decoder(generics::Z_BOOLEAN, |_, wire| {
        let flag = field(wire, "Z40K1")?;
        match generics::get_zid(flag)?.as_str() {
            generics::Z_TRUE => Ok(Value::Bool(true)),
            generics::Z_FALSE => Ok(Value::Bool(false)),
            _ => Err(CodecError::Decode(wire.to_string())),
        }
    });
    codec.register_decoder(generics::Z_CODE_POINT, |_, wire| {
        decode_string(field(wire, "Z86K1")?)
    });
    codec.register_decoder(generics::Z_PAIR, |codec, wire| {
        let pair = ZPair::new(
            codec.decode(field(wire, "K1")?)?,
            codec.decode(field(wire, "K2")?)?,
        );
        Ok(Value::Pair(pair.with_type(field(wire, "Z1K1")?.clone())))
    });
    codec.register_decoder(generics::Z_MAP, decode_map);
}

fn field<'a>(wire: &'a Json, key: &str) -> CodecResult<&'a Json> {
    wire.get(key)
        .ok_or_else(|| CodecError::Decode(format!("{} is missing {}", wire, key)))
}

fn field_str<'a>(wire: &'a Json, key: &str) -> CodecResult<&'a str> {
    field(wire, key)?
        .as_str()
        .ok_or_else(|| CodecError::Decode(wire.to_string()))
}

/// Canonical bare strings: reference tokens are references, anything else a literal.
pub(super) fn canonical_string(s: &str) -> Value {
    if is_reference_token(s) {
        reference_value(s)
    } else {
        Value::Str(s.to_string())
    }
}

/// Boolean and unit sentinels decode to their native values.
fn reference_value(id: &str) -> Value {
    match id {
        generics::Z_TRUE => Value::Bool(true),
        generics::Z_FALSE => Value::Bool(false),
        generics::Z_NOTHING | generics::Z_VOID => Value::Unit,
        _ => Value::Reference(id.to_string()),
    }
}

/// `Z6` objects and bare strings both carry a string literal here.
fn decode_string(wire: &Json) -> CodecResult<Value> {
    match wire {
        Json::String(s) => Ok(Value::Str(s.clone())),
        _ => Ok(Value::Str(field_str(wire, "Z6K1")?.to_string())),
    }
}

fn decode_list(codec: &Codec, wire: &Json) -> CodecResult<Value> {
    list_items(wire)?
        .into_iter()
        .map(|item| codec.decode(item))
        .collect::<CodecResult<Vec<_>>>()
        .map(Value::List)
}

fn decode_map(codec: &Codec, wire: &Json) -> CodecResult<Value> {
    let Some(pairs) = wire.get("K1") else {
        return Ok(Value::Map(ZMap::new()));
    };
    let mut map = ZMap::new();
    for item in list_items(pairs)? {
        match codec.decode(item)? {
            Value::Pair(pair) => map.insert(*pair.k1, *pair.k2),
            other => {
                return Err(CodecError::Decode(format!(
                    "map entry {} is not a pair",
                    other
                )))
            }
        }
    }
    Ok(Value::Map(map))
}

/// Fallback: every field except the type tag, decoded recursively.
pub(super) fn decode_record(codec: &Codec, wire: &Json) -> CodecResult<Value> {
    let object = wire
        .as_object()
        .ok_or_else(|| CodecError::Decode(wire.to_string()))?;
    let mut record = ZRecord::new(object.get("Z1K1").cloned());
    for (key, value) in object {
        if key == "Z1K1" {
            continue;
        }
        record.fields.insert(key.clone(), codec.decode(value)?);
    }
    Ok(Value::Record(record))
}

#[cfg(test)]
mod tests {
    use super::super::generics::{list_of, map_of, pair_of, reference, typed_list};
    use super::*;
    use serde_json::json;

    fn z6(s: &str) -> Json {
        json!({"Z1K1": "Z6", "Z6K1": s})
    }

    #[test]
    fn strings_references_and_sentinels() {
        let codec = Codec::new();
        assert_eq!(codec.decode(&z6("hi")).unwrap(), Value::str("hi"));
        assert_eq!(codec.decode(&reference("Z10")).unwrap(), Value::reference("Z10"));
        assert_eq!(codec.decode(&reference("Z41")).unwrap(), Value::Bool(true));
        assert_eq!(codec.decode(&reference("Z24")).unwrap(), Value::Unit);
        assert_eq!(codec.decode(&json!("Z10")).unwrap(), Value::reference("Z10"));
        assert_eq!(codec.decode(&json!("Z10 ")).unwrap(), Value::str("Z10 "));
    }

    #[test]
    fn booleans_units_and_code_points() {
        let codec = Codec::new();
        let falsy = json!({"Z1K1": reference("Z40"), "Z40K1": reference("Z42")});
        assert_eq!(codec.decode(&falsy).unwrap(), Value::Bool(false));
        let canonical = json!({"Z1K1": "Z40", "Z40K1": "Z41"});
        assert_eq!(codec.decode(&canonical).unwrap(), Value::Bool(true));
        assert_eq!(codec.decode(&json!({"Z1K1": reference("Z21")})).unwrap(), Value::Unit);
        let point = json!({"Z1K1": reference("Z86"), "Z86K1": z6("%")});
        assert_eq!(codec.decode(&point).unwrap(), Value::str("%"));
    }

    #[test]
    fn bad_boolean_is_decode_error() {
        let codec = Codec::new();
        let wire = json!({"Z1K1": reference("Z40"), "Z40K1": reference("Z10")});
        assert!(matches!(codec.decode(&wire), Err(CodecError::Decode(_))));
    }

    #[test]
    fn typed_and_legacy_lists() {
        let codec = Codec::new();
        let typed = typed_list(&list_of(&reference("Z6")), vec![z6("a"), z6("b")]);
        assert_eq!(
            codec.decode(&typed).unwrap(),
            Value::List(vec![Value::str("a"), Value::str("b")])
        );

        let legacy = json!({
            "Z1K1": reference("Z10"),
            "Z10K1": z6("x"),
            "Z10K2": {"Z1K1": reference("Z10")}
        });
        assert_eq!(codec.decode(&legacy).unwrap(), Value::List(vec![Value::str("x")]));
    }

    #[test]
    fn pair_keeps_declared_type() {
        let codec = Codec::new();
        let pair_type = pair_of(&reference("Z6"), &reference("Z40"));
        let wire = json!({
            "Z1K1": pair_type,
            "K1": z6("k"),
            "K2": {"Z1K1": reference("Z40"), "Z40K1": reference("Z41")}
        });
        match codec.decode(&wire).unwrap() {
            Value::Pair(pair) => {
                assert_eq!(*pair.k1, Value::str("k"));
                assert_eq!(*pair.k2, Value::Bool(true));
                assert_eq!(pair.declared_type, Some(pair_type));
            }
            other => panic!("expected pair, got {other:?}"),
        }
    }

    #[test]
    fn map_duplicate_keys_last_write_wins() {
        let codec = Codec::new();
        let pair_type = pair_of(&reference("Z6"), &reference("Z6"));
        let entry = |k: &str, v: &str| json!({"Z1K1": pair_type.clone(), "K1": z6(k), "K2": z6(v)});
        let wire = json!({
            "Z1K1": map_of(&reference("Z6"), &reference("Z6")),
            "K1": typed_list(&list_of(&pair_type), vec![entry("a", "1"), entry("a", "2")])
        });
        match codec.decode(&wire).unwrap() {
            Value::Map(map) => {
                assert_eq!(map.len(), 1);
                assert_eq!(map.get(&Value::str("a")), Some(&Value::str("2")));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn unknown_types_fall_back_to_records() {
        let codec = Codec::new();
        let wire = json!({
            "Z1K1": reference("Z10030"),
            "Z10030K1": z6("name"),
            "Z10030K2": "Z41"
        });
        match codec.decode(&wire).unwrap() {
            Value::Record(record) => {
                assert_eq!(record.declared_type, Some(reference("Z10030")));
                assert_eq!(record.get("Z10030K1"), Some(&Value::str("name")));
                assert_eq!(record.get("Z10030K2"), Some(&Value::Bool(true)));
                assert!(record.get("Z1K1").is_none());
            }
            other => panic!("expected record, got {other:?}"),
        }
    }
}
