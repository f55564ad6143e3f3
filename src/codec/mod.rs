//! Type-directed ZObject codec
//!
//! Converts between wire ZObjects (canonical or normal form) and native
//! [`Value`]s. Both directions dispatch through handler tables keyed by type
//! id, with a generic-record handler as the fallback; callers can register
//! additional handlers at runtime.
//!
//! - [`Codec::decode`] dispatches on the wire value's own `Z1K1`.
//! - [`Codec::encode`] dispatches on the expected type; against the
//!   unconstrained type `Z1` it infers a concrete type from the value's shape.

mod decode;
mod encode;
pub mod generics;
pub mod value;

pub use generics::{get_zid, list_of, map_of, pair_of, reference};
pub use value::{Value, ZMap, ZPair, ZRecord};

use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Could not deserialize input ZObject: {0}")]
    Decode(String),

    #[error("Could not serialize input value: {0}")]
    Encode(String),

    #[error("Could not determine type for {0}")]
    UnknownType(String),
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Wire -> native handler
pub type Decoder = Box<dyn Fn(&Codec, &Json) -> CodecResult<Value> + Send + Sync>;

/// Native -> wire handler; receives the expected type
pub type Encoder = Box<dyn Fn(&Codec, &Value, &Json) -> CodecResult<Json> + Send + Sync>;

pub struct Codec {
    decoders: HashMap<String, Decoder>,
    encoders: HashMap<String, Encoder>,
}

impl Codec {
    /// Codec with every built-in handler registered
    pub fn new() -> Self {
        let mut codec = Self {
            decoders: HashMap::new(),
            encoders: HashMap::new(),
        };
        decode::register_builtins(&mut codec);
        encode::register_builtins(&mut codec);
        codec
    }

    pub fn register_decoder<F>(&mut self, zid: &str, decoder: F)
    where
        F: Fn(&Codec, &Json) -> CodecResult<Value> + Send + Sync + 'static,
    {
        self.decoders.insert(zid.to_string(), Box::new(decoder));
    }

    pub fn register_encoder<F>(&mut self, zid: &str, encoder: F)
    where
        F: Fn(&Codec, &Value, &Json) -> CodecResult<Json> + Send + Sync + 'static,
    {
        self.encoders.insert(zid.to_string(), Box::new(encoder));
    }

    /// Wire value -> native value
    pub fn decode(&self, wire: &Json) -> CodecResult<Value> {
        match wire {
            Json::String(s) => Ok(decode::canonical_string(s)),
            Json::Object(_) => {
                let zid = generics::type_of(wire)?;
                match self.decoders.get(&zid) {
                    Some(decoder) => decoder(self, wire),
                    None => decode::decode_record(self, wire),
                }
            }
            other => Err(CodecError::Decode(other.to_string())),
        }
    }

    /// Native value -> normal-form wire value, guided by `expected_type`
    pub fn encode(&self, value: &Value, expected_type: &Json) -> CodecResult<Json> {
        let zid = generics::get_zid(expected_type)
            .map_err(|_| CodecError::Encode(value.to_string()))?;
        match self.encoders.get(&zid) {
            Some(encoder) => encoder(self, value, expected_type),
            None => encode::encode_record(self, value, expected_type),
        }
    }

    /// [`Codec::encode`] against the unconstrained type
    pub fn encode_any(&self, value: &Value) -> CodecResult<Json> {
        self.encode(value, &reference(generics::Z_ANY))
    }

    pub fn has_decoder(&self, zid: &str) -> bool {
        self.decoders.contains_key(zid)
    }

    pub fn has_encoder(&self, zid: &str) -> bool {
        self.encoders.contains_key(zid)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut decoders: Vec<_> = self.decoders.keys().collect();
        let mut encoders: Vec<_> = self.encoders.keys().collect();
        decoders.sort();
        encoders.sort();
        f.debug_struct("Codec")
            .field("decoders", &decoders)
            .field("encoders", &encoders)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_handlers_are_registered() {
        let codec = Codec::new();
        for zid in ["Z6", "Z9", "Z10", "Z21", "Z40", "Z86", "Z881", "Z882", "Z883"] {
            assert!(codec.has_decoder(zid), "missing decoder for {zid}");
        }
        for zid in ["Z1", "Z6", "Z9", "Z21", "Z40", "Z881", "Z882", "Z883"] {
            assert!(codec.has_encoder(zid), "missing encoder for {zid}");
        }
    }

    #[test]
    fn runtime_registration_takes_precedence_over_record_fallback() {
        let mut codec = Codec::new();
        codec.register_decoder("Z20000", |_, wire| {
            let n = wire["Z20000K1"]["Z6K1"].as_str().unwrap_or_default();
            Ok(Value::str(format!("#{n}")))
        });
        codec.register_encoder("Z20000", |_, value, _| match value {
            Value::Str(s) => Ok(json!({
                "Z1K1": reference("Z20000"),
                "Z20000K1": {"Z1K1": "Z6", "Z6K1": s.trim_start_matches('#')}
            })),
            other => Err(CodecError::Encode(other.to_string())),
        });

        let wire = json!({
            "Z1K1": reference("Z20000"),
            "Z20000K1": {"Z1K1": "Z6", "Z6K1": "7"}
        });
        let value = codec.decode(&wire).unwrap();
        assert_eq!(value, Value::str("#7"));
        assert_eq!(codec.encode(&value, &json!("Z20000")).unwrap(), wire);
    }

    #[test]
    fn decode_rejects_non_objects() {
        let codec = Codec::new();
        assert!(matches!(codec.decode(&json!(12)), Err(CodecError::Decode(_))));
        assert!(matches!(codec.decode(&json!([])), Err(CodecError::Decode(_))));
    }

    #[test]
    fn decode_without_type_tag_names_the_value() {
        let codec = Codec::new();
        let err = codec.decode(&json!({"K1": "x"})).unwrap_err();
        assert_eq!(err, CodecError::UnknownType(r#"{"K1":"x"}"#.to_string()));
    }

    #[test]
    fn encode_against_unusable_type_fails() {
        let codec = Codec::new();
        let err = codec
            .encode(&Value::str("x"), &json!({"Z1K1": "Z6", "Z6K1": "nope"}))
            .unwrap_err();
        assert!(matches!(err, CodecError::Encode(_)));
    }
}
