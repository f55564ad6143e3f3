/// Native values produced by decoding and consumed by encoding
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;

/// In-process representation of a ZObject
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String literal (Z6, Z86)
    Str(String),
    /// Reference to another object by id (Z9)
    Reference(String),
    /// Z40 boolean
    Bool(bool),
    /// Unit / void / nothing (Z21, Z23, Z24)
    Unit,
    /// Typed list (Z881) or legacy list (Z10)
    List(Vec<Value>),
    /// Typed pair (Z882)
    Pair(ZPair),
    /// Typed map (Z883)
    Map(ZMap),
    /// Any other object, kept field by field
    Record(ZRecord),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Value::Reference(id.into())
    }

    pub fn pair(k1: Value, k2: Value) -> Self {
        Value::Pair(ZPair::new(k1, k2))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short shape name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Reference(_) => "reference",
            Value::Bool(_) => "boolean",
            Value::Unit => "unit",
            Value::List(_) => "list",
            Value::Pair(_) => "pair",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Reference(id) => write!(f, "{}", id),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Unit => write!(f, "unit"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Pair(pair) => write!(f, "({}, {})", pair.k1, pair.k2),
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Record(record) => {
                write!(f, "<")?;
                for (i, (k, v)) in record.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// Two-slot pair that remembers the type it was decoded with.
///
/// Equality only looks at the slots.
#[derive(Debug, Clone)]
pub struct ZPair {
    pub k1: Box<Value>,
    pub k2: Box<Value>,
    pub declared_type: Option<Json>,
}

impl ZPair {
    pub fn new(k1: Value, k2: Value) -> Self {
        Self {
            k1: Box::new(k1),
            k2: Box::new(k2),
            declared_type: None,
        }
    }

    pub fn with_type(mut self, declared_type: Json) -> Self {
        self.declared_type = Some(declared_type);
        self
    }
}

impl PartialEq for ZPair {
    fn eq(&self, other: &Self) -> bool {
        self.k1 == other.k1 && self.k2 == other.k2
    }
}

/// Insertion-ordered association; inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZMap {
    entries: Vec<(Value, Value)>,
}

impl ZMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl FromIterator<(Value, Value)> for ZMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = ZMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Object of a type the codec has no dedicated handler for
#[derive(Debug, Clone, PartialEq)]
pub struct ZRecord {
    /// The `Z1K1` the record was decoded with, reused when encoding
    pub declared_type: Option<Json>,
    pub fields: BTreeMap<String, Value>,
}

impl ZRecord {
    pub fn new(declared_type: Option<Json>) -> Self {
        Self {
            declared_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
