use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::host::HostGlobalIndex;
use crate::kind;
use crate::value::{Value, ViewKind};

/// Primitives that no text codec carries faithfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialTag {
    Undefined,
    Null,
    NaN,
    Infinity,
    NegInfinity,
}

impl SpecialTag {
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Undefined => Some(SpecialTag::Undefined),
            Value::Null => Some(SpecialTag::Null),
            Value::Number(n) if n.is_nan() => Some(SpecialTag::NaN),
            Value::Number(n) if *n == f64::INFINITY => Some(SpecialTag::Infinity),
            Value::Number(n) if *n == f64::NEG_INFINITY => Some(SpecialTag::NegInfinity),
            _ => None,
        }
    }

    pub fn value(self) -> Value {
        match self {
            SpecialTag::Undefined => Value::Undefined,
            SpecialTag::Null => Value::Null,
            SpecialTag::NaN => Value::Number(f64::NAN),
            SpecialTag::Infinity => Value::Number(f64::INFINITY),
            SpecialTag::NegInfinity => Value::Number(f64::NEG_INFINITY),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialTag::Undefined => "undefined",
            SpecialTag::Null => "null",
            SpecialTag::NaN => "NaN",
            SpecialTag::Infinity => "Infinity",
            SpecialTag::NegInfinity => "-Infinity",
        }
    }
}

const UNSUPPORTED_PREFIX: &str = "Unsupported:";

/// The closed set of node types.
///
/// On the wire a tag is its name: `"Object"`, `"Uint8Array"`, `"NaN"`,
/// `"HostGlobal"`, `"Unsupported:WeakMap"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Special(SpecialTag),
    Object,
    Array,
    Set,
    Map,
    Function,
    Symbol,
    RegExp,
    Error,
    Date,
    ArrayBuffer,
    View(ViewKind),
    HostGlobal,
    Unsupported(String),
}

impl TypeTag {
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            TypeTag::Special(special) => Cow::Borrowed(special.name()),
            TypeTag::Object => Cow::Borrowed("Object"),
            TypeTag::Array => Cow::Borrowed("Array"),
            TypeTag::Set => Cow::Borrowed("Set"),
            TypeTag::Map => Cow::Borrowed("Map"),
            TypeTag::Function => Cow::Borrowed("Function"),
            TypeTag::Symbol => Cow::Borrowed("Symbol"),
            TypeTag::RegExp => Cow::Borrowed("RegExp"),
            TypeTag::Error => Cow::Borrowed("Error"),
            TypeTag::Date => Cow::Borrowed("Date"),
            TypeTag::ArrayBuffer => Cow::Borrowed("ArrayBuffer"),
            TypeTag::View(kind) => Cow::Borrowed(kind.name()),
            TypeTag::HostGlobal => Cow::Borrowed("HostGlobal"),
            TypeTag::Unsupported(class) => Cow::Owned(format!("{UNSUPPORTED_PREFIX}{class}")),
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, TypeTag::View(_))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Error for a tag name outside the closed set.
#[derive(Debug, thiserror::Error)]
#[error("unknown type tag `{0}`")]
pub struct UnknownTag(pub String);

impl FromStr for TypeTag {
    type Err = UnknownTag;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if let Some(class) = name.strip_prefix(UNSUPPORTED_PREFIX) {
            return Ok(TypeTag::Unsupported(class.to_string()));
        }
        if let Some(kind) = ViewKind::from_name(name) {
            return Ok(TypeTag::View(kind));
        }
        let tag = match name {
            "undefined" => TypeTag::Special(SpecialTag::Undefined),
            "null" => TypeTag::Special(SpecialTag::Null),
            "NaN" => TypeTag::Special(SpecialTag::NaN),
            "Infinity" => TypeTag::Special(SpecialTag::Infinity),
            "-Infinity" => TypeTag::Special(SpecialTag::NegInfinity),
            "Object" => TypeTag::Object,
            "Array" => TypeTag::Array,
            "Set" => TypeTag::Set,
            "Map" => TypeTag::Map,
            "Function" => TypeTag::Function,
            "Symbol" => TypeTag::Symbol,
            "RegExp" => TypeTag::RegExp,
            "Error" => TypeTag::Error,
            "Date" => TypeTag::Date,
            "ArrayBuffer" => TypeTag::ArrayBuffer,
            "HostGlobal" => TypeTag::HostGlobal,
            other => return Err(UnknownTag(other.to_string())),
        };
        Ok(tag)
    }
}

impl Serialize for TypeTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Maps a value to its tag.
///
/// Special primitives come first, then membership in the host index, then
/// the kind registry in order. Anything left is `Unsupported`.
/// Plain primitives classify as `Unsupported` too; they never reach a node.
pub fn classify(value: &Value, index: &HostGlobalIndex) -> TypeTag {
    if let Some(special) = SpecialTag::of(value) {
        return TypeTag::Special(special);
    }
    if index.contains(value) {
        return TypeTag::HostGlobal;
    }
    if let Some(tag) = kind::REGISTRY.iter().find_map(|kind| (kind.classify)(value)) {
        return tag;
    }
    let class = match value {
        Value::Object(object) => object.class_name(),
        Value::Bool(_) => "Boolean".to_string(),
        Value::Number(_) => "Number".to_string(),
        Value::String(_) => "String".to_string(),
        _ => "Unknown".to_string(),
    };
    TypeTag::Unsupported(class)
}
