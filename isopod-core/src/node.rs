//! Wire representation of a dehydrated value graph.
//!
//! A graph is a sequence of nodes, `{type, source?, keys?}`, with the root at
//! slot 0. References inside `source` and `keys` are one-element sequences
//! holding a slot number; arrays are never inlined, so a one-element sequence
//! in an entry position is always a [`Ref`].
//!
//! Decoding goes through a `ciborium::Value` intermediate: the shape of a
//! node's `source` depends on its `type`, so the raw tree is interpreted
//! once the tag is known. That makes the format readable from any
//! self-describing serde codec.

use std::fmt;

use ciborium::Value as Raw;
use indexmap::IndexMap;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::host::HostPath;
use crate::tag::TypeTag;
use crate::value::Value;

/// Largest integer an `f64` holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Error for an encoded node that does not match its declared type.
#[derive(Debug, thiserror::Error)]
#[error("malformed node: {0}")]
pub struct MalformedNode(pub String);

fn malformed(message: impl Into<String>) -> MalformedNode {
    MalformedNode(message.into())
}

/// Index of a node in its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ref(pub usize);

impl Serialize for Ref {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(std::iter::once(self.0 as u64))
    }
}

impl Ref {
    fn decode(raw: &Raw) -> Result<Self, MalformedNode> {
        match raw.as_array().map(Vec::as_slice) {
            Some([slot]) => decode_index(slot).map(Ref),
            _ => Err(malformed("reference must be a one-element sequence")),
        }
    }
}

/// A value that is carried inline.
#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Primitive {
    /// The inline form of a plain primitive; `None` for anything that needs a
    /// node.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Primitive::Bool(*b)),
            Value::Number(n) if n.is_finite() => Some(Primitive::Number(*n)),
            Value::String(s) => Some(Primitive::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Primitive::Bool(b) => Value::Bool(*b),
            Primitive::Number(n) => Value::Number(*n),
            Primitive::String(s) => Value::String(s.clone()),
        }
    }

    fn decode(raw: &Raw) -> Result<Self, MalformedNode> {
        match raw {
            Raw::Bool(b) => Ok(Primitive::Bool(*b)),
            Raw::Text(s) => Ok(Primitive::String(s.clone())),
            Raw::Null => Err(malformed("null is only carried as a node")),
            other => decode_number(other).map(Primitive::Number),
        }
    }
}

impl Serialize for Primitive {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Primitive::Bool(b) => serializer.serialize_bool(*b),
            Primitive::Number(n) => serialize_number(*n, serializer),
            Primitive::String(s) => serializer.serialize_str(s),
        }
    }
}

/// Integral numbers go out as integers so that text codecs print `1`, not
/// `1.0`. Negative zero stays a float.
fn serialize_number<S: Serializer>(n: f64, serializer: S) -> Result<S::Ok, S::Error> {
    let integral = n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER && !(n == 0.0 && n.is_sign_negative());
    if integral {
        serializer.serialize_i64(n as i64)
    } else {
        serializer.serialize_f64(n)
    }
}

fn decode_number(raw: &Raw) -> Result<f64, MalformedNode> {
    match raw {
        Raw::Integer(i) => Ok(i128::from(*i) as f64),
        Raw::Float(f) => Ok(*f),
        _ => Err(malformed("expected a number")),
    }
}

fn decode_index(raw: &Raw) -> Result<usize, MalformedNode> {
    raw.as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| malformed("expected a non-negative integer"))
}

fn decode_text(raw: &Raw) -> Result<String, MalformedNode> {
    raw.as_text()
        .map(str::to_string)
        .ok_or_else(|| malformed("expected a string"))
}

fn decode_array(raw: &Raw) -> Result<&[Raw], MalformedNode> {
    raw.as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| malformed("expected a sequence"))
}

fn field<'a>(map: &'a [(Raw, Raw)], name: &str) -> Option<&'a Raw> {
    map.iter()
        .find(|(key, _)| key.as_text() == Some(name))
        .map(|(_, value)| value)
}

/// A position in `source` or `keys`: either a reference or an inline value.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Ref(Ref),
    Primitive(Primitive),
}

impl Entry {
    pub fn reference(&self) -> Option<Ref> {
        match self {
            Entry::Ref(r) => Some(*r),
            Entry::Primitive(_) => None,
        }
    }

    fn decode(raw: &Raw) -> Result<Self, MalformedNode> {
        if raw.is_array() {
            Ref::decode(raw).map(Entry::Ref)
        } else {
            Primitive::decode(raw).map(Entry::Primitive)
        }
    }
}

impl From<Ref> for Entry {
    fn from(r: Ref) -> Self {
        Entry::Ref(r)
    }
}

impl From<Primitive> for Entry {
    fn from(p: Primitive) -> Self {
        Entry::Primitive(p)
    }
}

impl Serialize for Entry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Entry::Ref(r) => r.serialize(serializer),
            Entry::Primitive(p) => p.serialize(serializer),
        }
    }
}

/// Type-specific payload of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    /// Array elements or set members.
    Entries(Vec<Entry>),
    /// Map entries as `[key, value]` pairs.
    Pairs(Vec<(Entry, Entry)>),
    /// Callable source text or symbol label.
    Text(String),
    /// `[pattern, flags]` of a regular expression.
    Pattern { pattern: String, flags: String },
    Failure {
        message: Option<String>,
        stack: Option<String>,
    },
    /// Milliseconds since the epoch. An invalid date travels as `null`.
    Epoch(f64),
    Bytes(Vec<u8>),
    View {
        buffer: Ref,
        byte_offset: usize,
        length: usize,
    },
    Path(HostPath),
}

struct FailureFields<'a> {
    message: &'a Option<String>,
    stack: &'a Option<String>,
}

impl Serialize for FailureFields<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let len = usize::from(self.message.is_some()) + usize::from(self.stack.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(message) = self.message {
            map.serialize_entry("message", message)?;
        }
        if let Some(stack) = self.stack {
            map.serialize_entry("stack", stack)?;
        }
        map.end()
    }
}

impl Serialize for Source {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            Source::Entries(entries) => serializer.collect_seq(entries),
            Source::Pairs(pairs) => serializer.collect_seq(pairs.iter().map(|(k, v)| [k, v])),
            Source::Text(text) => serializer.serialize_str(text),
            Source::Pattern { pattern, flags } => serializer.collect_seq([pattern, flags]),
            Source::Failure { message, stack } => FailureFields { message, stack }.serialize(serializer),
            Source::Epoch(millis) if millis.is_finite() => serialize_number(*millis, serializer),
            Source::Epoch(_) => serializer.serialize_none(),
            Source::Bytes(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for byte in bytes {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            Source::View {
                buffer,
                byte_offset,
                length,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("buffer", buffer)?;
                map.serialize_entry("byteOffset", byte_offset)?;
                map.serialize_entry("length", length)?;
                map.end()
            }
            Source::Path(path) => path.serialize(serializer),
        }
    }
}

impl Source {
    /// Interprets a raw payload according to the node's tag.
    fn decode(tag: &TypeTag, raw: &Raw) -> Result<Option<Self>, MalformedNode> {
        let source = match tag {
            TypeTag::Date if raw.is_null() => Source::Epoch(f64::NAN),
            _ if raw.is_null() => return Ok(None),
            TypeTag::Array | TypeTag::Set => Source::Entries(
                decode_array(raw)?
                    .iter()
                    .map(Entry::decode)
                    .collect::<Result<_, _>>()?,
            ),
            TypeTag::Map => Source::Pairs(
                decode_array(raw)?
                    .iter()
                    .map(|pair| match decode_array(pair)? {
                        [key, value] => Ok((Entry::decode(key)?, Entry::decode(value)?)),
                        _ => Err(malformed("map entry must be a [key, value] pair")),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            TypeTag::Function | TypeTag::Symbol => Source::Text(decode_text(raw)?),
            TypeTag::RegExp => match decode_array(raw)? {
                [pattern, flags] => Source::Pattern {
                    pattern: decode_text(pattern)?,
                    flags: decode_text(flags)?,
                },
                _ => return Err(malformed("regexp source must be [pattern, flags]")),
            },
            TypeTag::Error => {
                let map = raw.as_map().ok_or_else(|| malformed("error source must be a map"))?;
                let optional_text = |name| field(map, name).filter(|v| !v.is_null()).map(decode_text).transpose();
                Source::Failure {
                    message: optional_text("message")?,
                    stack: optional_text("stack")?,
                }
            }
            TypeTag::Date => Source::Epoch(decode_number(raw)?),
            TypeTag::ArrayBuffer => match raw {
                Raw::Bytes(bytes) => Source::Bytes(bytes.clone()),
                _ => Source::Bytes(
                    decode_array(raw)?
                        .iter()
                        .map(|b| {
                            decode_index(b)
                                .ok()
                                .and_then(|b| u8::try_from(b).ok())
                                .ok_or_else(|| malformed("buffer byte out of range"))
                        })
                        .collect::<Result<_, _>>()?,
                ),
            },
            TypeTag::View(_) => {
                let map = raw.as_map().ok_or_else(|| malformed("view source must be a map"))?;
                let required = |name: &str| field(map, name).ok_or_else(|| malformed(format!("view source lacks `{name}`")));
                Source::View {
                    buffer: Ref::decode(required("buffer")?)?,
                    byte_offset: decode_index(required("byteOffset")?)?,
                    length: decode_index(required("length")?)?,
                }
            }
            TypeTag::HostGlobal => Source::Path(
                decode_array(raw)?
                    .iter()
                    .map(decode_text)
                    .collect::<Result<HostPath, _>>()?,
            ),
            TypeTag::Special(_) | TypeTag::Object | TypeTag::Unsupported(_) => {
                return Err(malformed(format!("{tag} nodes carry no source")));
            }
        };
        Ok(Some(source))
    }
}

/// One slot of a [`ReferenceGraph`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DehydratedNode {
    #[serde(rename = "type")]
    pub tag: TypeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub keys: IndexMap<String, Entry>,
}

impl DehydratedNode {
    pub fn new(tag: TypeTag) -> Self {
        DehydratedNode {
            tag,
            source: None,
            keys: IndexMap::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>, entry: impl Into<Entry>) -> Self {
        self.keys.insert(key.into(), entry.into());
        self
    }

    fn decode(raw: &Raw) -> Result<Self, MalformedNode> {
        let map = raw.as_map().ok_or_else(|| malformed("node must be a map"))?;
        let tag = field(map, "type")
            .and_then(Raw::as_text)
            .ok_or_else(|| malformed("node lacks a `type`"))?
            .parse::<TypeTag>()
            .map_err(|e| malformed(e.to_string()))?;
        let source = match field(map, "source") {
            Some(raw) => Source::decode(&tag, raw)?,
            None => None,
        };
        let mut keys = IndexMap::new();
        match field(map, "keys") {
            Some(Raw::Map(entries)) => {
                for (key, value) in entries {
                    let key = decode_text(key)?;
                    keys.insert(key, Entry::decode(value)?);
                }
            }
            Some(Raw::Null) | None => {}
            Some(_) => return Err(malformed("`keys` must be a map")),
        }
        Ok(DehydratedNode { tag, source, keys })
    }
}

impl<'de> Deserialize<'de> for DehydratedNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Raw::deserialize(deserializer)?;
        DehydratedNode::decode(&raw).map_err(serde::de::Error::custom)
    }
}

/// The flat, identity-indexed form of a value graph. Slot 0 is the root.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceGraph {
    nodes: Vec<DehydratedNode>,
}

impl ReferenceGraph {
    pub fn new(nodes: Vec<DehydratedNode>) -> Self {
        ReferenceGraph { nodes }
    }

    pub fn nodes(&self) -> &[DehydratedNode] {
        &self.nodes
    }

    pub fn node(&self, slot: usize) -> Option<&DehydratedNode> {
        self.nodes.get(slot)
    }

    pub fn root(&self) -> Option<&DehydratedNode> {
        self.nodes.first()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Vec<DehydratedNode> {
        self.nodes
    }
}

/// Output of serialization: a plain primitive passes through untouched,
/// everything else becomes a graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Serialized {
    Primitive(Primitive),
    Graph(ReferenceGraph),
}

impl Serialized {
    pub fn as_graph(&self) -> Option<&ReferenceGraph> {
        match self {
            Serialized::Graph(graph) => Some(graph),
            Serialized::Primitive(_) => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Serialized::Primitive(primitive) => Some(primitive),
            Serialized::Graph(_) => None,
        }
    }
}

impl Serialize for Serialized {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Serialized::Primitive(primitive) => primitive.serialize(serializer),
            Serialized::Graph(graph) => graph.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Serialized {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Raw::deserialize(deserializer)?;
        let decoded = match &raw {
            Raw::Array(nodes) => nodes
                .iter()
                .map(DehydratedNode::decode)
                .collect::<Result<Vec<_>, _>>()
                .map(|nodes| Serialized::Graph(ReferenceGraph::new(nodes))),
            other => Primitive::decode(other).map(Serialized::Primitive),
        };
        decoded.map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::SpecialTag;
    use crate::value::ViewKind;

    fn json(serialized: &Serialized) -> serde_json::Value {
        serde_json::to_value(serialized).unwrap()
    }

    fn parse(text: &str) -> Serialized {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn refs_are_single_element_sequences() {
        let node = DehydratedNode::new(TypeTag::Object)
            .with_key("a", Primitive::Number(1.0))
            .with_key("b", Ref(1));
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value, serde_json::json!({"type": "Object", "keys": {"a": 1, "b": [1]}}));
    }

    #[test]
    fn fractional_and_negative_zero_stay_floats() {
        let entries = Source::Entries(vec![
            Primitive::Number(1.5).into(),
            Primitive::Number(-0.0).into(),
        ]);
        let text = serde_json::to_string(&entries).unwrap();
        assert_eq!(text, "[1.5,-0.0]");
    }

    #[test]
    fn decodes_sources_by_tag() {
        let decoded = parse(
            r#"[
                {"type": "Map", "source": [[[1], "v"]]},
                {"type": "RegExp", "source": ["a+", "gi"]},
                {"type": "Error", "source": {"message": "boom"}},
                {"type": "Date", "source": null},
                {"type": "Uint16Array", "source": {"buffer": [5], "byteOffset": 2, "length": 3}},
                {"type": "HostGlobal", "source": ["Symbol", "iterator"]},
                {"type": "NaN"}
            ]"#,
        );
        let graph = decoded.as_graph().unwrap();
        assert_eq!(graph.len(), 7);
        assert_eq!(
            graph.node(0).unwrap().source,
            Some(Source::Pairs(vec![(Ref(1).into(), Primitive::String("v".into()).into())]))
        );
        assert_eq!(
            graph.node(2).unwrap().source,
            Some(Source::Failure {
                message: Some("boom".into()),
                stack: None
            })
        );
        assert!(matches!(graph.node(3).unwrap().source, Some(Source::Epoch(n)) if n.is_nan()));
        assert_eq!(graph.node(4).unwrap().tag, TypeTag::View(ViewKind::Uint16));
        assert_eq!(
            graph.node(4).unwrap().source,
            Some(Source::View {
                buffer: Ref(5),
                byte_offset: 2,
                length: 3
            })
        );
        assert_eq!(graph.node(6).unwrap().tag, TypeTag::Special(SpecialTag::NaN));
    }

    #[test]
    fn rejects_mismatched_sources() {
        assert!(serde_json::from_str::<Serialized>(r#"[{"type": "Array", "source": "text"}]"#).is_err());
        assert!(serde_json::from_str::<Serialized>(r#"[{"type": "Object", "source": [1]}]"#).is_err());
        assert!(serde_json::from_str::<Serialized>(r#"[{"type": "Array", "source": [[1, 2]]}]"#).is_err());
        assert!(serde_json::from_str::<Serialized>(r#"[{"type": "Promise"}]"#).is_err());
        assert!(serde_json::from_str::<Serialized>("null").is_err());
    }

    #[test]
    fn primitives_pass_through() {
        assert_eq!(parse("5"), Serialized::Primitive(Primitive::Number(5.0)));
        assert_eq!(parse("\"hi\""), Serialized::Primitive(Primitive::String("hi".into())));
        assert_eq!(json(&Serialized::Primitive(Primitive::Bool(true))), serde_json::json!(true));
    }

    #[test]
    fn bytes_and_failures_encode_compactly() {
        let buffer = DehydratedNode::new(TypeTag::ArrayBuffer).with_source(Source::Bytes(vec![0, 255]));
        let error = DehydratedNode::new(TypeTag::Error).with_source(Source::Failure {
            message: None,
            stack: Some("at f".into()),
        });
        let graph = Serialized::Graph(ReferenceGraph::new(vec![buffer, error]));
        assert_eq!(
            json(&graph),
            serde_json::json!([
                {"type": "ArrayBuffer", "source": [0, 255]},
                {"type": "Error", "source": {"stack": "at f"}}
            ])
        );
    }
}
