//! Text and binary encodings of [`Serialized`] values.
//!
//! The format itself is codec-agnostic; these helpers cover the two codecs
//! the crate is tested against.

use crate::node::Serialized;

/// Error type for codec helpers.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CBOR encode error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("CBOR decode error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),
}

pub fn to_json(serialized: &Serialized) -> Result<String, CodecError> {
    Ok(serde_json::to_string(serialized)?)
}

pub fn from_json(text: &str) -> Result<Serialized, CodecError> {
    Ok(serde_json::from_str(text)?)
}

pub fn to_cbor(serialized: &Serialized) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(serialized, &mut bytes)?;
    Ok(bytes)
}

pub fn from_cbor(bytes: &[u8]) -> Result<Serialized, CodecError> {
    Ok(ciborium::from_reader(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DehydratedNode, Primitive, Ref, ReferenceGraph, Source};
    use crate::tag::{SpecialTag, TypeTag};

    fn sample() -> Serialized {
        Serialized::Graph(ReferenceGraph::new(vec![
            DehydratedNode::new(TypeTag::Object)
                .with_key("ratio", Primitive::Number(0.5))
                .with_key("missing", Ref(1))
                .with_key("list", Ref(2)),
            DehydratedNode::new(TypeTag::Special(SpecialTag::Undefined)),
            DehydratedNode::new(TypeTag::Array)
                .with_source(Source::Entries(vec![Ref(0).into(), Primitive::Bool(false).into()])),
        ]))
    }

    #[test]
    fn json_text_matches_wire_shape() {
        let text = to_json(&sample()).unwrap();
        assert_eq!(
            text,
            r#"[{"type":"Object","keys":{"ratio":0.5,"missing":[1],"list":[2]}},{"type":"undefined"},{"type":"Array","source":[[0],false]}]"#
        );
        assert_eq!(from_json(&text).unwrap(), sample());
    }

    #[test]
    fn cbor_carries_the_same_graph() {
        let bytes = to_cbor(&sample()).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), sample());
    }

    #[test]
    fn truncated_input_is_an_error() {
        let bytes = to_cbor(&sample()).unwrap();
        assert!(from_cbor(&bytes[..bytes.len() / 2]).is_err());
        assert!(matches!(from_json("[{\"type\":"), Err(CodecError::Json(_))));
    }
}
