use std::fmt;

use crate::codec::{CodecError, to_cbor};
use crate::node::{ReferenceGraph, Serialized};

/// A 32-byte BLAKE3 hash of a graph's CBOR encoding.
///
/// Node order and key order are part of the encoding, so equal fingerprints
/// mean the builder produced the same graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_data(data: &[u8]) -> Self {
        Fingerprint(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Serialized {
    pub fn fingerprint(&self) -> Result<Fingerprint, CodecError> {
        to_cbor(self).map(|bytes| Fingerprint::from_data(&bytes))
    }
}

impl ReferenceGraph {
    pub fn fingerprint(&self) -> Result<Fingerprint, CodecError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)?;
        Ok(Fingerprint::from_data(&bytes))
    }
}
