use serde::{Deserialize, Serialize};

/// What to do with a value whose kind has no cloning rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedPolicy {
    /// Emit an `Unsupported:<class>` node; it decodes to `undefined`.
    #[default]
    Tag,
    /// Refuse to encode or decode it.
    Fail,
}

/// What to do with a host global path the receiving realm cannot resolve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    #[default]
    Fail,
    /// Degrade to `undefined`.
    Undefined,
}

/// Knobs shared by the graph builder and the reconstructor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub unsupported: UnsupportedPolicy,
    pub unresolved: UnresolvedPolicy,
}

impl Options {
    pub fn strict() -> Self {
        Options {
            unsupported: UnsupportedPolicy::Fail,
            unresolved: UnresolvedPolicy::Fail,
        }
    }
}
