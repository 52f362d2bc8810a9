//! Isopod clones runtime object graphs across process boundaries while keeping
//! their identity structure intact.
//!
//! Core concepts:
//! - **Value**: a runtime datum; symbols and objects carry identity
//! - **Realm**: the ambient root (global object, intrinsics) values live in
//! - **ReferenceGraph**: a flat list of nodes where every shared or cyclic
//!   reference becomes a slot index
//! - **GraphBuilder**: walks a value into a graph (dehydration)
//! - **Reconstructor**: rebuilds a live graph in another realm (hydration)
//! - **HostGlobalIndex**: well-known values that are re-resolved by path
//!   instead of being copied
//!
//! # Example
//!
//! ```
//! use isopod_core::{Realm, Value, codec, deserialize, serialize};
//!
//! let sender = Realm::new();
//! let root = sender.new_object();
//! root.set("name", Value::from("loop"));
//! root.set("self", Value::from(&root));
//!
//! let wire = codec::to_json(&serialize(&sender, &Value::from(&root)).unwrap()).unwrap();
//!
//! let receiver = Realm::new();
//! let clone = deserialize(&receiver, &codec::from_json(&wire).unwrap()).unwrap();
//! let clone = clone.as_object().unwrap();
//! assert!(clone.get("self").unwrap().same(&Value::from(clone)));
//! assert_eq!(clone.get("name").unwrap().as_str(), Some("loop"));
//! ```
//!
//! # Memory
//!
//! Values are reference counted. A cyclic graph, whether built by hand or
//! rebuilt from a cyclic graph, is never freed while its cycle stands.

mod builder;
mod callable;
pub mod codec;
mod fingerprint;
mod host;
mod kind;
mod node;
mod options;
mod realm;
mod reconstruct;
mod tag;
mod value;

pub use builder::{EncodeError, GraphBuilder};
pub use callable::{CallError, Callable, CompileError, Compiler, NativeFn, RegistryCompiler};
pub use codec::CodecError;
pub use fingerprint::Fingerprint;
pub use host::{HostGlobalIndex, HostPath};
pub use node::{DehydratedNode, Entry, MalformedNode, Primitive, Ref, ReferenceGraph, Serialized, Source};
pub use options::{Options, UnresolvedPolicy, UnsupportedPolicy};
pub use realm::{Realm, RealmError};
pub use reconstruct::{DecodeError, Reconstructor};
pub use tag::{SpecialTag, TypeTag, UnknownTag, classify};
pub use value::{
    AccessError, CONSTRUCTOR_KEY, ErrorData, Getter, Object, ObjectKind, ObjectRef, PROTO_KEY, Property,
    PropertySlot, Symbol, Value, ValueKey, View, ViewKind, array_index,
};

/// Serializes `root` with default options.
pub fn serialize(realm: &Realm, root: &Value) -> Result<Serialized, EncodeError> {
    GraphBuilder::new(realm).serialize(root)
}

/// Rebuilds a serialized value in `realm` with default options and no
/// compiler.
pub fn deserialize(realm: &Realm, serialized: &Serialized) -> Result<Value, DecodeError> {
    Reconstructor::new(realm).deserialize(serialized)
}
