use crate::callable::{CompileError, Compiler};
use crate::host::HostPath;
use crate::kind::{Resolve, Shell, kind_for};
use crate::node::{DehydratedNode, Ref, ReferenceGraph, Serialized};
use crate::options::Options;
use crate::realm::{Realm, RealmError};
use crate::value::{CONSTRUCTOR_KEY, ObjectRef, PROTO_KEY, Property, Value, array_index};

/// Error type for deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("graph has no nodes")]
    EmptyGraph,
    #[error("reference [{target}] is out of range for a graph of {len} nodes")]
    DanglingRef { target: usize, len: usize },
    #[error("reference [{target}] is used before its slot is built")]
    Unbuilt { target: usize },
    #[error("slot {slot}: source does not fit type {tag}")]
    MalformedSource { slot: usize, tag: String },
    #[error("slot {slot}: view buffer [{target}] is not an ArrayBuffer")]
    NotABuffer { slot: usize, target: usize },
    #[error("slot {slot}: cannot rebuild view")]
    View {
        slot: usize,
        #[source]
        source: RealmError,
    },
    #[error("slot {slot}: cannot rebuild callable")]
    Compile {
        slot: usize,
        #[source]
        source: CompileError,
    },
    #[error("slot {slot}: host global {path} does not exist in this realm")]
    UnresolvedSingleton { slot: usize, path: HostPath },
    #[error("slot {slot}: no cloning rule for {class}")]
    Unsupported { slot: usize, class: String },
    #[error("slot {slot}: `__proto__` must reference an object or null")]
    InvalidPrototype { slot: usize },
    #[error("slot {slot}: prototype link would form a cycle")]
    PrototypeCycle { slot: usize },
    #[error("slot {slot}: index key `{key}` belongs in the source")]
    IndexKey { slot: usize, key: String },
}

/// Live values of a graph being rebuilt, indexed by slot.
struct Slots {
    values: Vec<Option<Value>>,
}

impl Resolve for Slots {
    fn resolve_ref(&self, target: Ref) -> Result<Value, DecodeError> {
        match self.values.get(target.0) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(DecodeError::Unbuilt { target: target.0 }),
            None => Err(DecodeError::DanglingRef {
                target: target.0,
                len: self.values.len(),
            }),
        }
    }
}

/// Rebuilds a live value graph from a [`ReferenceGraph`].
///
/// Three passes over the nodes:
/// 1. every node except buffer views gets an empty shell;
/// 2. views are built over the shells of their buffers;
/// 3. containers are filled and `keys` applied, resolving references
///    through the slot table.
///
/// Aliasing survives because every reference resolves to the one shell
/// built for its slot.
pub struct Reconstructor<'r> {
    realm: &'r Realm,
    compiler: Option<&'r dyn Compiler>,
    options: Options,
}

impl<'r> Reconstructor<'r> {
    pub fn new(realm: &'r Realm) -> Self {
        Reconstructor {
            realm,
            compiler: None,
            options: Options::default(),
        }
    }

    /// Rebuild callables through `compiler`. Without one they come back
    /// inert.
    pub fn with_compiler(mut self, compiler: &'r dyn Compiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn deserialize(&self, serialized: &Serialized) -> Result<Value, DecodeError> {
        match serialized {
            Serialized::Primitive(primitive) => Ok(primitive.to_value()),
            Serialized::Graph(graph) => self.rebuild(graph),
        }
    }

    pub fn rebuild(&self, graph: &ReferenceGraph) -> Result<Value, DecodeError> {
        if graph.is_empty() {
            return Err(DecodeError::EmptyGraph);
        }
        let nodes = graph.nodes();
        let mut slots = Slots {
            values: vec![None; nodes.len()],
        };

        for deferred in [false, true] {
            for (slot, node) in nodes.iter().enumerate() {
                let kind = kind_for(&node.tag);
                if kind.deferred != deferred {
                    continue;
                }
                let value = (kind.construct)(&self.shell(slot, node, &slots))?;
                log::trace!("slot {}: built {}", slot, node.tag);
                slots.values[slot] = Some(value);
            }
        }

        for (slot, node) in nodes.iter().enumerate() {
            let kind = kind_for(&node.tag);
            let target = slots.resolve_ref(Ref(slot))?;
            (kind.hydrate)(&self.shell(slot, node, &slots), &target)?;
            if let (true, Some(object)) = (kind.keyed, target.as_object()) {
                apply_keys(slot, node, object, kind.indexed, &slots)?;
            }
        }

        log::debug!("rebuilt graph of {} nodes", nodes.len());
        slots.resolve_ref(Ref(0))
    }

    fn shell<'a>(&'a self, slot: usize, node: &'a DehydratedNode, slots: &'a Slots) -> Shell<'a> {
        Shell {
            slot,
            node,
            realm: self.realm,
            compiler: self.compiler,
            options: self.options,
            slots,
        }
    }
}

fn apply_keys(
    slot: usize,
    node: &DehydratedNode,
    object: &ObjectRef,
    indexed: bool,
    slots: &Slots,
) -> Result<(), DecodeError> {
    for (key, entry) in &node.keys {
        if indexed && array_index(key).is_some() {
            return Err(DecodeError::IndexKey { slot, key: key.clone() });
        }
        let value = slots.resolve(entry)?;
        match key.as_str() {
            PROTO_KEY => {
                let prototype = match value {
                    Value::Null => None,
                    Value::Object(prototype) => Some(prototype),
                    _ => return Err(DecodeError::InvalidPrototype { slot }),
                };
                if !object.set_prototype(prototype) {
                    return Err(DecodeError::PrototypeCycle { slot });
                }
            }
            CONSTRUCTOR_KEY => {
                // Restore the constructor's back-link, which is not enumerable
                // and so never travels on its own.
                if let Some(constructor) = value.as_object() {
                    if constructor.own_property("prototype").is_none() {
                        constructor.define("prototype", Property::hidden(Value::from(object)));
                    }
                }
                object.define(CONSTRUCTOR_KEY, Property::hidden(value));
            }
            _ => object.set(key, value),
        }
    }
    Ok(())
}
