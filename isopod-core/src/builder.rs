use std::collections::HashMap;

use indexmap::IndexMap;

use crate::host::{HostGlobalIndex, HostPath};
use crate::kind::{Dehydrate, Kind, kind_for};
use crate::node::{DehydratedNode, Entry, Primitive, Ref, ReferenceGraph, Serialized};
use crate::options::{Options, UnsupportedPolicy};
use crate::realm::Realm;
use crate::tag::{SpecialTag, TypeTag, classify};
use crate::value::{
    AccessError, CONSTRUCTOR_KEY, Identity, ObjectRef, PROTO_KEY, PropertySlot, Value, array_index,
};

/// Error type for serialization.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("no cloning rule for {0}")]
    Unsupported(String),
    #[error("reading property `{key}` threw")]
    PropertyAccess {
        key: String,
        #[source]
        source: AccessError,
    },
}

/// Identity cache key. Special primitives are deduplicated by tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKey {
    Special(SpecialTag),
    Reference(Identity),
}

impl CacheKey {
    fn of(value: &Value) -> Self {
        match value.identity() {
            Some(identity) => CacheKey::Reference(identity),
            None => CacheKey::Special(SpecialTag::of(value).unwrap_or(SpecialTag::Undefined)),
        }
    }
}

/// Turns a value graph into a [`ReferenceGraph`].
///
/// Every distinct reference gets exactly one slot, reserved the moment it is
/// first seen, so shared and cyclic structure comes out as back-references.
/// Work is kept on an explicit stack; deep graphs do not grow the call stack.
pub struct GraphBuilder<'r> {
    realm: &'r Realm,
    options: Options,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(realm: &'r Realm) -> Self {
        GraphBuilder {
            realm,
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Serializes `root`. Booleans, finite numbers and strings come back
    /// unchanged; anything else becomes a graph rooted at slot 0.
    pub fn serialize(&self, root: &Value) -> Result<Serialized, EncodeError> {
        if let Some(primitive) = Primitive::of(root) {
            return Ok(Serialized::Primitive(primitive));
        }

        let mut walk = Walk::new(self.realm.host_index());
        walk.dehydrate(root);
        while let Some((slot, value)) = walk.pending.pop() {
            let node = self.build_node(&mut walk, &value)?;
            log::trace!("slot {}: {}", slot, node.tag);
            walk.nodes[slot] = Some(node);
        }

        let nodes: Vec<DehydratedNode> = walk.nodes.into_iter().flatten().collect();
        log::debug!("serialized graph with {} nodes", nodes.len());
        Ok(Serialized::Graph(ReferenceGraph::new(nodes)))
    }

    fn build_node(&self, walk: &mut Walk<'_>, value: &Value) -> Result<DehydratedNode, EncodeError> {
        let tag = classify(value, walk.index);
        if let TypeTag::Unsupported(class) = &tag {
            if self.options.unsupported == UnsupportedPolicy::Fail {
                return Err(EncodeError::Unsupported(class.clone()));
            }
            log::warn!("no cloning rule for {}, tagging it unsupported", class);
        }

        let kind = kind_for(&tag);
        let source = (kind.extract)(value, &mut *walk);
        let keys = match value.as_object() {
            Some(object) if kind.keyed => self.keys(walk, object, kind)?,
            _ => IndexMap::new(),
        };
        Ok(DehydratedNode { tag, source, keys })
    }

    /// Own enumerable properties not already carried by `source`, plus the
    /// prototype and constructor links when they are not the defaults.
    fn keys(&self, walk: &mut Walk<'_>, object: &ObjectRef, kind: &Kind) -> Result<IndexMap<String, Entry>, EncodeError> {
        let mut keys = IndexMap::new();

        let class = object.class_name();
        match object.prototype() {
            None => {
                keys.insert(PROTO_KEY.to_string(), walk.dehydrate(&Value::Null));
            }
            Some(prototype) => {
                let default = self.realm.prototype(&class);
                if !default.is_some_and(|default| default.ptr_eq(&prototype)) {
                    keys.insert(PROTO_KEY.to_string(), walk.dehydrate_object(&prototype).into());
                }
            }
        }

        if let Some(constructor) = self.own_constructor(object) {
            keys.insert(CONSTRUCTOR_KEY.to_string(), walk.dehydrate_object(&constructor).into());
        }

        for (key, property) in object.own_properties() {
            if !property.enumerable || (kind.indexed && array_index(&key).is_some()) {
                continue;
            }
            if key == PROTO_KEY {
                log::warn!("own property `{}` collides with the prototype link, dropped", PROTO_KEY);
                continue;
            }
            let value = property
                .read()
                .map_err(|source| EncodeError::PropertyAccess { key: key.clone(), source })?;
            let entry = walk.dehydrate(&value);
            keys.insert(key, entry);
        }
        Ok(keys)
    }

    /// A user-defined constructor that `object` is the prototype of.
    fn own_constructor(&self, object: &ObjectRef) -> Option<ObjectRef> {
        let property = object.own_property(CONSTRUCTOR_KEY)?;
        let PropertySlot::Data(Value::Object(constructor)) = property.slot else {
            return None;
        };
        if self.realm.is_intrinsic_constructor(&constructor) {
            return None;
        }
        let back_link = constructor.own_property("prototype")?;
        match back_link.slot {
            PropertySlot::Data(Value::Object(prototype)) if prototype.ptr_eq(object) => Some(constructor),
            _ => None,
        }
    }
}

/// State of one serialize call: the node arena, the identity cache and the
/// values whose slots are reserved but not yet filled.
///
/// The cache is keyed on allocation addresses, so every reserved value is
/// retained until the walk ends. Otherwise a value produced by a getter could
/// be freed and its address reused by an unrelated allocation.
struct Walk<'a> {
    index: &'a HostGlobalIndex,
    cache: HashMap<CacheKey, usize>,
    nodes: Vec<Option<DehydratedNode>>,
    pending: Vec<(usize, Value)>,
    retained: Vec<Value>,
}

impl<'a> Walk<'a> {
    fn new(index: &'a HostGlobalIndex) -> Self {
        Walk {
            index,
            cache: HashMap::new(),
            nodes: Vec::new(),
            pending: Vec::new(),
            retained: Vec::new(),
        }
    }

    fn reserve(&mut self, key: CacheKey, value: &Value) -> Ref {
        if let Some(&slot) = self.cache.get(&key) {
            return Ref(slot);
        }
        let slot = self.nodes.len();
        self.nodes.push(None);
        self.cache.insert(key, slot);
        self.retained.push(value.clone());
        self.pending.push((slot, value.clone()));
        Ref(slot)
    }
}

impl Dehydrate for Walk<'_> {
    fn dehydrate(&mut self, value: &Value) -> Entry {
        if let Some(primitive) = Primitive::of(value) {
            return primitive.into();
        }
        self.reserve(CacheKey::of(value), value).into()
    }

    fn dehydrate_object(&mut self, object: &ObjectRef) -> Ref {
        let value = Value::from(object);
        self.reserve(CacheKey::of(&value), &value)
    }

    fn host_path(&self, value: &Value) -> Option<HostPath> {
        self.index.path_of(value).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::callable::Callable;
    use crate::node::Source;
    use crate::value::{Getter, Object, ObjectKind, Property, Symbol};

    fn build(realm: &Realm, root: &Value) -> ReferenceGraph {
        match GraphBuilder::new(realm).serialize(root).unwrap() {
            Serialized::Graph(graph) => graph,
            Serialized::Primitive(p) => panic!("expected a graph, got {p:?}"),
        }
    }

    #[test]
    fn plain_primitives_pass_through() {
        let realm = Realm::new();
        let builder = GraphBuilder::new(&realm);
        assert_eq!(
            builder.serialize(&Value::from(5)).unwrap(),
            Serialized::Primitive(Primitive::Number(5.0))
        );
        assert_eq!(
            builder.serialize(&Value::from("x")).unwrap(),
            Serialized::Primitive(Primitive::String("x".into()))
        );
    }

    #[test]
    fn object_with_nested_array() {
        let realm = Realm::new();
        let root = realm.new_object();
        root.set("a", Value::from(1));
        root.set("b", realm.new_array([1, 2, 3].map(Value::from)).into());

        let graph = build(&realm, &root.into());
        let expected = vec![
            DehydratedNode::new(TypeTag::Object)
                .with_key("a", Primitive::Number(1.0))
                .with_key("b", Ref(1)),
            DehydratedNode::new(TypeTag::Array).with_source(Source::Entries(
                [1.0, 2.0, 3.0].map(|n| Entry::from(Primitive::Number(n))).to_vec(),
            )),
        ];
        assert_eq!(graph.nodes(), expected.as_slice());
    }

    #[test]
    fn special_primitives_become_nodes() {
        let realm = Realm::new();
        let graph = build(&realm, &Value::Number(f64::NAN));
        assert_eq!(graph.nodes(), [DehydratedNode::new(TypeTag::Special(SpecialTag::NaN))]);

        let array = realm.new_array([Value::Undefined, Value::Null, Value::Undefined]);
        let graph = build(&realm, &array.into());
        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.node(0).unwrap().source,
            Some(Source::Entries(vec![Ref(1).into(), Ref(2).into(), Ref(1).into()]))
        );
    }

    #[test]
    fn shared_references_take_one_slot() {
        let realm = Realm::new();
        let symbol = Value::from(Symbol::new(Some("s")));
        let root = realm.new_object();
        root.set("a", symbol.clone());
        root.set("b", realm.new_array([symbol.clone(), symbol]).into());

        let graph = build(&realm, &root.into());
        let symbols = graph.nodes().iter().filter(|node| node.tag == TypeTag::Symbol).count();
        assert_eq!(symbols, 1);
    }

    #[test]
    fn cycles_point_back_at_reserved_slots() {
        let realm = Realm::new();
        let root = realm.new_object();
        root.set("self", Value::from(&root));

        let graph = build(&realm, &root.into());
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.node(0).unwrap().keys.get("self"), Some(&Entry::Ref(Ref(0))));
    }

    #[test]
    fn intrinsics_are_host_globals() {
        let realm = Realm::new();
        let iterator = realm.well_known_symbol("iterator").unwrap();
        let graph = build(&realm, &realm.new_array([Value::from(iterator)]).into());
        let node = graph.node(1).unwrap();
        assert_eq!(node.tag, TypeTag::HostGlobal);
        assert_eq!(
            node.source,
            Some(Source::Path(["Symbol", "iterator"].into_iter().collect()))
        );
        assert!(node.keys.is_empty());
    }

    #[test]
    fn non_default_prototypes_are_recorded() {
        let realm = Realm::new();
        let bare = realm.new_object_with_prototype(None);
        let graph = build(&realm, &bare.into());
        assert_eq!(graph.node(0).unwrap().keys.get(PROTO_KEY), Some(&Entry::Ref(Ref(1))));
        assert_eq!(graph.node(1).unwrap().tag, TypeTag::Special(SpecialTag::Null));

        let plain = realm.new_object();
        let graph = graph_of(&realm, &plain);
        assert!(graph.node(0).unwrap().keys.is_empty());
    }

    fn graph_of(realm: &Realm, object: &ObjectRef) -> ReferenceGraph {
        build(realm, &Value::from(object))
    }

    #[test]
    fn user_constructors_are_linked() {
        let realm = Realm::new();
        let prototype = realm.new_object();
        let constructor = realm.new_function(Callable::inert("function Point() {}"));
        constructor.define("prototype", Property::hidden(Value::from(&prototype)));
        prototype.define(CONSTRUCTOR_KEY, Property::hidden(Value::from(&constructor)));

        let instance = realm.new_object_with_prototype(Some(prototype.clone()));
        let graph = graph_of(&realm, &instance);
        let prototype_node = graph.node(1).unwrap();
        assert_eq!(prototype_node.tag, TypeTag::Object);
        assert_eq!(prototype_node.keys.get(CONSTRUCTOR_KEY), Some(&Entry::Ref(Ref(2))));
        assert_eq!(graph.node(2).unwrap().tag, TypeTag::Function);
    }

    #[test]
    fn unsupported_values_follow_policy() {
        let realm = Realm::new();
        let root = realm.new_array([Value::from(realm.new_host_object("WeakMap"))]);

        let tagged = graph_of(&realm, &root);
        assert_eq!(tagged.node(1).unwrap().tag, TypeTag::Unsupported("WeakMap".into()));

        let strict = GraphBuilder::new(&realm).with_options(Options::strict());
        assert!(matches!(
            strict.serialize(&root.into()),
            Err(EncodeError::Unsupported(class)) if class == "WeakMap"
        ));
    }

    #[test]
    fn getter_results_keep_their_own_slots() {
        let realm = Realm::new();
        let counter = Rc::new(Cell::new(0));
        let prototype = realm.prototype("Object").unwrap().clone();
        let fresh: Getter = Rc::new(move || {
            counter.set(counter.get() + 1);
            let object = ObjectRef::new(Object::new(ObjectKind::Ordinary, Some(prototype.clone())));
            object.set("n", Value::from(counter.get()));
            Ok(Value::from(object))
        });
        let holders: Vec<Value> = (0..2)
            .map(|_| {
                let holder = realm.new_object();
                holder.define(
                    "fresh",
                    Property {
                        slot: PropertySlot::Accessor(fresh.clone()),
                        enumerable: true,
                    },
                );
                Value::from(holder)
            })
            .collect();

        let graph = build(&realm, &realm.new_array(holders).into());
        let targets: Vec<Entry> = graph.nodes()[1..3]
            .iter()
            .filter_map(|holder| holder.keys.get("fresh").cloned())
            .collect();
        assert_eq!(targets.len(), 2);
        assert_ne!(targets[0], targets[1]);

        let mut counts: Vec<f64> = graph
            .nodes()
            .iter()
            .filter_map(|node| match node.keys.get("n") {
                Some(Entry::Primitive(Primitive::Number(n))) => Some(*n),
                _ => None,
            })
            .collect();
        counts.sort_by(f64::total_cmp);
        assert_eq!(counts, vec![1.0, 2.0]);
    }

    #[test]
    fn throwing_accessors_abort_serialization() {
        let realm = Realm::new();
        let object = realm.new_object();
        object.define(
            "boom",
            Property {
                slot: PropertySlot::Accessor(Rc::new(|| Err(AccessError("denied".into())))),
                enumerable: true,
            },
        );
        assert!(matches!(
            GraphBuilder::new(&realm).serialize(&object.into()),
            Err(EncodeError::PropertyAccess { key, .. }) if key == "boom"
        ));
    }

    #[test]
    fn views_reference_their_buffer() {
        let realm = Realm::new();
        let buffer = realm.new_array_buffer(vec![1, 2, 3, 4]);
        let view = realm.new_view(crate::value::ViewKind::Uint8, &buffer, 1, 2).unwrap();
        let graph = graph_of(&realm, &view);
        assert_eq!(
            graph.node(0).unwrap().source,
            Some(Source::View {
                buffer: Ref(1),
                byte_offset: 1,
                length: 2
            })
        );
        assert_eq!(graph.node(1).unwrap().source, Some(Source::Bytes(vec![1, 2, 3, 4])));
    }
}
