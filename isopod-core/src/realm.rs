use std::cell::OnceCell;
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::callable::Callable;
use crate::host::HostGlobalIndex;
use crate::value::{
    AccessError, CONSTRUCTOR_KEY, ErrorData, Object, ObjectKind, ObjectRef, Property, Symbol, Value, View, ViewKind,
};

/// Built-in classes, each with a constructor on the global object and an
/// intrinsic prototype.
const INTRINSIC_CLASSES: [&str; 23] = [
    "Object",
    "Function",
    "Array",
    "Set",
    "Map",
    "Symbol",
    "RegExp",
    "Error",
    "Date",
    "ArrayBuffer",
    "Boolean",
    "Number",
    "String",
    "DataView",
    "Int8Array",
    "Uint8Array",
    "Uint8ClampedArray",
    "Int16Array",
    "Uint16Array",
    "Int32Array",
    "Uint32Array",
    "Float32Array",
    "Float64Array",
];

const WELL_KNOWN_SYMBOLS: [&str; 4] = ["iterator", "asyncIterator", "hasInstance", "toPrimitive"];

/// Error type for realm operations.
#[derive(Debug, thiserror::Error)]
pub enum RealmError {
    #[error("realm is sealed: its host index was already built, cannot define `{0}`")]
    Sealed(String),
    #[error("{0} is not an ArrayBuffer")]
    NotABuffer(String),
    #[error("{kind} view at byte offset {byte_offset} with length {length} exceeds a buffer of {available} bytes")]
    OutOfBounds {
        kind: &'static str,
        byte_offset: usize,
        length: usize,
        available: usize,
    },
    #[error("{kind} view byte offset {byte_offset} is not a multiple of {element_size}")]
    Misaligned {
        kind: &'static str,
        byte_offset: usize,
        element_size: usize,
    },
}

/// The ambient root of a runtime: global object, intrinsic constructors and
/// prototypes, and the lazily built index of well-known values.
///
/// Every object is created through a realm so that it starts out with the
/// right intrinsic prototype. Two realms model two processes: values
/// serialized in one are rebuilt in the other, and host globals are
/// re-resolved by path rather than copied.
pub struct Realm {
    global: ObjectRef,
    constructors: IndexMap<&'static str, ObjectRef>,
    prototypes: IndexMap<&'static str, ObjectRef>,
    symbols: IndexMap<&'static str, Symbol>,
    intrinsic_prototypes: HashSet<usize>,
    intrinsic_constructors: HashSet<usize>,
    index: OnceCell<HostGlobalIndex>,
}

impl Realm {
    pub fn new() -> Self {
        let object_prototype = ObjectRef::new(Object::new(ObjectKind::Ordinary, None));
        let function_prototype = ObjectRef::new(Object::new(
            ObjectKind::Function(Callable::inert("function () { [native code] }")),
            Some(object_prototype.clone()),
        ));
        let global = ObjectRef::new(Object::new(ObjectKind::Ordinary, Some(object_prototype.clone())));

        let mut constructors = IndexMap::new();
        let mut prototypes = IndexMap::new();
        for class in INTRINSIC_CLASSES {
            let prototype = match class {
                "Object" => object_prototype.clone(),
                "Function" => function_prototype.clone(),
                _ => ObjectRef::new(Object::new(ObjectKind::Ordinary, Some(object_prototype.clone()))),
            };
            let constructor = ObjectRef::new(Object::new(
                ObjectKind::Function(Callable::inert(format!("function {class}() {{ [native code] }}"))),
                Some(function_prototype.clone()),
            ));
            constructor.define("prototype", Property::hidden(Value::from(&prototype)));
            prototype.define(CONSTRUCTOR_KEY, Property::hidden(Value::from(&constructor)));
            global.define(class, Property::hidden(Value::from(&constructor)));
            constructors.insert(class, constructor);
            prototypes.insert(class, prototype);
        }

        let mut symbols = IndexMap::new();
        if let Some(symbol_constructor) = constructors.get("Symbol") {
            for name in WELL_KNOWN_SYMBOLS {
                let symbol = Symbol::new(Some(&format!("Symbol.{name}")));
                symbol_constructor.define(name, Property::hidden(Value::Symbol(symbol.clone())));
                symbols.insert(name, symbol);
            }
        }

        for name in ["caller", "arguments"] {
            function_prototype.define(
                name,
                Property::accessor(Rc::new(|| {
                    Err(AccessError(
                        "'caller' and 'arguments' may not be accessed on strict functions".to_string(),
                    ))
                })),
            );
        }

        let math = ObjectRef::new(Object::new(ObjectKind::Ordinary, Some(object_prototype.clone())));
        math.define("PI", Property::hidden(Value::Number(std::f64::consts::PI)));
        math.define("E", Property::hidden(Value::Number(std::f64::consts::E)));
        global.define("Math", Property::hidden(Value::from(math)));
        global.define("globalThis", Property::hidden(Value::from(&global)));

        let intrinsic_prototypes = prototypes.values().map(ObjectRef::identity).collect();
        let intrinsic_constructors = constructors.values().map(ObjectRef::identity).collect();

        Realm {
            global,
            constructors,
            prototypes,
            symbols,
            intrinsic_prototypes,
            intrinsic_constructors,
            index: OnceCell::new(),
        }
    }

    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    pub fn constructor(&self, class: &str) -> Option<&ObjectRef> {
        self.constructors.get(class)
    }

    pub fn prototype(&self, class: &str) -> Option<&ObjectRef> {
        self.prototypes.get(class)
    }

    /// A well-known symbol by its short name, e.g. `"iterator"`.
    pub fn well_known_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).cloned()
    }

    pub fn is_intrinsic_prototype(&self, object: &ObjectRef) -> bool {
        self.intrinsic_prototypes.contains(&object.identity())
    }

    pub fn is_intrinsic_constructor(&self, object: &ObjectRef) -> bool {
        self.intrinsic_constructors.contains(&object.identity())
    }

    /// The index of values reachable from the global object.
    ///
    /// Built on first use and reused for the lifetime of the realm.
    pub fn host_index(&self) -> &HostGlobalIndex {
        self.index.get_or_init(|| HostGlobalIndex::build(&self.global))
    }

    /// Installs an application-level singleton on the global object.
    ///
    /// Globals must be defined before the host index is first used.
    pub fn define_global(&self, name: &str, value: Value) -> Result<(), RealmError> {
        if self.index.get().is_some() {
            return Err(RealmError::Sealed(name.to_string()));
        }
        self.global.define(name, Property::hidden(value));
        Ok(())
    }

    fn intrinsic(&self, class: &str) -> Option<ObjectRef> {
        self.prototypes.get(class).cloned()
    }

    fn allocate(&self, kind: ObjectKind) -> ObjectRef {
        let class = kind.class_name().to_string();
        ObjectRef::new(Object::new(kind, self.intrinsic(&class)))
    }

    pub fn new_object(&self) -> ObjectRef {
        self.allocate(ObjectKind::Ordinary)
    }

    pub fn new_object_with_prototype(&self, prototype: Option<ObjectRef>) -> ObjectRef {
        ObjectRef::new(Object::new(ObjectKind::Ordinary, prototype))
    }

    pub fn new_array(&self, elements: impl IntoIterator<Item = Value>) -> ObjectRef {
        self.allocate(ObjectKind::Array(elements.into_iter().collect()))
    }

    pub fn new_set(&self, members: impl IntoIterator<Item = Value>) -> ObjectRef {
        let set = self.allocate(ObjectKind::Set(IndexSet::new()));
        for member in members {
            set.set_add(member);
        }
        set
    }

    pub fn new_map(&self, entries: impl IntoIterator<Item = (Value, Value)>) -> ObjectRef {
        let map = self.allocate(ObjectKind::Map(IndexMap::new()));
        for (key, value) in entries {
            map.map_insert(key, value);
        }
        map
    }

    pub fn new_function(&self, callable: Callable) -> ObjectRef {
        self.allocate(ObjectKind::Function(callable))
    }

    pub fn new_regexp(&self, pattern: &str, flags: &str) -> ObjectRef {
        self.allocate(ObjectKind::RegExp {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
        })
    }

    pub fn new_error(&self, data: ErrorData) -> ObjectRef {
        self.allocate(ObjectKind::Error(data))
    }

    pub fn new_date(&self, epoch_millis: f64) -> ObjectRef {
        self.allocate(ObjectKind::Date(epoch_millis))
    }

    pub fn new_array_buffer(&self, bytes: Vec<u8>) -> ObjectRef {
        self.allocate(ObjectKind::ArrayBuffer(bytes))
    }

    /// Creates a view over an existing `ArrayBuffer` object.
    ///
    /// `length` counts elements (bytes for a `DataView`).
    pub fn new_view(
        &self,
        kind: ViewKind,
        buffer: &ObjectRef,
        byte_offset: usize,
        length: usize,
    ) -> Result<ObjectRef, RealmError> {
        let available = match buffer.borrow().kind() {
            ObjectKind::ArrayBuffer(bytes) => bytes.len(),
            other => return Err(RealmError::NotABuffer(other.class_name().to_string())),
        };
        let element_size = kind.element_size();
        if byte_offset % element_size != 0 {
            return Err(RealmError::Misaligned {
                kind: kind.name(),
                byte_offset,
                element_size,
            });
        }
        let end = length
            .checked_mul(element_size)
            .and_then(|bytes| bytes.checked_add(byte_offset));
        if end.is_none_or(|end| end > available) {
            return Err(RealmError::OutOfBounds {
                kind: kind.name(),
                byte_offset,
                length,
                available,
            });
        }
        Ok(self.allocate(ObjectKind::View(View {
            kind,
            buffer: buffer.clone(),
            byte_offset,
            length,
        })))
    }

    /// Creates an object of a class the cloner has no rule for.
    pub fn new_host_object(&self, class: &str) -> ObjectRef {
        ObjectRef::new(Object::new(
            ObjectKind::Host {
                class: class.to_string(),
            },
            self.intrinsic("Object"),
        ))
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_are_linked() {
        let realm = Realm::new();
        let array = realm.constructor("Array").unwrap();
        let prototype = realm.prototype("Array").unwrap();

        assert!(array.get("prototype").unwrap().same(&Value::from(prototype)));
        assert!(prototype.get(CONSTRUCTOR_KEY).unwrap().same(&Value::from(array)));
        assert_eq!(prototype.is_enumerable(CONSTRUCTOR_KEY), Some(false));
        assert!(realm.is_intrinsic_prototype(prototype));
        assert!(realm.is_intrinsic_constructor(array));
        assert!(!realm.is_intrinsic_prototype(&realm.new_object()));
    }

    #[test]
    fn objects_start_with_intrinsic_prototypes() {
        let realm = Realm::new();
        let map = realm.new_map([(Value::from("k"), Value::from(1))]);
        assert!(map.prototype().unwrap().ptr_eq(realm.prototype("Map").unwrap()));

        let buffer = realm.new_array_buffer(vec![0; 4]);
        let view = realm.new_view(ViewKind::Int16, &buffer, 2, 1).unwrap();
        assert!(view.prototype().unwrap().ptr_eq(realm.prototype("Int16Array").unwrap()));
    }

    #[test]
    fn views_are_bounds_checked() {
        let realm = Realm::new();
        let buffer = realm.new_array_buffer(vec![0; 8]);
        assert!(matches!(
            realm.new_view(ViewKind::Float64, &buffer, 0, 2),
            Err(RealmError::OutOfBounds { .. })
        ));
        assert!(matches!(
            realm.new_view(ViewKind::Uint32, &buffer, 2, 1),
            Err(RealmError::Misaligned { .. })
        ));
        let not_buffer = realm.new_object();
        assert!(matches!(
            realm.new_view(ViewKind::Uint8, &not_buffer, 0, 0),
            Err(RealmError::NotABuffer(_))
        ));
    }

    #[test]
    fn globals_seal_with_the_index() {
        let realm = Realm::new();
        let app = realm.new_object();
        realm.define_global("app", Value::from(&app)).unwrap();
        assert!(realm.host_index().contains(&Value::from(&app)));
        assert!(matches!(
            realm.define_global("late", Value::Null),
            Err(RealmError::Sealed(_))
        ));
    }
}
