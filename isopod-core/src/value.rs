use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::callable::{CallError, Callable};

/// Property name that exposes an object's prototype link.
pub const PROTO_KEY: &str = "__proto__";

/// Property name of a prototype's back-link to its constructor.
pub const CONSTRUCTOR_KEY: &str = "constructor";

/// A runtime datum.
///
/// Booleans, numbers and strings are primitives and compare by value.
/// Symbols and objects carry identity: two handles are the same value only
/// if they point at the same allocation.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Symbol(Symbol),
    Object(ObjectRef),
}

impl Value {
    /// Returns true for symbols and objects.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Symbol(_) | Value::Object(_))
    }

    /// Returns true for values that survive any text codec unchanged:
    /// booleans, finite numbers and strings.
    pub fn is_plain_primitive(&self) -> bool {
        match self {
            Value::Bool(_) | Value::String(_) => true,
            Value::Number(n) => n.is_finite(),
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// SameValueZero: identity for references, value equality for
    /// primitives, with NaN equal to itself and both zeros equal.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Returns the allocation identity of a reference value.
    pub(crate) fn identity(&self) -> Option<Identity> {
        match self {
            Value::Symbol(symbol) => Some(Identity::Symbol(symbol.identity())),
            Value::Object(object) => Some(Identity::Object(object.identity())),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Symbol(symbol) => write!(f, "{symbol:?}"),
            Value::Object(object) => write!(f, "{object:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Symbol> for Value {
    fn from(symbol: Symbol) -> Self {
        Value::Symbol(symbol)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

impl From<&ObjectRef> for Value {
    fn from(object: &ObjectRef) -> Self {
        Value::Object(object.clone())
    }
}

/// Allocation identity of a symbol or object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Identity {
    Symbol(usize),
    Object(usize),
}

/// A uniquely identified token built from an optional label.
///
/// Two symbols with the same description are still distinct values.
#[derive(Clone)]
pub struct Symbol(Rc<SymbolData>);

struct SymbolData {
    description: Option<String>,
}

impl Symbol {
    pub fn new(description: Option<&str>) -> Self {
        Symbol(Rc::new(SymbolData {
            description: description.map(str::to_string),
        }))
    }

    pub fn description(&self) -> Option<&str> {
        self.0.description.as_deref()
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Symbol {}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description().unwrap_or_default())
    }
}

/// A value wrapper that hashes and compares by SameValueZero.
///
/// Used as the element type of sets and the key type of maps.
#[derive(Clone, Debug)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.same(&other.0)
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Undefined => 0u8.hash(state),
            Value::Null => 1u8.hash(state),
            Value::Bool(b) => {
                2u8.hash(state);
                b.hash(state);
            }
            Value::Number(n) => {
                3u8.hash(state);
                let canonical = if *n == 0.0 {
                    0.0f64
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                canonical.to_bits().hash(state);
            }
            Value::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Symbol(symbol) => {
                5u8.hash(state);
                symbol.identity().hash(state);
            }
            Value::Object(object) => {
                6u8.hash(state);
                object.identity().hash(state);
            }
        }
    }
}

/// Error raised when reading a property throws.
#[derive(Debug, Clone, thiserror::Error)]
#[error("property access threw: {0}")]
pub struct AccessError(pub String);

/// A computed property reader.
pub type Getter = Rc<dyn Fn() -> Result<Value, AccessError>>;

/// Storage behind a property name.
#[derive(Clone)]
pub enum PropertySlot {
    Data(Value),
    Accessor(Getter),
}

/// An own property of an object.
#[derive(Clone)]
pub struct Property {
    pub slot: PropertySlot,
    pub enumerable: bool,
}

impl Property {
    /// An enumerable data property, as created by plain assignment.
    pub fn data(value: Value) -> Self {
        Property {
            slot: PropertySlot::Data(value),
            enumerable: true,
        }
    }

    /// A non-enumerable data property.
    pub fn hidden(value: Value) -> Self {
        Property {
            slot: PropertySlot::Data(value),
            enumerable: false,
        }
    }

    /// A non-enumerable accessor property.
    pub fn accessor(getter: Getter) -> Self {
        Property {
            slot: PropertySlot::Accessor(getter),
            enumerable: false,
        }
    }

    /// Reads the property, running the getter for accessors.
    pub fn read(&self) -> Result<Value, AccessError> {
        match &self.slot {
            PropertySlot::Data(value) => Ok(value.clone()),
            PropertySlot::Accessor(getter) => getter(),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            PropertySlot::Data(value) => write!(f, "{value:?}")?,
            PropertySlot::Accessor(_) => f.write_str("<accessor>")?,
        }
        if !self.enumerable {
            f.write_str(" (hidden)")?;
        }
        Ok(())
    }
}

/// Element shape of a buffer view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    DataView,
}

impl ViewKind {
    pub const ALL: [ViewKind; 10] = [
        ViewKind::Int8,
        ViewKind::Uint8,
        ViewKind::Uint8Clamped,
        ViewKind::Int16,
        ViewKind::Uint16,
        ViewKind::Int32,
        ViewKind::Uint32,
        ViewKind::Float32,
        ViewKind::Float64,
        ViewKind::DataView,
    ];

    /// The class name of views of this kind.
    pub fn name(self) -> &'static str {
        match self {
            ViewKind::Int8 => "Int8Array",
            ViewKind::Uint8 => "Uint8Array",
            ViewKind::Uint8Clamped => "Uint8ClampedArray",
            ViewKind::Int16 => "Int16Array",
            ViewKind::Uint16 => "Uint16Array",
            ViewKind::Int32 => "Int32Array",
            ViewKind::Uint32 => "Uint32Array",
            ViewKind::Float32 => "Float32Array",
            ViewKind::Float64 => "Float64Array",
            ViewKind::DataView => "DataView",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Bytes per element. A `DataView` addresses single bytes.
    pub fn element_size(self) -> usize {
        match self {
            ViewKind::Int8 | ViewKind::Uint8 | ViewKind::Uint8Clamped | ViewKind::DataView => 1,
            ViewKind::Int16 | ViewKind::Uint16 => 2,
            ViewKind::Int32 | ViewKind::Uint32 | ViewKind::Float32 => 4,
            ViewKind::Float64 => 8,
        }
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            ViewKind::Int8 => f64::from(bytes[0] as i8),
            ViewKind::Uint8 | ViewKind::Uint8Clamped | ViewKind::DataView => f64::from(bytes[0]),
            ViewKind::Int16 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            ViewKind::Uint16 => f64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            ViewKind::Int32 => f64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ViewKind::Uint32 => f64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ViewKind::Float32 => f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ViewKind::Float64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(raw)
            }
        }
    }

    fn encode(self, value: f64, out: &mut [u8]) {
        let wrapped = if value.is_finite() { value.trunc() as i64 } else { 0 };
        match self {
            ViewKind::Int8 => out[0] = wrapped as i8 as u8,
            ViewKind::Uint8 | ViewKind::DataView => out[0] = wrapped as u8,
            ViewKind::Uint8Clamped => out[0] = value.clamp(0.0, 255.0).round() as u8,
            ViewKind::Int16 => out[..2].copy_from_slice(&(wrapped as i16).to_le_bytes()),
            ViewKind::Uint16 => out[..2].copy_from_slice(&(wrapped as u16).to_le_bytes()),
            ViewKind::Int32 => out[..4].copy_from_slice(&(wrapped as i32).to_le_bytes()),
            ViewKind::Uint32 => out[..4].copy_from_slice(&(wrapped as u32).to_le_bytes()),
            ViewKind::Float32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            ViewKind::Float64 => out[..8].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

/// A typed window over an `ArrayBuffer` object.
#[derive(Clone, Debug)]
pub struct View {
    pub kind: ViewKind,
    pub buffer: ObjectRef,
    pub byte_offset: usize,
    /// Element count (bytes for a `DataView`).
    pub length: usize,
}

/// Message and trace of an error object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorData {
    pub message: Option<String>,
    pub stack: Option<String>,
}

impl ErrorData {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorData {
            message: Some(message.into()),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Intrinsic contents of an object, fixed at creation.
#[derive(Debug)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(Callable),
    Set(IndexSet<ValueKey>),
    Map(IndexMap<ValueKey, Value>),
    RegExp { pattern: String, flags: String },
    Error(ErrorData),
    /// Milliseconds since the epoch; NaN for an invalid date.
    Date(f64),
    ArrayBuffer(Vec<u8>),
    View(View),
    /// Opaque host data the cloner has no rule for.
    Host { class: String },
}

impl ObjectKind {
    pub fn class_name(&self) -> &str {
        match self {
            ObjectKind::Ordinary => "Object",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Set(_) => "Set",
            ObjectKind::Map(_) => "Map",
            ObjectKind::RegExp { .. } => "RegExp",
            ObjectKind::Error(_) => "Error",
            ObjectKind::Date(_) => "Date",
            ObjectKind::ArrayBuffer(_) => "ArrayBuffer",
            ObjectKind::View(view) => view.kind.name(),
            ObjectKind::Host { class } => class,
        }
    }
}

/// A heap object: intrinsic contents, prototype link and property table.
pub struct Object {
    kind: ObjectKind,
    prototype: Option<ObjectRef>,
    properties: IndexMap<String, Property>,
}

impl Object {
    pub fn new(kind: ObjectKind, prototype: Option<ObjectRef>) -> Self {
        Object {
            kind,
            prototype,
            properties: IndexMap::new(),
        }
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ObjectKind {
        &mut self.kind
    }

    pub fn prototype(&self) -> Option<&ObjectRef> {
        self.prototype.as_ref()
    }

    pub fn properties(&self) -> &IndexMap<String, Property> {
        &self.properties
    }

    /// Moves every directly held value into `out`, leaving an empty object.
    fn detach(&mut self, out: &mut Vec<Value>) {
        if let Some(prototype) = self.prototype.take() {
            out.push(Value::Object(prototype));
        }
        for (_, property) in self.properties.drain(..) {
            if let PropertySlot::Data(value) = property.slot {
                out.push(value);
            }
        }
        match std::mem::replace(&mut self.kind, ObjectKind::Ordinary) {
            ObjectKind::Array(elements) => out.extend(elements),
            ObjectKind::Set(members) => out.extend(members.into_iter().map(|member| member.0)),
            ObjectKind::Map(entries) => out.extend(entries.into_iter().flat_map(|(key, value)| [key.0, value])),
            ObjectKind::View(view) => out.push(Value::Object(view.buffer)),
            _ => {}
        }
    }
}

/// Frees nested objects with an explicit stack, so dropping a deep chain
/// does not grow the call stack. Only objects whose last handle is being
/// released are taken apart; shared ones are left to their other owners.
impl Drop for Object {
    fn drop(&mut self) {
        let mut orphans = Vec::new();
        self.detach(&mut orphans);
        while let Some(value) = orphans.pop() {
            if let Value::Object(ObjectRef(handle)) = value {
                if let Ok(cell) = Rc::try_unwrap(handle) {
                    cell.into_inner().detach(&mut orphans);
                }
            }
        }
    }
}

/// Shared handle to a heap object. Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        ObjectRef(Rc::new(RefCell::new(object)))
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn class_name(&self) -> String {
        self.borrow().kind.class_name().to_string()
    }

    pub fn prototype(&self) -> Option<ObjectRef> {
        self.borrow().prototype.clone()
    }

    /// Replaces the prototype link.
    ///
    /// Returns false, leaving the link unchanged, if the new chain would
    /// pass through this object.
    pub fn set_prototype(&self, prototype: Option<ObjectRef>) -> bool {
        let mut cursor = prototype.clone();
        while let Some(link) = cursor {
            if link.ptr_eq(self) {
                return false;
            }
            cursor = link.prototype();
        }
        self.borrow_mut().prototype = prototype;
        true
    }

    pub fn own_property(&self, key: &str) -> Option<Property> {
        self.borrow().properties.get(key).cloned()
    }

    /// Names of all own properties, enumerable or not, in insertion order.
    pub fn own_keys(&self) -> Vec<String> {
        self.borrow().properties.keys().cloned().collect()
    }

    /// Snapshot of the own property table.
    pub fn own_properties(&self) -> Vec<(String, Property)> {
        self.borrow()
            .properties
            .iter()
            .map(|(key, property)| (key.clone(), property.clone()))
            .collect()
    }

    /// Reads an own property or an indexed element, without consulting the
    /// prototype chain.
    pub fn get_own(&self, key: &str) -> Result<Option<Value>, AccessError> {
        if let Some(index) = array_index(key) {
            if let Some(element) = self.element(index) {
                return Ok(Some(element));
            }
        }
        match self.own_property(key) {
            Some(property) => property.read().map(Some),
            None => Ok(None),
        }
    }

    /// Reads a property along the prototype chain. Missing properties read
    /// as `undefined`.
    pub fn get(&self, key: &str) -> Result<Value, AccessError> {
        let mut cursor = Some(self.clone());
        while let Some(object) = cursor {
            if let Some(value) = object.get_own(key)? {
                return Ok(value);
            }
            cursor = object.prototype();
        }
        Ok(Value::Undefined)
    }

    /// Assigns an enumerable data property. Index keys on arrays and views
    /// write elements instead.
    pub fn set(&self, key: &str, value: Value) {
        if let Some(index) = array_index(key) {
            let is_view = {
                let mut object = self.borrow_mut();
                match &mut object.kind {
                    ObjectKind::Array(elements) => {
                        if index >= elements.len() {
                            elements.resize(index + 1, Value::Undefined);
                        }
                        elements[index] = value;
                        return;
                    }
                    ObjectKind::View(_) => true,
                    _ => false,
                }
            };
            if is_view {
                if let Some(n) = value.as_number() {
                    self.view_set(index, n);
                }
                return;
            }
        }
        let mut object = self.borrow_mut();
        match object.properties.get_mut(key) {
            Some(existing) => existing.slot = PropertySlot::Data(value),
            None => {
                object.properties.insert(key.to_string(), Property::data(value));
            }
        }
    }

    /// Defines an own property with explicit attributes.
    pub fn define(&self, key: &str, property: Property) {
        self.borrow_mut().properties.insert(key.to_string(), property);
    }

    pub fn is_enumerable(&self, key: &str) -> Option<bool> {
        self.borrow().properties.get(key).map(|p| p.enumerable)
    }

    /// Appends an array element. No-op on other kinds.
    pub fn push(&self, value: Value) {
        if let ObjectKind::Array(elements) = &mut self.borrow_mut().kind {
            elements.push(value);
        }
    }

    /// Reads an indexed element of an array or view.
    pub fn element(&self, index: usize) -> Option<Value> {
        if let ObjectKind::Array(elements) = &self.borrow().kind {
            return elements.get(index).cloned();
        }
        self.view_get(index).map(Value::Number)
    }

    /// Elements of an array; empty for other kinds.
    pub fn elements(&self) -> Vec<Value> {
        match &self.borrow().kind {
            ObjectKind::Array(elements) => elements.clone(),
            _ => Vec::new(),
        }
    }

    /// Number of array elements, set members, map entries, view elements or
    /// buffer bytes.
    pub fn len(&self) -> usize {
        match &self.borrow().kind {
            ObjectKind::Array(elements) => elements.len(),
            ObjectKind::Set(members) => members.len(),
            ObjectKind::Map(entries) => entries.len(),
            ObjectKind::View(view) => view.length,
            ObjectKind::ArrayBuffer(bytes) => bytes.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a set member. Returns false if it was already present.
    pub fn set_add(&self, value: Value) -> bool {
        match &mut self.borrow_mut().kind {
            ObjectKind::Set(members) => members.insert(ValueKey(value)),
            _ => false,
        }
    }

    pub fn set_has(&self, value: &Value) -> bool {
        match &self.borrow().kind {
            ObjectKind::Set(members) => members.contains(&ValueKey(value.clone())),
            _ => false,
        }
    }

    pub fn set_values(&self) -> Vec<Value> {
        match &self.borrow().kind {
            ObjectKind::Set(members) => members.iter().map(|key| key.0.clone()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn map_insert(&self, key: Value, value: Value) {
        if let ObjectKind::Map(entries) = &mut self.borrow_mut().kind {
            entries.insert(ValueKey(key), value);
        }
    }

    pub fn map_get(&self, key: &Value) -> Option<Value> {
        match &self.borrow().kind {
            ObjectKind::Map(entries) => entries.get(&ValueKey(key.clone())).cloned(),
            _ => None,
        }
    }

    pub fn map_entries(&self) -> Vec<(Value, Value)> {
        match &self.borrow().kind {
            ObjectKind::Map(entries) => entries
                .iter()
                .map(|(key, value)| (key.0.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Copy of an `ArrayBuffer`'s bytes.
    pub fn buffer_bytes(&self) -> Option<Vec<u8>> {
        match &self.borrow().kind {
            ObjectKind::ArrayBuffer(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// The intrinsic view record of a buffer view.
    pub fn view(&self) -> Option<View> {
        match &self.borrow().kind {
            ObjectKind::View(view) => Some(view.clone()),
            _ => None,
        }
    }

    /// Reads element `index` of a view from its backing buffer.
    pub fn view_get(&self, index: usize) -> Option<f64> {
        let view = self.view()?;
        if index >= view.length {
            return None;
        }
        let size = view.kind.element_size();
        let start = view.byte_offset + index * size;
        let buffer = view.buffer.borrow();
        match &buffer.kind {
            ObjectKind::ArrayBuffer(bytes) => bytes.get(start..start + size).map(|raw| view.kind.decode(raw)),
            _ => None,
        }
    }

    /// Writes element `index` of a view into its backing buffer.
    pub fn view_set(&self, index: usize, value: f64) -> bool {
        let Some(view) = self.view() else {
            return false;
        };
        if index >= view.length {
            return false;
        }
        let size = view.kind.element_size();
        let start = view.byte_offset + index * size;
        let mut buffer = view.buffer.borrow_mut();
        match &mut buffer.kind {
            ObjectKind::ArrayBuffer(bytes) => match bytes.get_mut(start..start + size) {
                Some(raw) => {
                    view.kind.encode(value, raw);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Source text of a function object.
    pub fn function_source(&self) -> Option<String> {
        match &self.borrow().kind {
            ObjectKind::Function(callable) => Some(callable.source().to_string()),
            _ => None,
        }
    }

    /// Invokes a function object.
    pub fn call(&self, args: &[Value]) -> Result<Value, CallError> {
        let callable = match &self.borrow().kind {
            ObjectKind::Function(callable) => callable.clone(),
            _ => return Err(CallError::NotCallable(self.class_name())),
        };
        callable.call(args)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(object) => write!(f, "{}@{:#x}", object.kind.class_name(), self.identity()),
            Err(_) => write!(f, "<borrowed>@{:#x}", self.identity()),
        }
    }
}

/// Parses a canonical array index ("0", "17"; not "01" or "-1").
pub fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|&i| i != u32::MAX).map(|i| i as usize)
}
