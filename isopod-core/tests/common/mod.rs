//! Structural equivalence of value graphs living in different realms.

use isopod_core::{ObjectKind, ObjectRef, PropertySlot, Realm, Symbol, Value};

/// Walks two graphs side by side.
///
/// References are paired on first sight and must stay paired, so aliasing
/// and cycles have to line up too. Well-known values are compared by their
/// path in each realm's host index.
pub struct Equivalence<'a> {
    left: &'a Realm,
    right: &'a Realm,
    objects: Vec<(ObjectRef, ObjectRef)>,
    symbols: Vec<(Symbol, Symbol)>,
}

impl<'a> Equivalence<'a> {
    pub fn new(left: &'a Realm, right: &'a Realm) -> Self {
        Equivalence {
            left,
            right,
            objects: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn values(&mut self, a: &Value, b: &Value) -> bool {
        let left_path = self.left.host_index().path_of(a).cloned();
        let right_path = self.right.host_index().path_of(b).cloned();
        if left_path.is_some() || right_path.is_some() {
            return left_path == right_path;
        }
        match (a, b) {
            (Value::Symbol(a), Value::Symbol(b)) => self.symbols(a, b),
            (Value::Object(a), Value::Object(b)) => self.objects(a, b),
            _ => a.same(b),
        }
    }

    fn symbols(&mut self, a: &Symbol, b: &Symbol) -> bool {
        if let Some((_, paired)) = self.symbols.iter().find(|(left, _)| left.ptr_eq(a)) {
            return paired.ptr_eq(b);
        }
        if self.symbols.iter().any(|(_, right)| right.ptr_eq(b)) {
            return false;
        }
        self.symbols.push((a.clone(), b.clone()));
        a.description() == b.description()
    }

    fn objects(&mut self, a: &ObjectRef, b: &ObjectRef) -> bool {
        if let Some((_, paired)) = self.objects.iter().find(|(left, _)| left.ptr_eq(a)) {
            return paired.ptr_eq(b);
        }
        if self.objects.iter().any(|(_, right)| right.ptr_eq(b)) {
            return false;
        }
        self.objects.push((a.clone(), b.clone()));

        a.class_name() == b.class_name()
            && self.contents(a, b)
            && self.optional(a.prototype(), b.prototype())
            && self.properties(a, b)
    }

    fn optional(&mut self, a: Option<ObjectRef>, b: Option<ObjectRef>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => self.values(&a.into(), &b.into()),
            _ => false,
        }
    }

    fn lists(&mut self, a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(a, b)| self.values(a, b))
    }

    fn contents(&mut self, a: &ObjectRef, b: &ObjectRef) -> bool {
        if let (Some(a), Some(b)) = (a.view(), b.view()) {
            return a.kind == b.kind
                && a.byte_offset == b.byte_offset
                && a.length == b.length
                && self.values(&a.buffer.into(), &b.buffer.into());
        }
        let scalar = {
            let (left, right) = (a.borrow(), b.borrow());
            match (left.kind(), right.kind()) {
                (ObjectKind::RegExp { pattern, flags }, ObjectKind::RegExp { pattern: p, flags: f }) => {
                    Some(pattern == p && flags == f)
                }
                (ObjectKind::Error(left), ObjectKind::Error(right)) => Some(left == right),
                (ObjectKind::Date(left), ObjectKind::Date(right)) => {
                    Some(left == right || (left.is_nan() && right.is_nan()))
                }
                (ObjectKind::ArrayBuffer(left), ObjectKind::ArrayBuffer(right)) => Some(left == right),
                (ObjectKind::Function(left), ObjectKind::Function(right)) => Some(left.source() == right.source()),
                _ => None,
            }
        };
        if let Some(equal) = scalar {
            return equal;
        }

        let pairs_a: Vec<Value> = a.map_entries().into_iter().flat_map(|(k, v)| [k, v]).collect();
        let pairs_b: Vec<Value> = b.map_entries().into_iter().flat_map(|(k, v)| [k, v]).collect();
        self.lists(&a.elements(), &b.elements())
            && self.lists(&a.set_values(), &b.set_values())
            && self.lists(&pairs_a, &pairs_b)
    }

    /// Enumerable data properties plus the `constructor` link.
    fn properties(&mut self, a: &ObjectRef, b: &ObjectRef) -> bool {
        let visible = |object: &ObjectRef| -> Vec<(String, Value)> {
            let mut properties: Vec<(String, Value)> = object
                .own_properties()
                .into_iter()
                .filter(|(key, property)| property.enumerable || key == "constructor")
                .filter_map(|(key, property)| match property.slot {
                    PropertySlot::Data(value) => Some((key, value)),
                    PropertySlot::Accessor(_) => None,
                })
                .collect();
            properties.sort_by(|(a, _), (b, _)| a.cmp(b));
            properties
        };
        let (left, right) = (visible(a), visible(b));
        left.len() == right.len()
            && left
                .iter()
                .zip(&right)
                .all(|((ka, va), (kb, vb))| ka == kb && self.values(va, vb))
    }
}

/// One-shot equivalence check.
pub fn equivalent(left_realm: &Realm, left: &Value, right_realm: &Realm, right: &Value) -> bool {
    Equivalence::new(left_realm, right_realm).values(left, right)
}
