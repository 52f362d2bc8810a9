use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Identity, ObjectRef, PROTO_KEY, Value};

/// Property path from the global object, e.g. `["Array", "prototype"]`.
/// The `__proto__` segment follows a prototype link.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostPath(Vec<String>);

impl HostPath {
    /// The path of the global object itself.
    pub fn root() -> Self {
        HostPath(Vec::new())
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        HostPath(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for HostPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        HostPath(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for HostPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("globalThis");
        }
        f.write_str(&self.0.join("."))
    }
}

/// Index of the well-known values reachable from a realm's global object.
///
/// Built breadth-first, so every value is recorded under the shortest path
/// that reaches it. Traversal follows every own property name (enumerable
/// or not) plus the prototype link, visits each value once, and skips any
/// property whose read throws.
pub struct HostGlobalIndex {
    global: ObjectRef,
    forward: HashMap<Identity, HostPath>,
    reverse: HashMap<HostPath, Value>,
}

impl HostGlobalIndex {
    pub fn build(global: &ObjectRef) -> Self {
        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        let mut queue = VecDeque::from([(Value::from(global), HostPath::root())]);

        while let Some((value, path)) = queue.pop_front() {
            let Some(identity) = value.identity() else {
                continue;
            };
            if forward.contains_key(&identity) {
                continue;
            }
            forward.insert(identity, path.clone());
            reverse.insert(path.clone(), value.clone());

            let Value::Object(object) = &value else {
                continue;
            };
            for name in object.own_keys() {
                match object.get_own(&name) {
                    Ok(Some(child)) if child.is_reference() => {
                        queue.push_back((child, path.child(&name)));
                    }
                    Ok(_) => {}
                    Err(err) => log::trace!("host index skips {}: {}", path.child(&name), err),
                }
            }
            if let Some(prototype) = object.prototype() {
                queue.push_back((Value::Object(prototype), path.child(PROTO_KEY)));
            }
        }

        log::debug!("host index built with {} entries", forward.len());
        HostGlobalIndex {
            global: global.clone(),
            forward,
            reverse,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.path_of(value).is_some()
    }

    /// Shortest discovered path to a well-known value.
    pub fn path_of(&self, value: &Value) -> Option<&HostPath> {
        value.identity().and_then(|identity| self.forward.get(&identity))
    }

    /// Looks a path up in this realm.
    ///
    /// Paths recorded by the index resolve directly. Any other path is walked
    /// from the global object; it resolves if every step exists, does not
    /// throw, and ends on something other than `undefined`.
    pub fn resolve(&self, path: &HostPath) -> Option<Value> {
        if let Some(value) = self.reverse.get(path) {
            return Some(value.clone());
        }
        let mut current = Value::from(&self.global);
        for segment in path.segments() {
            let object = current.as_object()?.clone();
            current = if segment == PROTO_KEY {
                Value::Object(object.prototype()?)
            } else {
                object.get(segment).ok()?
            };
        }
        (!current.is_undefined()).then_some(current)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::Realm;

    fn path(segments: &[&str]) -> HostPath {
        segments.iter().copied().collect()
    }

    #[test]
    fn records_shortest_paths() {
        let realm = Realm::new();
        let index = realm.host_index();

        let array_prototype = Value::from(realm.prototype("Array").unwrap());
        assert_eq!(index.path_of(&array_prototype), Some(&path(&["Array", "prototype"])));

        let global = Value::from(realm.global());
        assert_eq!(index.path_of(&global), Some(&HostPath::root()));
    }

    #[test]
    fn indexes_well_known_symbols() {
        let realm = Realm::new();
        let iterator = realm.well_known_symbol("iterator").unwrap();
        assert_eq!(
            realm.host_index().path_of(&Value::Symbol(iterator)),
            Some(&path(&["Symbol", "iterator"]))
        );
    }

    #[test]
    fn throwing_accessors_do_not_abort_the_build() {
        let realm = Realm::new();
        let index = realm.host_index();
        assert!(index.len() > 20);
        assert!(index.resolve(&path(&["Function", "prototype", "caller"])).is_none());
        assert!(index.contains(&Value::from(realm.constructor("Map").unwrap())));
    }

    #[test]
    fn resolves_across_realms() {
        let sender = Realm::new();
        let receiver = Realm::new();
        let set_prototype = Value::from(sender.prototype("Set").unwrap());
        let recorded = sender.host_index().path_of(&set_prototype).unwrap().clone();

        let resolved = receiver.host_index().resolve(&recorded).unwrap();
        assert!(resolved.same(&Value::from(receiver.prototype("Set").unwrap())));
        assert!(!resolved.same(&set_prototype));
    }

    #[test]
    fn walks_unrecorded_paths() {
        let realm = Realm::new();
        let index = realm.host_index();
        let walked = index
            .resolve(&path(&["globalThis", "Object", "prototype"]))
            .unwrap();
        assert!(walked.same(&Value::from(realm.prototype("Object").unwrap())));
        assert!(index.resolve(&path(&["NoSuchThing"])).is_none());
        assert!(index.resolve(&path(&["Math", "PI", "deeper"])).is_none());
    }

    #[test]
    fn path_display() {
        assert_eq!(path(&["Symbol", "iterator"]).to_string(), "Symbol.iterator");
        assert_eq!(HostPath::root().to_string(), "globalThis");
    }
}
