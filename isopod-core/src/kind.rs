//! Per-kind cloning rules.
//!
//! Each supported kind is one [`Kind`] entry: how to recognise it, how to
//! pull its intrinsic contents out as a [`Source`], how to build an empty
//! instance from a node, and how to fill that instance once every slot
//! exists. Supporting a new kind means adding an entry to [`REGISTRY`] and a
//! tag to `TypeTag`.

use crate::callable::{Callable, Compiler};
use crate::host::HostPath;
use crate::node::{DehydratedNode, Entry, Ref, Source};
use crate::options::{Options, UnresolvedPolicy, UnsupportedPolicy};
use crate::realm::Realm;
use crate::reconstruct::DecodeError;
use crate::tag::TypeTag;
use crate::value::{ErrorData, ObjectKind, ObjectRef, Symbol, Value};

/// Maps nested values to entries while a node is being extracted.
pub(crate) trait Dehydrate {
    /// Inline entry for a plain primitive, otherwise a reference to the
    /// value's (possibly freshly reserved) slot.
    fn dehydrate(&mut self, value: &Value) -> Entry;

    fn dehydrate_object(&mut self, object: &ObjectRef) -> Ref;

    fn host_path(&self, value: &Value) -> Option<HostPath>;
}

/// Looks up the live value behind an entry while a graph is rebuilt.
pub(crate) trait Resolve {
    fn resolve_ref(&self, target: Ref) -> Result<Value, DecodeError>;

    fn resolve(&self, entry: &Entry) -> Result<Value, DecodeError> {
        match entry {
            Entry::Ref(target) => self.resolve_ref(*target),
            Entry::Primitive(primitive) => Ok(primitive.to_value()),
        }
    }
}

/// Everything a kind needs to rebuild one node.
pub(crate) struct Shell<'a> {
    pub slot: usize,
    pub node: &'a DehydratedNode,
    pub realm: &'a Realm,
    pub compiler: Option<&'a dyn Compiler>,
    pub options: Options,
    pub slots: &'a dyn Resolve,
}

impl Shell<'_> {
    fn source(&self) -> Option<&Source> {
        self.node.source.as_ref()
    }

    fn malformed(&self) -> DecodeError {
        DecodeError::MalformedSource {
            slot: self.slot,
            tag: self.node.tag.to_string(),
        }
    }

    fn entries(&self) -> Result<&[Entry], DecodeError> {
        match self.source() {
            Some(Source::Entries(entries)) => Ok(entries),
            None => Ok(&[]),
            Some(_) => Err(self.malformed()),
        }
    }

    fn pairs(&self) -> Result<&[(Entry, Entry)], DecodeError> {
        match self.source() {
            Some(Source::Pairs(pairs)) => Ok(pairs),
            None => Ok(&[]),
            Some(_) => Err(self.malformed()),
        }
    }
}

type Classify = fn(&Value) -> Option<TypeTag>;
type Extract = fn(&Value, &mut dyn Dehydrate) -> Option<Source>;
type Construct = fn(&Shell<'_>) -> Result<Value, DecodeError>;
type Hydrate = fn(&Shell<'_>, &Value) -> Result<(), DecodeError>;

pub(crate) struct Kind {
    pub classify: Classify,
    pub extract: Extract,
    pub construct: Construct,
    pub hydrate: Hydrate,
    /// Index keys live in `source`, so they are left out of `keys`.
    pub indexed: bool,
    /// Whether own properties and the prototype travel in `keys`.
    pub keyed: bool,
    /// Built in the second pass, after every non-deferred shell exists.
    pub deferred: bool,
}

/// Kinds in classification order.
pub(crate) static REGISTRY: [&Kind; 11] = [
    &SYMBOL,
    &FUNCTION,
    &ARRAY,
    &SET,
    &MAP,
    &REGEXP,
    &ERROR,
    &DATE,
    &ARRAY_BUFFER,
    &VIEW,
    &ORDINARY,
];

/// The rules for a tag. Tags outside the registry still need a rule for
/// rebuilding.
pub(crate) fn kind_for(tag: &TypeTag) -> &'static Kind {
    match tag {
        TypeTag::Special(_) => &SPECIAL,
        TypeTag::Object => &ORDINARY,
        TypeTag::Array => &ARRAY,
        TypeTag::Set => &SET,
        TypeTag::Map => &MAP,
        TypeTag::Function => &FUNCTION,
        TypeTag::Symbol => &SYMBOL,
        TypeTag::RegExp => &REGEXP,
        TypeTag::Error => &ERROR,
        TypeTag::Date => &DATE,
        TypeTag::ArrayBuffer => &ARRAY_BUFFER,
        TypeTag::View(_) => &VIEW,
        TypeTag::HostGlobal => &HOST_GLOBAL,
        TypeTag::Unsupported(_) => &UNSUPPORTED,
    }
}

fn object_kind<T>(value: &Value, f: impl FnOnce(&ObjectKind) -> Option<T>) -> Option<T> {
    value.as_object().and_then(|object| f(object.borrow().kind()))
}

fn no_source(_: &Value, _: &mut dyn Dehydrate) -> Option<Source> {
    None
}

fn no_content(_: &Shell<'_>, _: &Value) -> Result<(), DecodeError> {
    Ok(())
}

fn unclassified(_: &Value) -> Option<TypeTag> {
    None
}

static SPECIAL: Kind = Kind {
    classify: unclassified,
    extract: no_source,
    construct: |shell| match &shell.node.tag {
        TypeTag::Special(special) => Ok(special.value()),
        _ => Err(shell.malformed()),
    },
    hydrate: no_content,
    indexed: false,
    keyed: false,
    deferred: false,
};

static ORDINARY: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::Ordinary).then_some(TypeTag::Object)),
    extract: no_source,
    construct: |shell| Ok(shell.realm.new_object().into()),
    hydrate: no_content,
    indexed: false,
    keyed: true,
    deferred: false,
};

static ARRAY: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::Array(_)).then_some(TypeTag::Array)),
    extract: |value, dehydrator| {
        let elements = value.as_object().map(ObjectRef::elements).unwrap_or_default();
        Some(Source::Entries(
            elements.iter().map(|element| dehydrator.dehydrate(element)).collect(),
        ))
    },
    construct: |shell| {
        shell.entries()?;
        Ok(shell.realm.new_array([]).into())
    },
    hydrate: |shell, target| {
        if let Some(array) = target.as_object() {
            for entry in shell.entries()? {
                array.push(shell.slots.resolve(entry)?);
            }
        }
        Ok(())
    },
    indexed: true,
    keyed: true,
    deferred: false,
};

static SET: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::Set(_)).then_some(TypeTag::Set)),
    extract: |value, dehydrator| {
        let members = value.as_object().map(ObjectRef::set_values).unwrap_or_default();
        Some(Source::Entries(
            members.iter().map(|member| dehydrator.dehydrate(member)).collect(),
        ))
    },
    construct: |shell| {
        shell.entries()?;
        Ok(shell.realm.new_set([]).into())
    },
    hydrate: |shell, target| {
        if let Some(set) = target.as_object() {
            for entry in shell.entries()? {
                set.set_add(shell.slots.resolve(entry)?);
            }
        }
        Ok(())
    },
    indexed: false,
    keyed: true,
    deferred: false,
};

static MAP: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::Map(_)).then_some(TypeTag::Map)),
    extract: |value, dehydrator| {
        let entries = value.as_object().map(ObjectRef::map_entries).unwrap_or_default();
        Some(Source::Pairs(
            entries
                .iter()
                .map(|(key, value)| (dehydrator.dehydrate(key), dehydrator.dehydrate(value)))
                .collect(),
        ))
    },
    construct: |shell| {
        shell.pairs()?;
        Ok(shell.realm.new_map([]).into())
    },
    hydrate: |shell, target| {
        if let Some(map) = target.as_object() {
            for (key, value) in shell.pairs()? {
                map.map_insert(shell.slots.resolve(key)?, shell.slots.resolve(value)?);
            }
        }
        Ok(())
    },
    indexed: false,
    keyed: true,
    deferred: false,
};

static FUNCTION: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::Function(_)).then_some(TypeTag::Function)),
    extract: |value, _| value.as_object().and_then(ObjectRef::function_source).map(Source::Text),
    construct: |shell| {
        let Some(Source::Text(source)) = shell.source() else {
            return Err(shell.malformed());
        };
        let callable = match shell.compiler {
            Some(compiler) => {
                let behavior = compiler.compile(source).map_err(|source| DecodeError::Compile {
                    slot: shell.slot,
                    source,
                })?;
                Callable::new(source.as_str(), behavior)
            }
            None => {
                log::warn!("slot {}: no compiler, callable rebuilt inert", shell.slot);
                Callable::inert(source.as_str())
            }
        };
        Ok(shell.realm.new_function(callable).into())
    },
    hydrate: no_content,
    indexed: false,
    keyed: true,
    deferred: false,
};

static SYMBOL: Kind = Kind {
    classify: |value| value.as_symbol().map(|_| TypeTag::Symbol),
    extract: |value, _| {
        value
            .as_symbol()
            .and_then(Symbol::description)
            .map(|label| Source::Text(label.to_string()))
    },
    construct: |shell| match shell.source() {
        Some(Source::Text(label)) => Ok(Symbol::new(Some(label.as_str())).into()),
        None => Ok(Symbol::new(None).into()),
        Some(_) => Err(shell.malformed()),
    },
    hydrate: no_content,
    indexed: false,
    keyed: false,
    deferred: false,
};

static REGEXP: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::RegExp { .. }).then_some(TypeTag::RegExp)),
    extract: |value, _| {
        object_kind(value, |kind| match kind {
            ObjectKind::RegExp { pattern, flags } => Some(Source::Pattern {
                pattern: pattern.clone(),
                flags: flags.clone(),
            }),
            _ => None,
        })
    },
    construct: |shell| match shell.source() {
        Some(Source::Pattern { pattern, flags }) => Ok(shell.realm.new_regexp(pattern, flags).into()),
        _ => Err(shell.malformed()),
    },
    hydrate: no_content,
    indexed: false,
    keyed: true,
    deferred: false,
};

static ERROR: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::Error(_)).then_some(TypeTag::Error)),
    extract: |value, _| {
        object_kind(value, |kind| match kind {
            ObjectKind::Error(data) => Some(Source::Failure {
                message: data.message.clone(),
                stack: data.stack.clone(),
            }),
            _ => None,
        })
    },
    construct: |shell| {
        let data = match shell.source() {
            Some(Source::Failure { message, stack }) => ErrorData {
                message: message.clone(),
                stack: stack.clone(),
            },
            None => ErrorData::default(),
            Some(_) => return Err(shell.malformed()),
        };
        Ok(shell.realm.new_error(data).into())
    },
    hydrate: no_content,
    indexed: false,
    keyed: true,
    deferred: false,
};

static DATE: Kind = Kind {
    classify: |value| object_kind(value, |kind| matches!(kind, ObjectKind::Date(_)).then_some(TypeTag::Date)),
    extract: |value, _| {
        object_kind(value, |kind| match kind {
            ObjectKind::Date(millis) => Some(Source::Epoch(*millis)),
            _ => None,
        })
    },
    construct: |shell| match shell.source() {
        Some(Source::Epoch(millis)) => Ok(shell.realm.new_date(*millis).into()),
        None => Ok(shell.realm.new_date(f64::NAN).into()),
        Some(_) => Err(shell.malformed()),
    },
    hydrate: no_content,
    indexed: false,
    keyed: true,
    deferred: false,
};

static ARRAY_BUFFER: Kind = Kind {
    classify: |value| {
        object_kind(value, |kind| matches!(kind, ObjectKind::ArrayBuffer(_)).then_some(TypeTag::ArrayBuffer))
    },
    extract: |value, _| value.as_object().and_then(ObjectRef::buffer_bytes).map(Source::Bytes),
    construct: |shell| match shell.source() {
        Some(Source::Bytes(bytes)) => Ok(shell.realm.new_array_buffer(bytes.clone()).into()),
        None => Ok(shell.realm.new_array_buffer(Vec::new()).into()),
        Some(_) => Err(shell.malformed()),
    },
    hydrate: no_content,
    indexed: false,
    keyed: true,
    deferred: false,
};

/// Views are read through their intrinsic record, never through
/// properties, and rebuilt only after their buffer exists.
static VIEW: Kind = Kind {
    classify: |value| {
        object_kind(value, |kind| match kind {
            ObjectKind::View(view) => Some(TypeTag::View(view.kind)),
            _ => None,
        })
    },
    extract: |value, dehydrator| {
        let view = value.as_object().and_then(ObjectRef::view)?;
        Some(Source::View {
            buffer: dehydrator.dehydrate_object(&view.buffer),
            byte_offset: view.byte_offset,
            length: view.length,
        })
    },
    construct: |shell| {
        let (TypeTag::View(kind), Some(Source::View { buffer, byte_offset, length })) = (&shell.node.tag, shell.source())
        else {
            return Err(shell.malformed());
        };
        let resolved = shell.slots.resolve_ref(*buffer)?;
        let buffer_object = resolved
            .as_object()
            .filter(|object| matches!(object.borrow().kind(), ObjectKind::ArrayBuffer(_)))
            .ok_or(DecodeError::NotABuffer {
                slot: shell.slot,
                target: buffer.0,
            })?;
        shell
            .realm
            .new_view(*kind, buffer_object, *byte_offset, *length)
            .map(Value::from)
            .map_err(|source| DecodeError::View {
                slot: shell.slot,
                source,
            })
    },
    hydrate: no_content,
    indexed: true,
    keyed: true,
    deferred: true,
};

static HOST_GLOBAL: Kind = Kind {
    classify: unclassified,
    extract: |value, dehydrator| dehydrator.host_path(value).map(Source::Path),
    construct: |shell| {
        let Some(Source::Path(path)) = shell.source() else {
            return Err(shell.malformed());
        };
        if let Some(value) = shell.realm.host_index().resolve(path) {
            return Ok(value);
        }
        match shell.options.unresolved {
            UnresolvedPolicy::Undefined => {
                log::warn!("slot {}: host global {} not found, using undefined", shell.slot, path);
                Ok(Value::Undefined)
            }
            UnresolvedPolicy::Fail => Err(DecodeError::UnresolvedSingleton {
                slot: shell.slot,
                path: path.clone(),
            }),
        }
    },
    hydrate: no_content,
    indexed: false,
    keyed: false,
    deferred: false,
};

static UNSUPPORTED: Kind = Kind {
    classify: unclassified,
    extract: no_source,
    construct: |shell| {
        let TypeTag::Unsupported(class) = &shell.node.tag else {
            return Err(shell.malformed());
        };
        match shell.options.unsupported {
            UnsupportedPolicy::Tag => {
                log::warn!("slot {}: unsupported {} decoded as undefined", shell.slot, class);
                Ok(Value::Undefined)
            }
            UnsupportedPolicy::Fail => Err(DecodeError::Unsupported {
                slot: shell.slot,
                class: class.clone(),
            }),
        }
    },
    hydrate: no_content,
    indexed: false,
    keyed: false,
    deferred: false,
};
