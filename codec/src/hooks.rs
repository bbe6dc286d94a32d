//! User extension points: custom serializers, lifecycle callbacks and substitution.
//!
//! Callbacks declared on a type and on its base types all run. "Before" callbacks
//! (serializing, deserializing) run base to derived, "after" callbacks (serialized,
//! deserialized) run derived to base. A custom serializer or substitution hook declared on
//! a derived type overrides the one of its base. Errors raised by hooks are returned
//! unchanged inside [Error::Hook].
//!
//! Callbacks and [CustomSerializer::unpack] receive the record detached from the graph:
//! following a link back to the record being processed reaches a fresh instance of its
//! type, and changes made through that link are discarded.

use crate::{BoxError, Error, Object, ObjectRef, Options, Record, TypeDescriptor, Value};
use std::sync::Arc;

/// Replaces member-wise encoding of a type.
pub trait CustomSerializer: Send + Sync {
    /// Stores the state of `record` into `info`.
    fn pack(&self, record: &Record, info: &mut SerializationInfo) -> Result<(), BoxError>;

    /// Restores the state of `record` (a fresh instance) from `info`.
    fn unpack(&self, record: &mut Record, info: SerializationInfo) -> Result<(), BoxError>;
}

/// Named values produced by [CustomSerializer::pack].
#[derive(Clone, Debug, Default)]
pub struct SerializationInfo {
    entries: Vec<(String, Value)>,
}

impl SerializationInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Removes and returns the first value stored under `name`.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl IntoIterator for SerializationInfo {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A lifecycle callback.
pub type Callback = Arc<dyn Fn(&mut Record) -> Result<(), BoxError> + Send + Sync>;

/// Produces the value that takes the place of a freshly decoded instance.
pub type Substitute = Arc<dyn Fn(&ObjectRef) -> Result<Value, BoxError> + Send + Sync>;

/// Hooks declared on one type.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub custom: Option<Arc<dyn CustomSerializer>>,
    pub on_serializing: Vec<Callback>,
    pub on_serialized: Vec<Callback>,
    pub on_deserializing: Vec<Callback>,
    pub on_deserialized: Vec<Callback>,
    pub substitute: Option<Substitute>,
}

/// Result of unpacking a reference-type instance.
pub(crate) enum Unpacked {
    /// The instance keeps its place.
    Value(Value),
    /// The instance must be replaced by what `factory` returns.
    Substitute {
        placeholder: ObjectRef,
        factory: Substitute,
    },
}

#[derive(Clone, Copy)]
pub(crate) enum Stage {
    Serializing,
    Serialized,
    Deserializing,
    Deserialized,
}

impl Stage {
    fn callbacks(self, hooks: &Hooks) -> &[Callback] {
        match self {
            Stage::Serializing => &hooks.on_serializing,
            Stage::Serialized => &hooks.on_serialized,
            Stage::Deserializing => &hooks.on_deserializing,
            Stage::Deserialized => &hooks.on_deserialized,
        }
    }

    fn base_first(self) -> bool {
        matches!(self, Stage::Serializing | Stage::Deserializing)
    }
}

/// Runs the callbacks of `stage` declared on the record's type and its bases.
pub(crate) fn run(stage: Stage, record: &mut Record, options: Options) -> Result<(), Error> {
    if options.contains(Options::IGNORE_LIFECYCLE_CALLBACKS) {
        return Ok(());
    }
    let ty = record.ty().clone();
    let mut lineage: Vec<&TypeDescriptor> = ty.lineage().collect();
    if !stage.base_first() {
        lineage.reverse();
    }
    for ty in lineage {
        for callback in stage.callbacks(ty.hooks()) {
            callback(record).map_err(Error::Hook)?;
        }
    }
    Ok(())
}

/// Runs the callbacks of `stage` on a record held by `object` (no-op for other objects).
pub(crate) fn run_on(stage: Stage, object: &ObjectRef, options: Options) -> Result<(), Error> {
    if options.contains(Options::IGNORE_LIFECYCLE_CALLBACKS) {
        return Ok(());
    }
    let declared = object.borrow().as_record().is_some_and(|record| {
        record
            .ty()
            .lineage()
            .any(|ty| !stage.callbacks(ty.hooks()).is_empty())
    });
    if !declared {
        return Ok(());
    }
    with_detached(object, |record| run(stage, record, options)).unwrap_or(Ok(()))
}

/// Runs `f` on the record held by `object` while `object` holds a fresh instance of the
/// same type, so `f` may borrow `object` through the graph. `None` if `object` is not a
/// record.
pub(crate) fn with_detached<T>(
    object: &ObjectRef,
    f: impl FnOnce(&mut Record) -> T,
) -> Option<T> {
    let ty = object.borrow().as_record()?.ty().clone();
    let placeholder = Object::Record(Record::new(ty));
    let mut record = match std::mem::replace(&mut *object.borrow_mut(), placeholder) {
        Object::Record(record) => record,
        other => {
            *object.borrow_mut() = other;
            return None;
        }
    };
    let result = f(&mut record);
    *object.borrow_mut() = Object::Record(record);
    Some(result)
}

/// The custom serializer in effect for `ty`, if any.
pub(crate) fn custom_serializer(
    ty: &TypeDescriptor,
    options: Options,
) -> Option<Arc<dyn CustomSerializer>> {
    if options.contains(Options::IGNORE_CUSTOM_SERIALIZERS) {
        return None;
    }
    let lineage: Vec<&TypeDescriptor> = ty.lineage().collect();
    lineage
        .into_iter()
        .rev()
        .find_map(|ty| ty.hooks().custom.clone())
}

/// Decides whether a freshly unpacked instance keeps its place.
pub(crate) fn finish_unpack(object: ObjectRef, options: Options) -> Unpacked {
    if options.contains(Options::IGNORE_SUBSTITUTION) {
        return Unpacked::Value(Value::Ref(object));
    }
    let ty = object.borrow().as_record().map(|record| record.ty().clone());
    let Some(ty) = ty else {
        return Unpacked::Value(Value::Ref(object));
    };
    let lineage: Vec<&TypeDescriptor> = ty.lineage().collect();
    let factory = lineage
        .into_iter()
        .rev()
        .find_map(|ty| ty.hooks().substitute.clone());
    match factory {
        Some(factory) => Unpacked::Substitute {
            placeholder: object,
            factory,
        },
        None => Unpacked::Value(Value::Ref(object)),
    }
}
