//! Call-scoped object identity tables.
//!
//! Both sides number objects in the order they are first met: the encoder when it
//! writes an inline tag, the decoder right after it has read the type of the object and
//! before it reads the object's payload. Nested members can therefore refer back to an
//! object that is still being decoded.
//!
//! When a substitution hook replaces a decoded object, the table entry is retargeted at
//! once, so later back-references resolve to the substitute. References that were
//! captured earlier (while the placeholder was still decoding) are patched by a single
//! pass over the decoded graph in [DecodeTable::finish].

use crate::{Error, Items, Object, ObjectRef, Value};
use std::collections::{HashMap, HashSet};

/// Outcome of registering an object while encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Registration {
    /// First visit: the payload must be written.
    New(u64),
    /// Already written under this ordinal.
    Existing(u64),
}

/// Maps object identities to ordinals while encoding.
#[derive(Default)]
pub(crate) struct EncodeTable {
    ordinals: HashMap<usize, u64>,
    // Identities are addresses: keep every registered object alive for the whole call.
    keep: Vec<ObjectRef>,
}

impl EncodeTable {
    pub fn register(&mut self, object: &ObjectRef) -> Registration {
        let next = self.keep.len() as u64;
        match self.ordinals.get(&object.id()) {
            Some(ordinal) => Registration::Existing(*ordinal),
            None => {
                self.ordinals.insert(object.id(), next);
                self.keep.push(object.clone());
                Registration::New(next)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keep.len()
    }
}

/// Maps ordinals to decoded objects.
#[derive(Default)]
pub(crate) struct DecodeTable {
    entries: Vec<Value>,
    substitutions: Vec<(ObjectRef, Value)>,
}

impl DecodeTable {
    /// Records the next object and returns its ordinal.
    pub fn register(&mut self, value: Value) -> u64 {
        self.entries.push(value);
        self.entries.len() as u64 - 1
    }

    /// Value currently registered under `ordinal`.
    pub fn resolve(&self, ordinal: u64) -> Result<Value, Error> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| self.entries.get(index))
            .cloned()
            .ok_or(Error::UnknownReference(ordinal))
    }

    /// Replaces the object registered under `ordinal` (the `placeholder`) with `replacement`.
    pub fn substitute(&mut self, ordinal: u64, placeholder: ObjectRef, replacement: Value) {
        if matches!(&replacement, Value::Ref(object) if object.ptr_eq(&placeholder)) {
            return;
        }
        if let Some(entry) = usize::try_from(ordinal)
            .ok()
            .and_then(|index| self.entries.get_mut(index))
        {
            *entry = replacement.clone();
        }
        self.substitutions.push((placeholder, replacement));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Retargets every reference to a substituted placeholder that is reachable from
    /// `root` (or from a substitute) and returns the patched root.
    pub fn finish(self, mut root: Value) -> Result<Value, Error> {
        if self.substitutions.is_empty() {
            return Ok(root);
        }

        let direct: HashMap<usize, &Value> = self
            .substitutions
            .iter()
            .map(|(placeholder, replacement)| (placeholder.id(), replacement))
            .collect();
        let mut targets = HashMap::with_capacity(direct.len());
        for (placeholder, replacement) in &self.substitutions {
            let mut current = replacement;
            let mut hops = 0;
            while let Some(next) = current.as_object().and_then(|object| direct.get(&object.id())) {
                hops += 1;
                if hops > direct.len() {
                    return Err(Error::CircularSubstitution);
                }
                current = *next;
            }
            targets.insert(placeholder.id(), current.clone());
        }

        let mut pending = Vec::new();
        patch(&mut root, &targets, &mut pending);
        for (_, replacement) in &self.substitutions {
            let mut replacement = replacement.clone();
            patch(&mut replacement, &targets, &mut pending);
        }

        let mut visited = HashSet::new();
        while let Some(object) = pending.pop() {
            if !visited.insert(object.id()) {
                continue;
            }
            let mut object = object.borrow_mut();
            match &mut *object {
                Object::Record(record) => {
                    for field in record.fields_mut() {
                        patch(field, &targets, &mut pending);
                    }
                }
                Object::Array(array) => {
                    for item in array.items_mut() {
                        patch(item, &targets, &mut pending);
                    }
                }
                Object::Collection(collection) => {
                    let mut rekeyed = false;
                    match collection.items_mut() {
                        Items::Sequence(items) => {
                            for item in items {
                                rekeyed |= patch(item, &targets, &mut pending);
                            }
                        }
                        Items::Entries(entries) => {
                            for (key, value) in entries {
                                rekeyed |= patch(key, &targets, &mut pending);
                                patch(value, &targets, &mut pending);
                            }
                        }
                    }
                    if rekeyed {
                        collection.reindex();
                    }
                }
            }
        }
        Ok(root)
    }
}

/// Retargets `value` if it refers to a substituted placeholder, and queues the objects it
/// refers to. Returns whether `value` (or a part of it held by value) was retargeted.
fn patch(
    value: &mut Value,
    targets: &HashMap<usize, Value>,
    pending: &mut Vec<ObjectRef>,
) -> bool {
    let target = value
        .as_object()
        .and_then(|object| targets.get(&object.id()))
        .cloned();
    let mut retargeted = false;
    if let Some(target) = target {
        *value = target;
        retargeted = true;
    }
    match value {
        Value::Ref(object) => pending.push(object.clone()),
        Value::Struct(record) => {
            for field in record.fields_mut() {
                retargeted |= patch(field, targets, pending);
            }
        }
        Value::Pair(pair) => {
            retargeted |= patch(&mut pair.0, targets, pending);
            retargeted |= patch(&mut pair.1, targets, pending);
        }
        _ => {}
    }
    retargeted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Collection, DataType, Record, TypeDescriptor};

    fn holder(name: &str) -> ObjectRef {
        let ty = TypeDescriptor::reference(name)
            .member("other", DataType::OBJECT)
            .build();
        ObjectRef::new(Record::new(ty))
    }

    #[test]
    fn test_encode_identity() {
        let a = holder("test.refs.A");
        let b = holder("test.refs.B");
        let mut table = EncodeTable::default();
        assert_eq!(table.register(&a), Registration::New(0));
        assert_eq!(table.register(&b), Registration::New(1));
        assert_eq!(table.register(&a.clone()), Registration::Existing(0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unknown_reference() {
        let mut table = DecodeTable::default();
        table.register(Value::Null);
        assert!(table.resolve(0).is_ok());
        assert!(matches!(table.resolve(1), Err(Error::UnknownReference(1))));
    }

    #[test]
    fn test_captured_references_are_patched() {
        let placeholder = holder("test.refs.Placeholder");
        // The placeholder captured a reference to itself while it was decoding.
        if let Some(record) = placeholder.borrow_mut().as_record_mut() {
            record.set("other", placeholder.clone());
        }
        let list = ObjectRef::new(
            Collection::list(DataType::OBJECT).with_items([Value::Ref(placeholder.clone())]),
        );

        let mut table = DecodeTable::default();
        let ordinal = table.register(Value::Ref(placeholder.clone()));
        let substitute = holder("test.refs.Substitute");
        table.substitute(ordinal, placeholder.clone(), Value::Ref(substitute.clone()));
        assert!(table.resolve(ordinal).unwrap().as_object().unwrap().ptr_eq(&substitute));

        let root = table.finish(Value::Ref(list.clone())).unwrap();
        let list = root.as_object().unwrap().borrow();
        let item = &list.as_collection().unwrap().values()[0];
        assert!(item.as_object().unwrap().ptr_eq(&substitute));
    }

    #[test]
    fn test_patched_keys_are_found() {
        let placeholder = holder("test.refs.KeyPlaceholder");
        let set = ObjectRef::new(
            Collection::set(DataType::OBJECT).with_items([Value::Ref(placeholder.clone())]),
        );

        let mut table = DecodeTable::default();
        let ordinal = table.register(Value::Ref(placeholder.clone()));
        let substitute = Value::Ref(holder("test.refs.KeySubstitute"));
        table.substitute(ordinal, placeholder.clone(), substitute.clone());

        let root = table.finish(Value::Ref(set)).unwrap();
        let set = root.as_object().unwrap().borrow();
        let set = set.as_collection().unwrap();
        assert!(set.contains(&substitute));
        assert!(!set.contains(&Value::Ref(placeholder)));
    }

    #[test]
    fn test_substitute_copying_placeholder_state() {
        let placeholder = holder("test.refs.Copied");
        if let Some(record) = placeholder.borrow_mut().as_record_mut() {
            record.set("other", placeholder.clone());
        }
        // The substitute took over the placeholder's self-reference.
        let substitute = holder("test.refs.Copy");
        if let Some(record) = substitute.borrow_mut().as_record_mut() {
            record.set("other", placeholder.clone());
        }

        let mut table = DecodeTable::default();
        let ordinal = table.register(Value::Ref(placeholder.clone()));
        table.substitute(ordinal, placeholder.clone(), Value::Ref(substitute.clone()));
        let root = table.finish(Value::Ref(placeholder)).unwrap();

        let root = root.as_object().unwrap();
        assert!(root.ptr_eq(&substitute));
        let other = root.borrow().as_record().unwrap().get("other").cloned().unwrap();
        assert!(other.as_object().unwrap().ptr_eq(&substitute));
    }

    #[test]
    fn test_substitution_chains() {
        let first = holder("test.refs.First");
        let second = holder("test.refs.Second");
        let last = holder("test.refs.Last");

        let mut table = DecodeTable::default();
        let a = table.register(Value::Ref(first.clone()));
        let b = table.register(Value::Ref(second.clone()));
        table.substitute(a, first.clone(), Value::Ref(second.clone()));
        table.substitute(b, second.clone(), Value::Ref(last.clone()));
        let root = table.finish(Value::Ref(first)).unwrap();
        assert!(root.as_object().unwrap().ptr_eq(&last));

        let mut table = DecodeTable::default();
        let a = table.register(Value::Ref(second.clone()));
        let b = table.register(Value::Ref(last.clone()));
        table.substitute(a, second.clone(), Value::Ref(last.clone()));
        table.substitute(b, last, Value::Ref(second.clone()));
        assert!(matches!(
            table.finish(Value::Ref(second)),
            Err(Error::CircularSubstitution)
        ));
    }

    #[test]
    fn test_self_substitution_is_ignored() {
        let object = holder("test.refs.Same");
        let mut table = DecodeTable::default();
        let ordinal = table.register(Value::Ref(object.clone()));
        table.substitute(ordinal, object.clone(), Value::Ref(object.clone()));
        let root = table.finish(Value::Ref(object.clone())).unwrap();
        assert!(root.as_object().unwrap().ptr_eq(&object));
    }
}
