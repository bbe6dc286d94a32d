//! Collection classification and reconstruction.
//!
//! Classification, in priority order:
//! 1. Natively recognized shapes (arrays, lists, deques, sets, maps, their sorted forms,
//!    optionals and pairs) are rebuilt through a known initializer.
//! 2. Read-only lists can only be rebuilt into an instance that already exists in the
//!    destination (supplied by a member initializer).
//! 3. User-defined collections exposing an append primitive or a sequence initializer are
//!    rebuilt by generic population.
//! 4. Anything else is refused.
//!
//! Keyed collections must use a comparer that can be written to the stream. Sorted
//! collections must not hold object references in their keys: built-in comparers order
//! references by identity, and identities are not preserved by a round trip. Under
//! [Options::FORCE_RECURSIVE_FALLBACK] unsupported shapes and comparers are encoded anyway;
//! the comparer is written as the default one, so decoding restores a default comparer.

use crate::{
    types::{CollectionKind, CollectionType, DataType},
    Collection, Comparer, Error, ObjectRef, Options, TypeDescriptor, TypeKind, Value,
};
use tracing::{debug, warn};

/// How a collection is rebuilt when decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trust {
    /// Rebuilt through a well-known initializer.
    Native,
    /// Rebuilt only into an existing destination instance.
    ExistingTarget,
    /// Rebuilt by populating an empty instance.
    Generic,
}

/// Encoding-time description of one collection instance.
#[derive(Clone, Debug)]
pub struct CollectionDescriptor {
    pub shape: CollectionKind,
    pub trust: Trust,
    /// Wire identifier of the comparer (keyed shapes only).
    pub comparer: Option<u8>,
    pub element: Vec<DataType>,
}

/// Classifies a collection shape.
///
/// Returns the reason when the shape cannot be rebuilt at all.
pub fn classify(
    kind: CollectionKind,
    custom: Option<&TypeDescriptor>,
) -> Result<Trust, &'static str> {
    match kind {
        CollectionKind::None => Err("not a collection"),
        CollectionKind::ReadOnlyList => Ok(Trust::ExistingTarget),
        CollectionKind::Custom | CollectionKind::CustomMap => {
            let capabilities = match custom.map(|ty| ty.kind()) {
                Some(TypeKind::Collection(capabilities)) => capabilities,
                _ => return Err("not a collection type"),
            };
            if !capabilities.is_reconstructible() {
                return Err("no append/insert primitive and no sequence-accepting initializer");
            }
            Ok(Trust::Generic)
        }
        _ => Ok(Trust::Native),
    }
}

/// Describes `collection` for encoding under `options`.
pub fn describe(collection: &Collection, options: Options) -> Result<CollectionDescriptor, Error> {
    let kind = collection.kind();
    let type_name = collection.data_type().to_string();
    let force = options.contains(Options::FORCE_RECURSIVE_FALLBACK);

    let trust = match classify(kind, collection.custom_type().map(|ty| &**ty)) {
        Ok(trust) => trust,
        Err(reason) if force => {
            warn!(collection = %type_name, reason, "encoding collection that cannot be rebuilt");
            Trust::Generic
        }
        Err(reason) => {
            debug!(collection = %type_name, reason, "refusing collection");
            return Err(Error::UnsupportedCollection {
                type_name,
                options,
                reason,
            })
        }
    };

    let comparer = match kind.is_keyed() {
        false => None,
        true => match collection.comparer().wire_id() {
            Some(id) => Some(id),
            None if force => {
                warn!(
                    collection = %type_name,
                    comparer = collection.comparer().name(),
                    "comparer replaced by the default comparer"
                );
                Comparer::Default.wire_id()
            }
            None => {
                debug!(collection = %type_name, "refusing comparer");
                return Err(Error::UnsupportedComparer {
                    type_name,
                    comparer: collection.comparer().name().to_string(),
                    options,
                })
            }
        },
    };

    if kind.is_sorted() && collection.comparer().wire_id().is_some() {
        let mut keys: Box<dyn Iterator<Item = &Value>> = match kind.is_map() {
            true => Box::new(collection.entries().iter().map(|(key, _)| key)),
            false => Box::new(collection.values().iter()),
        };
        let by_identity = keys.any(orders_by_identity);
        if by_identity && force {
            warn!(collection = %type_name, "sorted keys reference objects; order is not kept");
        } else if by_identity {
            let reason = "sorted by object identity, which does not survive a round trip";
            debug!(collection = %type_name, reason, "refusing collection");
            return Err(Error::UnsupportedCollection {
                type_name,
                options,
                reason,
            });
        }
    }

    Ok(CollectionDescriptor {
        shape: kind,
        trust,
        comparer,
        element: collection.args().to_vec(),
    })
}

/// Whether built-in comparers order `key` by the identity of an object it references.
fn orders_by_identity(key: &Value) -> bool {
    match key {
        Value::Ref(_) => true,
        Value::Struct(record) => record.fields().iter().any(orders_by_identity),
        Value::Pair(pair) => orders_by_identity(&pair.0) || orders_by_identity(&pair.1),
        _ => false,
    }
}

/// Whether a capacity hint precedes the count of a collection of this kind.
pub(crate) fn has_capacity_hint(kind: CollectionKind) -> bool {
    matches!(kind, CollectionKind::List | CollectionKind::Deque)
}

/// Rebuilds a collection while its items are decoded.
pub(crate) struct Builder {
    target: ObjectRef,
    mode: Mode,
}

enum Mode {
    /// Items are added to the target as they arrive.
    Append,
    /// Items are collected and handed to the target at once.
    Collect(Vec<Value>, Vec<(Value, Value)>),
}

impl Builder {
    /// Prepares the instance that will hold the decoded items.
    ///
    /// `existing` is the value currently held by the destination, if any.
    pub fn new(
        ty: &CollectionType,
        comparer: Comparer,
        existing: Option<&Value>,
        options: Options,
    ) -> Result<Self, Error> {
        let unsupported = |reason| Error::UnsupportedCollection {
            type_name: DataType::from_parts(ty.kind(), ty.custom().cloned(), ty.args().to_vec())
                .to_string(),
            options,
            reason,
        };
        let trust = classify(ty.kind(), ty.custom().map(|ty| &**ty)).map_err(unsupported)?;
        match trust {
            Trust::Native => {
                // Sorted kinds are ordered once, after every item has arrived.
                let mode = match ty.kind().is_sorted() {
                    true => Mode::Collect(Vec::new(), Vec::new()),
                    false => Mode::Append,
                };
                Ok(Self {
                    target: ObjectRef::new(Collection::from_type(ty, comparer)),
                    mode,
                })
            }
            Trust::ExistingTarget => {
                let target = existing
                    .and_then(Value::as_object)
                    .filter(|object| {
                        object
                            .borrow()
                            .as_collection()
                            .is_some_and(|c| c.kind() == ty.kind())
                    })
                    .cloned()
                    .ok_or_else(|| unsupported("can only be restored into an existing instance"))?;
                if let Some(collection) = target.borrow_mut().as_collection_mut() {
                    collection.clear();
                }
                Ok(Self {
                    target,
                    mode: Mode::Append,
                })
            }
            Trust::Generic => {
                let append = matches!(
                    ty.custom().map(|ty| ty.kind()),
                    Some(TypeKind::Collection(capabilities)) if capabilities.append
                );
                let mode = match append {
                    true => Mode::Append,
                    false => Mode::Collect(Vec::new(), Vec::new()),
                };
                Ok(Self {
                    target: ObjectRef::new(Collection::from_type(ty, comparer)),
                    mode,
                })
            }
        }
    }

    /// The instance being built (registered before its items are decoded).
    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    /// Pre-sizes the target for `additional` items.
    pub fn reserve(&mut self, additional: usize) {
        if additional == 0 {
            return;
        }
        if let Some(collection) = self.target.borrow_mut().as_collection_mut() {
            collection.reserve(additional);
        }
    }

    pub fn push(&mut self, item: Value) {
        match &mut self.mode {
            Mode::Append => {
                if let Some(collection) = self.target.borrow_mut().as_collection_mut() {
                    collection.push(item);
                }
            }
            Mode::Collect(items, _) => items.push(item),
        }
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match &mut self.mode {
            Mode::Append => {
                if let Some(collection) = self.target.borrow_mut().as_collection_mut() {
                    collection.insert(key, value);
                }
            }
            Mode::Collect(_, entries) => entries.push((key, value)),
        }
    }

    pub fn finish(self) -> ObjectRef {
        if let Mode::Collect(items, entries) = self.mode {
            if let Some(collection) = self.target.borrow_mut().as_collection_mut() {
                collection.extend(items);
                collection.extend(entries);
            }
        }
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Capabilities;

    #[test]
    fn test_classification() {
        assert_eq!(classify(CollectionKind::Map, None), Ok(Trust::Native));
        assert_eq!(
            classify(CollectionKind::ReadOnlyList, None),
            Ok(Trust::ExistingTarget)
        );

        let appendable = TypeDescriptor::collection(
            "test.collections.Appendable",
            Capabilities {
                append: true,
                from_sequence: false,
            },
        )
        .build();
        assert_eq!(
            classify(CollectionKind::Custom, Some(&appendable)),
            Ok(Trust::Generic)
        );

        let sealed =
            TypeDescriptor::collection("test.collections.Sealed", Capabilities::default()).build();
        let reason = classify(CollectionKind::Custom, Some(&sealed)).unwrap_err();
        assert!(reason.contains("no append/insert primitive"));
    }

    #[test]
    fn test_unsupported_comparer() {
        let culture = Comparer::custom("culture", |a, b| a.type_name().cmp(&b.type_name()));
        let set = Collection::set(DataType::STRING).with_comparer(culture);

        let err = describe(&set, Options::empty()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedComparer { .. }));
        assert!(err.to_string().contains("culture"));

        let forced = describe(&set, Options::FORCE_RECURSIVE_FALLBACK).unwrap();
        assert_eq!(forced.comparer, Some(0));
    }

    #[test]
    fn test_supported_comparer() {
        let set =
            Collection::sorted_set(DataType::STRING).with_comparer(Comparer::OrdinalIgnoreCase);
        let descriptor = describe(&set, Options::empty()).unwrap();
        assert_eq!(descriptor.trust, Trust::Native);
        assert_eq!(descriptor.comparer, Some(2));

        let list = Collection::list(DataType::I32);
        assert_eq!(describe(&list, Options::empty()).unwrap().comparer, None);
    }

    #[test]
    fn test_sorted_identity_keys_refused() {
        let node = TypeDescriptor::reference("test.collections.Node").build();
        let key = Value::object(crate::Record::new(node));
        let set = Collection::sorted_set(DataType::OBJECT).with_items([key.clone()]);
        let err = describe(&set, Options::empty()).unwrap_err();
        assert!(err.to_string().contains("object identity"));
        assert!(describe(&set, Options::FORCE_RECURSIVE_FALLBACK).is_ok());

        let pair = Value::Pair(Box::new((Value::I32(1), key.clone())));
        let map = Collection::sorted_map(DataType::OBJECT, DataType::I32)
            .with_entries([(pair, Value::I32(1))]);
        assert!(matches!(
            describe(&map, Options::empty()),
            Err(Error::UnsupportedCollection { .. })
        ));

        // Identity in values, or in unsorted keys, is fine.
        let map = Collection::sorted_map(DataType::I32, DataType::OBJECT)
            .with_entries([(Value::I32(1), key.clone())]);
        assert!(describe(&map, Options::empty()).is_ok());
        let set = Collection::set(DataType::OBJECT).with_items([key]);
        assert!(describe(&set, Options::empty()).is_ok());
    }

    #[test]
    fn test_sorted_builder_orders_once() {
        let ty = match DataType::sorted_map(DataType::I32, DataType::STRING) {
            DataType::Collection(ct) => *ct,
            _ => unreachable!(),
        };
        let mut builder = Builder::new(&ty, Comparer::Default, None, Options::empty()).unwrap();
        for key in (0..1000).rev() {
            builder.insert(Value::I32(key), Value::String(key.to_string()));
        }
        builder.insert(Value::I32(5), Value::from("last"));
        assert!(builder.target().borrow().as_collection().unwrap().is_empty());

        let target = builder.finish();
        let target = target.borrow();
        let map = target.as_collection().unwrap();
        assert_eq!(map.len(), 1000);
        assert_eq!(map.entries()[0].0, Value::I32(0));
        assert_eq!(map.entries()[999].0, Value::I32(999));
        assert_eq!(map.get(&Value::I32(5)), Some(&Value::from("last")));
    }

    #[test]
    fn test_read_only_requires_existing() {
        let ty = match DataType::read_only_list(DataType::I32) {
            DataType::Collection(ct) => *ct,
            _ => unreachable!(),
        };
        let err = Builder::new(&ty, Comparer::Default, None, Options::empty()).err();
        assert!(matches!(err, Some(Error::UnsupportedCollection { .. })));

        let existing = Value::object(
            Collection::read_only_list(DataType::I32).with_items([Value::I32(9)]),
        );
        let mut builder =
            Builder::new(&ty, Comparer::Default, Some(&existing), Options::empty()).unwrap();
        builder.push(Value::I32(1));
        let target = builder.finish();
        assert!(existing.as_object().unwrap().ptr_eq(&target));
        assert_eq!(
            target.borrow().as_collection().unwrap().values(),
            &[Value::I32(1)]
        );
    }

    #[test]
    fn test_collect_mode() {
        let bag = TypeDescriptor::collection(
            "test.collections.Frozen",
            Capabilities {
                append: false,
                from_sequence: true,
            },
        )
        .build();
        let ty = match DataType::custom(bag, DataType::U8, None) {
            DataType::Collection(ct) => *ct,
            _ => unreachable!(),
        };
        let mut builder = Builder::new(&ty, Comparer::Default, None, Options::empty()).unwrap();
        builder.push(Value::U8(1));
        assert!(builder.target().borrow().as_collection().unwrap().is_empty());
        builder.push(Value::U8(2));
        let target = builder.finish();
        assert_eq!(target.borrow().as_collection().unwrap().len(), 2);
    }
}
