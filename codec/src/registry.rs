//! Process-wide type name resolution.
//!
//! Outside of safe mode, type names read from a stream are resolved through a
//! [TypeResolver]. The default resolver is a process-wide [TypeRegistry] that encoding
//! populates with every named type it writes. Entries are published whole under a lock
//! and never replaced: the first registration of a name wins.

use crate::TypeDescriptor;
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

/// Resolve-or-register interface over a type name table.
pub trait TypeResolver: Send + Sync {
    /// Looks up a type by name.
    fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>>;

    /// Registers `ty` unless its name is already known. Returns the registered descriptor.
    fn register(&self, ty: Arc<TypeDescriptor>) -> Arc<TypeDescriptor>;
}

/// A thread-safe name table.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeResolver for TypeRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn register(&self, ty: Arc<TypeDescriptor>) -> Arc<TypeDescriptor> {
        if let Some(existing) = self.resolve(ty.name()) {
            return existing;
        }
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ty.name().to_string())
            .or_insert(ty)
            .clone()
    }
}

static GLOBAL: LazyLock<Arc<TypeRegistry>> = LazyLock::new(|| Arc::new(TypeRegistry::new()));

/// The process-wide registry.
pub fn global() -> Arc<dyn TypeResolver> {
    GLOBAL.clone()
}
