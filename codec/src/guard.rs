//! Policing of stream-supplied lengths and type names.
//!
//! In safe mode every count that drives an allocation is checked against the bytes left
//! in the source before anything is allocated, capacity hints are ignored, and type names
//! only resolve to the expected types (and the types their declarations mention).
//! Outside of safe mode lengths are trusted, allocations are attempted fallibly and names
//! resolve through the configured [crate::TypeResolver].

use crate::{types::DataType, Config, Error, Options, TypeDescriptor};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Per-call guard.
pub(crate) struct Guard<'a> {
    config: &'a Config,
    allowed: Option<HashMap<String, Arc<TypeDescriptor>>>,
    resolved: HashMap<String, Arc<TypeDescriptor>>,
}

impl<'a> Guard<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            allowed: None,
            resolved: HashMap::new(),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.config.has(Options::SAFE_MODE)
    }

    /// Validates a declared element count.
    ///
    /// `unit` is the minimum number of bytes one element occupies in the stream and
    /// `remaining` the number of bytes left in the source.
    pub fn check_length(
        &self,
        declared: u64,
        unit: usize,
        remaining: usize,
    ) -> Result<usize, Error> {
        if self.is_safe() {
            let needed = u128::from(declared) * unit.max(1) as u128;
            if needed > remaining as u128 {
                debug!(remaining, "declared length exceeds the source");
                return Err(Error::LengthMismatch {
                    declared,
                    available: remaining,
                });
            }
        }
        usize::try_from(declared).map_err(|_| Error::Allocation(usize::MAX))
    }

    /// Allocates room for `len` elements (a length already passed to [Guard::check_length]).
    pub fn allocate<T>(&self, len: usize) -> Result<Vec<T>, Error> {
        if self.is_safe() {
            return Ok(Vec::with_capacity(len));
        }
        let mut items = Vec::new();
        items
            .try_reserve_exact(len)
            .map_err(|_| Error::Allocation(len))?;
        Ok(items)
    }

    /// Pre-size hint of a growable collection: ignored in safe mode.
    pub fn capacity_hint(&self, hint: u64) -> usize {
        match self.is_safe() {
            true => 0,
            false => usize::try_from(hint).unwrap_or(0),
        }
    }

    /// Resolves a type name read from the stream.
    pub fn resolve(&mut self, name: &str) -> Result<Arc<TypeDescriptor>, Error> {
        if let Some(ty) = self.resolved.get(name) {
            return Ok(ty.clone());
        }
        let ty = match self.is_safe() {
            true => self.resolve_allowed(name)?,
            false => self.resolve_trusted(name)?,
        };
        self.resolved.insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    fn resolve_allowed(&mut self, name: &str) -> Result<Arc<TypeDescriptor>, Error> {
        if self.config.expected_types.is_empty() {
            debug!("named type in safe mode without expected types");
            return Err(Error::ExpectedTypesRequired);
        }
        let allowed = self
            .allowed
            .get_or_insert_with(|| allowed_types(&self.config.expected_types));
        match allowed.get(name) {
            Some(ty) => Ok(ty.clone()),
            None => {
                debug!("named type is not among the expected types");
                Err(Error::TypeNotAllowed)
            }
        }
    }

    fn resolve_trusted(&self, name: &str) -> Result<Arc<TypeDescriptor>, Error> {
        if let Some(ty) = self.config.expected_types.iter().find(|ty| ty.name() == name) {
            return Ok(ty.clone());
        }
        self.config
            .resolver
            .resolve(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }
}

/// Minimum number of bytes a value of `ty` occupies in a typed slot.
pub(crate) fn min_size(ty: &DataType) -> usize {
    match ty {
        DataType::Elementary(kind) => kind.fixed_size().unwrap_or(1),
        _ => 1,
    }
}

/// The expected types plus every type reachable from their declarations (bases, member
/// types, element types and custom collection types).
fn allowed_types(expected: &[Arc<TypeDescriptor>]) -> HashMap<String, Arc<TypeDescriptor>> {
    let mut allowed = HashMap::new();
    let mut pending: Vec<Arc<TypeDescriptor>> = expected.to_vec();
    while let Some(ty) = pending.pop() {
        if allowed.contains_key(ty.name()) {
            continue;
        }
        if let Some(base) = ty.base() {
            pending.push(base.clone());
        }
        for member in ty.declared_members() {
            collect_named(member.ty(), &mut pending);
        }
        allowed.insert(ty.name().to_string(), ty);
    }
    allowed
}

fn collect_named(ty: &DataType, pending: &mut Vec<Arc<TypeDescriptor>>) {
    let mut stack = vec![ty];
    while let Some(ty) = stack.pop() {
        match ty {
            DataType::Elementary(_) => {}
            DataType::Named(named) => pending.push(named.clone()),
            DataType::Collection(ct) => {
                if let Some(custom) = ct.custom() {
                    pending.push(custom.clone());
                }
                stack.extend(ct.args());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TypeRegistry, TypeResolver};

    fn safe(expected: Vec<Arc<TypeDescriptor>>) -> Config {
        let mut config = Config::new(Options::SAFE_MODE);
        config.expected_types = expected;
        config
    }

    #[test]
    fn test_length_laundering() {
        let config = safe(Vec::new());
        let guard = Guard::new(&config);
        assert_eq!(guard.check_length(3, 4, 12).unwrap(), 3);
        assert!(matches!(
            guard.check_length(u64::MAX, 4, 12),
            Err(Error::LengthMismatch { .. })
        ));
        assert_eq!(guard.capacity_hint(1 << 40), 0);

        let config = Config::new(Options::empty());
        let guard = Guard::new(&config);
        assert_eq!(guard.check_length(1000, 4, 12).unwrap(), 1000);
        assert!(matches!(
            guard.allocate::<u64>(usize::MAX),
            Err(Error::Allocation(_))
        ));
    }

    #[test]
    fn test_safe_resolution() {
        let leaf = TypeDescriptor::reference("test.guard.Leaf").build();
        let other = TypeDescriptor::reference("test.guard.Other").build();
        let tree = TypeDescriptor::reference("test.guard.Tree")
            .member("children", DataType::list(DataType::named(leaf)))
            .build();

        let config = safe(Vec::new());
        let mut guard = Guard::new(&config);
        assert!(matches!(
            guard.resolve("test.guard.Tree"),
            Err(Error::ExpectedTypesRequired)
        ));

        let config = safe(vec![tree]);
        let mut guard = Guard::new(&config);
        assert!(guard.resolve("test.guard.Tree").is_ok());
        assert!(guard.resolve("test.guard.Leaf").is_ok());
        assert!(matches!(
            guard.resolve(other.name()),
            Err(Error::TypeNotAllowed)
        ));
    }

    #[test]
    fn test_trusted_resolution() {
        let registry = Arc::new(TypeRegistry::new());
        registry.register(TypeDescriptor::reference("test.guard.Known").build());
        let mut config = Config::new(Options::empty());
        config.resolver = registry;

        let mut guard = Guard::new(&config);
        assert!(guard.resolve("test.guard.Known").is_ok());
        assert!(matches!(
            guard.resolve("test.guard.Unknown"),
            Err(Error::UnknownType(_))
        ));
    }
}
