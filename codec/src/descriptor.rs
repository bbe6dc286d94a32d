//! Descriptions of user-defined types.
//!
//! A [TypeDescriptor] is the contract between the engine and the types it encodes: a name
//! (written to the stream), a [TypeKind], an optional base type, the declared members and
//! the hooks that customize encoding. Descriptors are immutable once built and are shared
//! through `Arc` (including across threads, through the process-wide registry).

use crate::{
    hooks::{Callback, CustomSerializer, Hooks, Substitute},
    BoxError, DataType, ObjectRef, Record, Value,
};
use std::sync::{Arc, OnceLock};

/// What kind of instances a descriptor describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// Copied by value, no identity. Eligible for the raw layout fast path.
    Value,
    /// Shared by reference, identity preserved.
    Reference,
    /// A user-defined collection, reconstructed by generic population.
    Collection(Capabilities),
}

/// Reconstruction primitives a custom collection type exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Items can be added one at a time to an empty instance.
    pub append: bool,
    /// An instance can be initialized from a complete sequence of items.
    pub from_sequence: bool,
}

impl Capabilities {
    /// Whether the engine can rebuild an instance at all.
    pub fn is_reconstructible(&self) -> bool {
        self.append || self.from_sequence
    }
}

/// Produces the initial value of a member when an instance is created.
pub type Initializer = Arc<dyn Fn() -> Value + Send + Sync>;

/// A member declared on a type.
#[derive(Clone)]
pub struct Member {
    name: String,
    ty: DataType,
    transient: bool,
    init: Option<Initializer>,
}

impl Member {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &DataType {
        &self.ty
    }

    /// Transient members are never encoded.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Initial value of the member for a fresh instance.
    pub fn initial_value(&self) -> Value {
        match &self.init {
            Some(init) => init(),
            None => self.ty.default_value(),
        }
    }
}

/// A member of a type (including inherited ones) together with its field slot.
#[derive(Clone)]
pub struct MemberInfo {
    name: String,
    ty: DataType,
    slot: usize,
    transient: bool,
}

impl MemberInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type of the member.
    pub fn ty(&self) -> &DataType {
        &self.ty
    }

    /// Index of the member's field within a [Record].
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Reads the member from `record`.
    pub fn get<'a>(&self, record: &'a Record) -> &'a Value {
        record.field(self.slot)
    }

    /// Writes the member of `record`.
    pub fn set(&self, record: &mut Record, value: Value) {
        record.set_field(self.slot, value);
    }
}

/// Describes a user-defined type.
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    base: Option<Arc<TypeDescriptor>>,
    members: Vec<Member>,
    hooks: Hooks,

    all_members: OnceLock<Vec<MemberInfo>>,
    pub(crate) layout: OnceLock<Option<usize>>,
}

impl TypeDescriptor {
    /// Starts describing a reference type.
    pub fn reference(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(name.into(), TypeKind::Reference)
    }

    /// Starts describing a value type.
    pub fn value(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(name.into(), TypeKind::Value)
    }

    /// Starts describing a custom collection type.
    pub fn collection(name: impl Into<String>, capabilities: Capabilities) -> TypeBuilder {
        TypeBuilder::new(name.into(), TypeKind::Collection(capabilities))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_value_type(&self) -> bool {
        self.kind == TypeKind::Value
    }

    pub fn base(&self) -> Option<&Arc<TypeDescriptor>> {
        self.base.as_ref()
    }

    /// Members declared on this type only.
    pub fn declared_members(&self) -> &[Member] {
        &self.members
    }

    /// All members, base types first, in field slot order.
    pub fn all_members(&self) -> &[MemberInfo] {
        self.all_members.get_or_init(|| {
            let mut members = Vec::new();
            for ty in self.lineage() {
                for member in &ty.members {
                    members.push(MemberInfo {
                        name: member.name.clone(),
                        ty: member.ty.clone(),
                        slot: members.len(),
                        transient: member.transient,
                    });
                }
            }
            members
        })
    }

    /// Initial field values of a fresh instance.
    pub(crate) fn initial_fields(&self) -> Vec<Value> {
        self.lineage()
            .flat_map(|ty| ty.members.iter().map(Member::initial_value))
            .collect()
    }

    /// The type and its bases, base-most first.
    pub fn lineage(&self) -> impl Iterator<Item = &TypeDescriptor> {
        let mut chain = Vec::new();
        let mut next = Some(self);
        while let Some(ty) = next {
            chain.push(ty);
            next = ty.base.as_deref();
        }
        chain.into_iter().rev()
    }

    /// Whether `self` is `other` or derives from it.
    pub fn is_assignable_to(&self, other: &TypeDescriptor) -> bool {
        self.lineage().any(|ty| ty.name == other.name)
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }
}

// Type names are unique within a process.
impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base", &self.base.as_ref().map(|b| b.name()))
            .finish_non_exhaustive()
    }
}

/// Builder for [TypeDescriptor].
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    base: Option<Arc<TypeDescriptor>>,
    members: Vec<Member>,
    hooks: Hooks,
}

impl TypeBuilder {
    fn new(name: String, kind: TypeKind) -> Self {
        Self {
            name,
            kind,
            base: None,
            members: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    /// Sets the base type. Its members precede the members of this type.
    pub fn base(mut self, base: Arc<TypeDescriptor>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn member(mut self, name: impl Into<String>, ty: DataType) -> Self {
        self.members.push(Member {
            name: name.into(),
            ty,
            transient: false,
            init: None,
        });
        self
    }

    /// Adds a member that is never encoded.
    pub fn transient(mut self, name: impl Into<String>, ty: DataType) -> Self {
        self.members.push(Member {
            name: name.into(),
            ty,
            transient: true,
            init: None,
        });
        self
    }

    /// Adds a member whose initial value is produced by `init`.
    pub fn initialized(
        mut self,
        name: impl Into<String>,
        ty: DataType,
        init: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.members.push(Member {
            name: name.into(),
            ty,
            transient: false,
            init: Some(Arc::new(init)),
        });
        self
    }

    /// Replaces member-wise encoding with `serializer`.
    pub fn custom(mut self, serializer: impl CustomSerializer + 'static) -> Self {
        self.hooks.custom = Some(Arc::new(serializer));
        self
    }

    pub fn on_serializing(
        mut self,
        f: impl Fn(&mut Record) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_serializing.push(Arc::new(f) as Callback);
        self
    }

    pub fn on_serialized(
        mut self,
        f: impl Fn(&mut Record) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_serialized.push(Arc::new(f) as Callback);
        self
    }

    pub fn on_deserializing(
        mut self,
        f: impl Fn(&mut Record) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_deserializing.push(Arc::new(f) as Callback);
        self
    }

    pub fn on_deserialized(
        mut self,
        f: impl Fn(&mut Record) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_deserialized.push(Arc::new(f) as Callback);
        self
    }

    /// Installs a substitution hook: after an instance is decoded, the value it returns
    /// takes the instance's place in the graph.
    pub fn substitute(
        mut self,
        f: impl Fn(&ObjectRef) -> Result<Value, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.substitute = Some(Arc::new(f) as Substitute);
        self
    }

    pub fn build(self) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor {
            name: self.name,
            kind: self.kind,
            base: self.base,
            members: self.members,
            hooks: self.hooks,
            all_members: OnceLock::new(),
            layout: OnceLock::new(),
        })
    }
}
