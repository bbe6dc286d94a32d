//! Tree form of a type code sequence.

use super::{CollectionKind, ElementaryKind, TypeCode, TypeCodeWalker};
use crate::{Error, Record, TypeDescriptor, TypeKind, Value};
use std::sync::Arc;

/// The declared or runtime type of a value.
#[derive(Clone)]
pub enum DataType {
    /// A primitive, a string, or `Object` (any value, described at runtime).
    Elementary(ElementaryKind),
    /// A user-defined record type.
    Named(Arc<TypeDescriptor>),
    /// A collection or generic wrapper.
    Collection(Box<CollectionType>),
}

/// A collection shape together with its element types.
#[derive(Clone, PartialEq)]
pub struct CollectionType {
    kind: CollectionKind,
    custom: Option<Arc<TypeDescriptor>>,
    args: Vec<DataType>,
}

impl CollectionType {
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Descriptor of a user-defined collection type.
    pub fn custom(&self) -> Option<&Arc<TypeDescriptor>> {
        self.custom.as_ref()
    }

    /// Element types, one per slot of the kind.
    pub fn args(&self) -> &[DataType] {
        &self.args
    }
}

macro_rules! elementary {
    ($($name:ident => $kind:ident,)*) => {
        $(pub const $name: DataType = DataType::Elementary(ElementaryKind::$kind);)*
    };
}

impl DataType {
    elementary! {
        BOOL => Bool,
        I8 => I8,
        U8 => U8,
        I16 => I16,
        U16 => U16,
        I32 => I32,
        U32 => U32,
        I64 => I64,
        U64 => U64,
        I128 => I128,
        U128 => U128,
        F32 => F32,
        F64 => F64,
        CHAR => Char,
        STRING => String,
        OBJECT => Object,
    }

    pub fn named(ty: Arc<TypeDescriptor>) -> Self {
        DataType::Named(ty)
    }

    fn collection(kind: CollectionKind, args: Vec<DataType>) -> Self {
        DataType::Collection(Box::new(CollectionType {
            kind,
            custom: None,
            args,
        }))
    }

    pub fn array(element: DataType) -> Self {
        Self::collection(CollectionKind::Array, vec![element])
    }

    pub fn list(element: DataType) -> Self {
        Self::collection(CollectionKind::List, vec![element])
    }

    pub fn deque(element: DataType) -> Self {
        Self::collection(CollectionKind::Deque, vec![element])
    }

    pub fn set(element: DataType) -> Self {
        Self::collection(CollectionKind::Set, vec![element])
    }

    pub fn sorted_set(element: DataType) -> Self {
        Self::collection(CollectionKind::SortedSet, vec![element])
    }

    pub fn map(key: DataType, value: DataType) -> Self {
        Self::collection(CollectionKind::Map, vec![key, value])
    }

    pub fn sorted_map(key: DataType, value: DataType) -> Self {
        Self::collection(CollectionKind::SortedMap, vec![key, value])
    }

    pub fn optional(inner: DataType) -> Self {
        Self::collection(CollectionKind::Optional, vec![inner])
    }

    pub fn pair(key: DataType, value: DataType) -> Self {
        Self::collection(CollectionKind::Pair, vec![key, value])
    }

    pub fn read_only_list(element: DataType) -> Self {
        Self::collection(CollectionKind::ReadOnlyList, vec![element])
    }

    /// A user-defined collection: one element type, or two for a map.
    pub fn custom(ty: Arc<TypeDescriptor>, element: DataType, value: Option<DataType>) -> Self {
        let (kind, args) = match value {
            Some(value) => (CollectionKind::CustomMap, vec![element, value]),
            None => (CollectionKind::Custom, vec![element]),
        };
        DataType::Collection(Box::new(CollectionType {
            kind,
            custom: Some(ty),
            args,
        }))
    }

    /// A collection type with exactly one argument per slot of `kind`. Missing arguments
    /// are untyped and extra ones are dropped.
    pub(crate) fn from_parts(
        kind: CollectionKind,
        custom: Option<Arc<TypeDescriptor>>,
        mut args: Vec<DataType>,
    ) -> Self {
        args.resize(kind.slot_count(), DataType::OBJECT);
        DataType::Collection(Box::new(CollectionType { kind, custom, args }))
    }

    /// Size of a fixed-size primitive, `None` for everything else.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Elementary(kind) => kind.fixed_size(),
            _ => None,
        }
    }

    /// Whether values of this type are shared by reference (and take a reference tag).
    pub fn has_identity(&self) -> bool {
        match self {
            DataType::Elementary(_) => false,
            DataType::Named(ty) => !ty.is_value_type(),
            DataType::Collection(ct) => ct.kind.has_identity(),
        }
    }

    /// Value of a member of this type in a fresh instance.
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Elementary(kind) => match kind {
                ElementaryKind::Bool => Value::Bool(false),
                ElementaryKind::I8 => Value::I8(0),
                ElementaryKind::U8 => Value::U8(0),
                ElementaryKind::I16 => Value::I16(0),
                ElementaryKind::U16 => Value::U16(0),
                ElementaryKind::I32 => Value::I32(0),
                ElementaryKind::U32 => Value::U32(0),
                ElementaryKind::I64 => Value::I64(0),
                ElementaryKind::U64 => Value::U64(0),
                ElementaryKind::I128 => Value::I128(0),
                ElementaryKind::U128 => Value::U128(0),
                ElementaryKind::F32 => Value::F32(0.0),
                ElementaryKind::F64 => Value::F64(0.0),
                ElementaryKind::Char => Value::Char('\0'),
                ElementaryKind::String => Value::String(String::new()),
                ElementaryKind::Null | ElementaryKind::Object | ElementaryKind::Named => {
                    Value::Null
                }
            },
            DataType::Named(ty) if ty.is_value_type() => Value::Struct(Record::new(ty.clone())),
            DataType::Named(_) | DataType::Collection(_) => Value::Null,
        }
    }

    /// Appends the pre-order codes of this type, and the descriptors it names (in the
    /// order their codes appear), to `codes` and `names`.
    pub fn to_codes(&self, codes: &mut Vec<TypeCode>, names: &mut Vec<Arc<TypeDescriptor>>) {
        match self {
            DataType::Elementary(kind) => codes.push(TypeCode::elementary(*kind)),
            DataType::Named(ty) => {
                codes.push(TypeCode::elementary(ElementaryKind::Named));
                names.push(ty.clone());
            }
            DataType::Collection(ct) => {
                // Empty only for a kind without slots.
                let Some((first, rest)) = ct.args.split_first() else {
                    codes.push(TypeCode::collection(ct.kind, ElementaryKind::Object));
                    return;
                };
                let embedded = match first {
                    DataType::Elementary(kind) => *kind,
                    DataType::Named(_) => ElementaryKind::Named,
                    DataType::Collection(_) => ElementaryKind::Null,
                };
                codes.push(TypeCode::collection(ct.kind, embedded));
                if let Some(custom) = &ct.custom {
                    names.push(custom.clone());
                }
                match first {
                    DataType::Named(ty) => names.push(ty.clone()),
                    DataType::Collection(_) => first.to_codes(codes, names),
                    DataType::Elementary(_) => {}
                }
                for arg in rest {
                    arg.to_codes(codes, names);
                }
            }
        }
    }

    /// Builds the type described by the next tree of `walker`, taking the descriptors of
    /// named codes from `names` in code order.
    pub fn from_walker(
        walker: &mut TypeCodeWalker,
        names: &mut impl Iterator<Item = Arc<TypeDescriptor>>,
    ) -> Result<Self, Error> {
        let code = walker.advance();
        Self::parse(code, walker, names)
    }

    fn parse(
        code: TypeCode,
        walker: &mut TypeCodeWalker,
        names: &mut impl Iterator<Item = Arc<TypeDescriptor>>,
    ) -> Result<Self, Error> {
        if code.is_null() {
            return Err(Error::TruncatedTypeCodes);
        }
        if !code.is_composite() {
            return Self::leaf(code.elementary_kind(), names);
        }

        let kind = code.collection_kind();
        let custom = match kind.is_custom() {
            true => {
                let ty = next_name(names)?;
                if !matches!(ty.kind(), TypeKind::Collection(_)) {
                    return Err(Error::InvalidData(
                        "type",
                        format!("{} is not a collection", ty.name()),
                    ));
                }
                Some(ty)
            }
            false => None,
        };

        let mut args = Vec::with_capacity(kind.slot_count());
        let element = walker.descend_into_element();
        args.push(Self::parse(element, walker, names)?);
        for _ in 1..kind.slot_count() {
            let next = walker.advance();
            args.push(Self::parse(next, walker, names)?);
        }
        Ok(Self::from_parts(kind, custom, args))
    }

    fn leaf(
        kind: ElementaryKind,
        names: &mut impl Iterator<Item = Arc<TypeDescriptor>>,
    ) -> Result<Self, Error> {
        match kind {
            ElementaryKind::Null => Err(Error::TruncatedTypeCodes),
            ElementaryKind::Named => {
                let ty = next_name(names)?;
                if matches!(ty.kind(), TypeKind::Collection(_)) {
                    return Err(Error::InvalidData(
                        "type",
                        format!("{} is a collection", ty.name()),
                    ));
                }
                Ok(DataType::Named(ty))
            }
            kind => Ok(DataType::Elementary(kind)),
        }
    }

    /// Builds a type from a complete code sequence.
    pub fn from_codes(
        codes: Vec<TypeCode>,
        names: Vec<Arc<TypeDescriptor>>,
    ) -> Result<Self, Error> {
        let mut walker = TypeCodeWalker::new(codes);
        let ty = Self::from_walker(&mut walker, &mut names.into_iter())?;
        if !walker.is_exhausted() {
            return Err(Error::InvalidData(
                "type",
                "codes follow a complete type tree".into(),
            ));
        }
        Ok(ty)
    }
}

fn next_name(
    names: &mut impl Iterator<Item = Arc<TypeDescriptor>>,
) -> Result<Arc<TypeDescriptor>, Error> {
    names
        .next()
        .ok_or_else(|| Error::InvalidData("type", "missing type name".into()))
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataType::Elementary(a), DataType::Elementary(b)) => a == b,
            (DataType::Named(a), DataType::Named(b)) => a.name() == b.name(),
            (DataType::Collection(a), DataType::Collection(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Elementary(kind) => f.write_str(kind.name()),
            DataType::Named(ty) => f.write_str(ty.name()),
            DataType::Collection(ct) => {
                match &ct.custom {
                    Some(ty) => write!(f, "{}<", ty.name())?,
                    None => write!(f, "{}<", ct.kind.name())?,
                }
                for (i, arg) in ct.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
        }
    }
}

impl std::fmt::Debug for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
