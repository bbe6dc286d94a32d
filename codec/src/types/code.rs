//! Type codes: one node of a flattened type tree.
//!
//! A [TypeCode] packs a [CollectionKind] into its high byte and an [ElementaryKind] into
//! its low byte. An elementary code (collection kind [CollectionKind::None]) describes a
//! leaf. A composite code describes a collection whose first element type is either
//! embedded in the low byte (when it is elementary) or, when the low byte is
//! [ElementaryKind::Null], described by the codes that follow. Any further element
//! types (the value of a map, the second half of a pair) always follow.

use crate::Error;

macro_rules! kinds {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:literal => $label:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)*
        }

        impl $name {
            /// Decodes a kind from its wire value.
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Human-readable name of the kind.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)*
                }
            }
        }
    };
}

kinds! {
    /// Leaf kinds of a type tree.
    pub enum ElementaryKind {
        Null = 0 => "null",
        Bool = 1 => "bool",
        I8 = 2 => "i8",
        U8 = 3 => "u8",
        I16 = 4 => "i16",
        U16 = 5 => "u16",
        I32 = 6 => "i32",
        U32 = 7 => "u32",
        I64 = 8 => "i64",
        U64 = 9 => "u64",
        I128 = 10 => "i128",
        U128 = 11 => "u128",
        F32 = 12 => "f32",
        F64 = 13 => "f64",
        Char = 14 => "char",
        String = 15 => "string",
        Object = 16 => "object",
        Named = 17 => "named",
    }
}

impl ElementaryKind {
    /// Encoded size of a fixed-size primitive, `None` for everything else.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Bool | Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 | Self::Char => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::I128 | Self::U128 => Some(16),
            Self::Null | Self::String | Self::Object | Self::Named => None,
        }
    }

    /// Whether the kind is followed by a type name in the stream.
    pub fn is_named(self) -> bool {
        self == Self::Named
    }
}

kinds! {
    /// Collection shapes recognized by the type code grammar.
    pub enum CollectionKind {
        None = 0 => "none",
        Array = 1 => "array",
        List = 2 => "list",
        Deque = 3 => "deque",
        Set = 4 => "set",
        SortedSet = 5 => "sorted-set",
        Map = 6 => "map",
        SortedMap = 7 => "sorted-map",
        Optional = 8 => "optional",
        Pair = 9 => "pair",
        ReadOnlyList = 10 => "read-only-list",
        Custom = 11 => "custom",
        CustomMap = 12 => "custom-map",
    }
}

impl CollectionKind {
    /// Number of element types a collection of this kind is generic over.
    pub fn slot_count(self) -> usize {
        match self {
            Self::None => 0,
            Self::Map | Self::SortedMap | Self::Pair | Self::CustomMap => 2,
            _ => 1,
        }
    }

    /// Whether items are key/value entries.
    pub fn is_map(self) -> bool {
        matches!(self, Self::Map | Self::SortedMap | Self::CustomMap)
    }

    /// Whether items are unique under the collection's comparer.
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            Self::Set | Self::SortedSet | Self::Map | Self::SortedMap
        )
    }

    /// Whether items are kept ordered by the collection's comparer.
    pub fn is_sorted(self) -> bool {
        matches!(self, Self::SortedSet | Self::SortedMap)
    }

    /// Whether the kind names a user-defined collection type.
    pub fn is_custom(self) -> bool {
        matches!(self, Self::Custom | Self::CustomMap)
    }

    /// Whether instances of this kind carry an identity (and so take a reference tag).
    pub fn has_identity(self) -> bool {
        !matches!(self, Self::None | Self::Optional | Self::Pair)
    }
}

/// One node of a flattened, pre-order type tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCode(u16);

impl TypeCode {
    /// The null code. Terminates a walk; as an embedded element it means "described next".
    pub const NULL: TypeCode = TypeCode(0);

    /// Creates a leaf code.
    pub const fn elementary(kind: ElementaryKind) -> Self {
        TypeCode(kind as u16)
    }

    /// Creates a composite code. Pass [ElementaryKind::Null] as `embedded` when the first
    /// element type is itself composite and follows as separate codes.
    pub const fn collection(kind: CollectionKind, embedded: ElementaryKind) -> Self {
        TypeCode(((kind as u16) << 8) | embedded as u16)
    }

    /// Validates a raw wire value.
    pub fn from_u16(raw: u16) -> Result<Self, Error> {
        let collection = CollectionKind::from_u8((raw >> 8) as u8);
        let elementary = ElementaryKind::from_u8(raw as u8);
        match (collection, elementary) {
            // A bare null never appears in a stream.
            (Some(CollectionKind::None), Some(ElementaryKind::Null)) => {
                Err(Error::InvalidTypeCode(raw))
            }
            (Some(_), Some(_)) => Ok(TypeCode(raw)),
            _ => Err(Error::InvalidTypeCode(raw)),
        }
    }

    /// Raw wire value.
    pub fn to_u16(self) -> u16 {
        self.0
    }

    /// Collection kind (high byte).
    pub fn collection_kind(self) -> CollectionKind {
        CollectionKind::from_u8((self.0 >> 8) as u8).unwrap_or(CollectionKind::None)
    }

    /// Elementary kind (low byte): the leaf itself, or a composite's embedded element.
    pub fn elementary_kind(self) -> ElementaryKind {
        ElementaryKind::from_u8(self.0 as u8).unwrap_or(ElementaryKind::Null)
    }

    /// A code is composite iff its collection kind is set.
    pub fn is_composite(self) -> bool {
        self.collection_kind() != CollectionKind::None
    }

    /// Whether this is the null/terminal code.
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Code of the embedded element, or [TypeCode::NULL] when the element follows.
    pub fn element(self) -> TypeCode {
        if !self.is_composite() {
            return Self::NULL;
        }
        TypeCode::elementary(self.elementary_kind())
    }

    /// Number of element types of a composite code.
    pub fn slot_count(self) -> usize {
        self.collection_kind().slot_count()
    }

    /// Number of element sub-trees that must be described by the codes following this one.
    pub fn pending_slots(self) -> usize {
        if !self.is_composite() {
            return 0;
        }
        let embedded = usize::from(!self.element().is_null());
        self.slot_count() - embedded
    }

    /// Number of type names this code consumes from the name section.
    pub fn name_count(self) -> usize {
        usize::from(self.collection_kind().is_custom())
            + usize::from(self.elementary_kind().is_named())
    }
}

impl std::fmt::Debug for TypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for TypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.collection_kind() {
            CollectionKind::None => f.write_str(self.elementary_kind().name()),
            kind if self.element().is_null() => write!(f, "{}<..>", kind.name()),
            kind => write!(f, "{}<{}>", kind.name(), self.elementary_kind().name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_invariant() {
        let leaf = TypeCode::elementary(ElementaryKind::I32);
        assert!(!leaf.is_composite());
        assert_eq!(leaf.pending_slots(), 0);
        assert!(leaf.element().is_null());

        let list = TypeCode::collection(CollectionKind::List, ElementaryKind::I32);
        assert!(list.is_composite());
        assert_eq!(list.element(), leaf);
        assert_eq!(list.pending_slots(), 0);

        let nested = TypeCode::collection(CollectionKind::List, ElementaryKind::Null);
        assert_eq!(nested.pending_slots(), 1);

        let map = TypeCode::collection(CollectionKind::Map, ElementaryKind::String);
        assert_eq!(map.slot_count(), 2);
        assert_eq!(map.pending_slots(), 1);

        let map = TypeCode::collection(CollectionKind::Map, ElementaryKind::Null);
        assert_eq!(map.pending_slots(), 2);
    }

    #[test]
    fn test_from_u16() {
        assert!(matches!(
            TypeCode::from_u16(0),
            Err(Error::InvalidTypeCode(0))
        ));
        assert!(TypeCode::from_u16(0x00FF).is_err());
        assert!(TypeCode::from_u16(0x4001).is_err());
        let code = TypeCode::collection(CollectionKind::SortedMap, ElementaryKind::Named);
        assert_eq!(TypeCode::from_u16(code.to_u16()).unwrap(), code);
    }

    #[test]
    fn test_name_count() {
        let code = TypeCode::collection(CollectionKind::Custom, ElementaryKind::Named);
        assert_eq!(code.name_count(), 2);
        assert_eq!(
            TypeCode::elementary(ElementaryKind::String).name_count(),
            0
        );
    }

    #[test]
    fn test_display() {
        let code = TypeCode::collection(CollectionKind::Map, ElementaryKind::String);
        assert_eq!(code.to_string(), "map<string>");
        let code = TypeCode::collection(CollectionKind::List, ElementaryKind::Null);
        assert_eq!(code.to_string(), "list<..>");
    }
}
