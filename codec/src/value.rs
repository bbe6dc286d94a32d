//! In-memory object graphs.
//!
//! A graph is made of [Value]s. Primitives, strings, value-type records ([Value::Struct])
//! and pairs are copied by value; everything with an identity (reference-type records,
//! arrays and collections) lives behind an [ObjectRef], so graphs may share nodes and
//! contain cycles.

use crate::{
    types::{CollectionKind, CollectionType, DataType},
    Error, TypeDescriptor,
};
use hashbrown::HashTable;
use std::{
    cell::{Ref, RefCell, RefMut},
    cmp::Ordering,
    collections::{hash_map::RandomState, HashMap},
    hash::{BuildHasher, Hash, Hasher},
    rc::Rc,
    sync::Arc,
};

/// Maximum number of array dimensions.
pub const MAX_RANK: usize = 32;

/// A node of an object graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    I128(i128),
    U128(u128),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    /// A value-type record (no identity).
    Struct(Record),
    /// A key/value pair.
    Pair(Box<(Value, Value)>),
    /// An object with identity.
    Ref(ObjectRef),
}

impl Value {
    /// Wraps `object` in a new [ObjectRef].
    pub fn object(object: impl Into<Object>) -> Self {
        Value::Ref(ObjectRef::new(object))
    }

    pub fn pair(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Value::Pair(Box::new((key.into(), value.into())))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Ref(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Record> {
        match self {
            Value::Struct(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short description of the value's runtime type, for error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Ref(object) => object.type_name(),
            other => match other.data_type() {
                Some(ty) => ty.to_string(),
                None => "null".into(),
            },
        }
    }

    /// Runtime type of the value (`None` for [Value::Null]).
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => DataType::BOOL,
            Value::I8(_) => DataType::I8,
            Value::U8(_) => DataType::U8,
            Value::I16(_) => DataType::I16,
            Value::U16(_) => DataType::U16,
            Value::I32(_) => DataType::I32,
            Value::U32(_) => DataType::U32,
            Value::I64(_) => DataType::I64,
            Value::U64(_) => DataType::U64,
            Value::I128(_) => DataType::I128,
            Value::U128(_) => DataType::U128,
            Value::F32(_) => DataType::F32,
            Value::F64(_) => DataType::F64,
            Value::Char(_) => DataType::CHAR,
            Value::String(_) => DataType::STRING,
            Value::Struct(record) => DataType::named(record.ty().clone()),
            Value::Pair(_) => DataType::pair(DataType::OBJECT, DataType::OBJECT),
            Value::Ref(object) => object.borrow().data_type(),
        })
    }

    /// Identity-aware structural equality.
    ///
    /// Two graphs are equal when their objects can be paired one-to-one such that every
    /// pair has equal payloads. Floats are compared by bit pattern.
    pub fn graph_eq(&self, other: &Value) -> bool {
        let mut forward = HashMap::new();
        let mut backward = HashMap::new();
        let mut pending = vec![(self.clone(), other.clone())];
        while let Some((a, b)) = pending.pop() {
            let equal = match (&a, &b) {
                (Value::F32(x), Value::F32(y)) => x.to_bits() == y.to_bits(),
                (Value::F64(x), Value::F64(y)) => x.to_bits() == y.to_bits(),
                (Value::Struct(x), Value::Struct(y)) => records_eq(x, y, &mut pending),
                (Value::Pair(x), Value::Pair(y)) => {
                    pending.push((x.0.clone(), y.0.clone()));
                    pending.push((x.1.clone(), y.1.clone()));
                    true
                }
                (Value::Ref(x), Value::Ref(y)) => {
                    match (forward.get(&x.id()), backward.get(&y.id())) {
                        (Some(paired), _) => *paired == y.id(),
                        (None, Some(_)) => false,
                        (None, None) => {
                            forward.insert(x.id(), y.id());
                            backward.insert(y.id(), x.id());
                            objects_eq(&x.borrow(), &y.borrow(), &mut pending)
                        }
                    }
                }
                (Value::Struct(_) | Value::Pair(_) | Value::Ref(_), _) => false,
                (a, b) => a == b,
            };
            if !equal {
                return false;
            }
        }
        true
    }
}

fn records_eq(a: &Record, b: &Record, pending: &mut Vec<(Value, Value)>) -> bool {
    if a.ty().name() != b.ty().name() || a.fields.len() != b.fields.len() {
        return false;
    }
    pending.extend(a.fields.iter().cloned().zip(b.fields.iter().cloned()));
    true
}

fn objects_eq(a: &Object, b: &Object, pending: &mut Vec<(Value, Value)>) -> bool {
    match (a, b) {
        (Object::Record(a), Object::Record(b)) => records_eq(a, b, pending),
        (Object::Array(a), Object::Array(b)) => {
            if a.element != b.element
                || a.lengths != b.lengths
                || a.lower_bounds != b.lower_bounds
                || a.items.len() != b.items.len()
            {
                return false;
            }
            pending.extend(a.items.iter().cloned().zip(b.items.iter().cloned()));
            true
        }
        (Object::Collection(a), Object::Collection(b)) => {
            if a.kind != b.kind
                || a.custom.as_ref().map(|t| t.name()) != b.custom.as_ref().map(|t| t.name())
                || a.args != b.args
                || a.comparer != b.comparer
            {
                return false;
            }
            match (&a.items, &b.items) {
                (Items::Sequence(x), Items::Sequence(y)) if x.len() == y.len() => {
                    pending.extend(x.iter().cloned().zip(y.iter().cloned()));
                    true
                }
                (Items::Entries(x), Items::Entries(y)) if x.len() == y.len() => {
                    for ((xk, xv), (yk, yv)) in x.iter().zip(y) {
                        pending.push((xk.clone(), yk.clone()));
                        pending.push((xv.clone(), yv.clone()));
                    }
                    true
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Shared handle to an object. Identity is the allocation.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

impl ObjectRef {
    pub fn new(object: impl Into<Object>) -> Self {
        ObjectRef(Rc::new(RefCell::new(object.into())))
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    /// Whether both handles point to the same object.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the object, unique while it is alive.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn type_name(&self) -> String {
        match self.0.try_borrow() {
            Ok(object) => object.data_type().to_string(),
            Err(_) => "<borrowed>".into(),
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

// Objects may be cyclic: only print the identity and the type.
impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectRef({:#x}, {})", self.id(), self.type_name())
    }
}

/// Anything with identity.
#[derive(Debug)]
pub enum Object {
    Record(Record),
    Array(Array),
    Collection(Collection),
}

impl Object {
    pub fn data_type(&self) -> DataType {
        match self {
            Object::Record(record) => DataType::named(record.ty().clone()),
            Object::Array(array) => DataType::array(array.element.clone()),
            Object::Collection(collection) => collection.data_type(),
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Object::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Object::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Object::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Object::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Object::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut Collection> {
        match self {
            Object::Collection(collection) => Some(collection),
            _ => None,
        }
    }
}

impl From<Record> for Object {
    fn from(record: Record) -> Self {
        Object::Record(record)
    }
}

impl From<Array> for Object {
    fn from(array: Array) -> Self {
        Object::Array(array)
    }
}

impl From<Collection> for Object {
    fn from(collection: Collection) -> Self {
        Object::Collection(collection)
    }
}

/// An instance of a user-defined type.
#[derive(Clone)]
pub struct Record {
    ty: Arc<TypeDescriptor>,
    fields: Vec<Value>,
}

impl Record {
    /// Creates an instance with every member at its initial value.
    pub fn new(ty: Arc<TypeDescriptor>) -> Self {
        let fields = ty.initial_fields();
        Self { ty, fields }
    }

    pub fn ty(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    /// Field values in slot order.
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Value of the field at `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not a slot of the record's type.
    pub fn field(&self, slot: usize) -> &Value {
        &self.fields[slot]
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [Value] {
        &mut self.fields
    }

    pub fn set_field(&mut self, slot: usize, value: Value) {
        if let Some(field) = self.fields.get_mut(slot) {
            *field = value;
        }
    }

    fn slot_of(&self, name: &str) -> Option<usize> {
        self.ty
            .all_members()
            .iter()
            .find(|member| member.name() == name)
            .map(|member| member.slot())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slot_of(name).map(|slot| &self.fields[slot])
    }

    /// Sets a member by name. Returns false if the type has no such member.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.slot_of(name) {
            Some(slot) => {
                self.fields[slot] = value.into();
                true
            }
            None => false,
        }
    }

    /// Builder form of [Record::set].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.ty.name() == other.ty.name() && self.fields == other.fields
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct(self.ty.name());
        for (member, value) in self.ty.all_members().iter().zip(&self.fields) {
            s.field(member.name(), value);
        }
        s.finish()
    }
}

/// A possibly multi-dimensional array with per-dimension lower bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    element: DataType,
    lengths: Vec<usize>,
    lower_bounds: Vec<i64>,
    items: Vec<Value>,
}

impl Array {
    /// Creates a one-dimensional, zero-based array.
    pub fn new(element: DataType, items: Vec<Value>) -> Self {
        Self {
            element,
            lengths: vec![items.len()],
            lower_bounds: vec![0],
            items,
        }
    }

    /// Creates an array of the given shape. `items` are in row-major order.
    pub fn with_shape(
        element: DataType,
        lengths: Vec<usize>,
        lower_bounds: Vec<i64>,
        items: Vec<Value>,
    ) -> Result<Self, Error> {
        if lengths.is_empty() || lengths.len() > MAX_RANK {
            return Err(Error::InvalidData(
                "array shape",
                format!("rank {} is out of range", lengths.len()),
            ));
        }
        if lower_bounds.len() != lengths.len() {
            return Err(Error::InvalidData(
                "array shape",
                "one lower bound is required per dimension".into(),
            ));
        }
        if Self::element_count(&lengths) != Some(items.len()) {
            return Err(Error::InvalidData(
                "array shape",
                format!("{} items do not fill {:?}", items.len(), lengths),
            ));
        }
        Ok(Self {
            element,
            lengths,
            lower_bounds,
            items,
        })
    }

    /// An array with the given shape whose items are filled in later.
    pub(crate) fn shaped(element: DataType, lengths: Vec<usize>, lower_bounds: Vec<i64>) -> Self {
        Self {
            element,
            lengths,
            lower_bounds,
            items: Vec::new(),
        }
    }

    /// Number of items of an array with the given dimension lengths.
    pub fn element_count(lengths: &[usize]) -> Option<usize> {
        lengths
            .iter()
            .try_fold(1usize, |total, len| total.checked_mul(*len))
    }

    pub fn element(&self) -> &DataType {
        &self.element
    }

    pub fn rank(&self) -> usize {
        self.lengths.len()
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn lower_bounds(&self) -> &[i64] {
        &self.lower_bounds
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [Value] {
        &mut self.items
    }

    pub(crate) fn set_items(&mut self, items: Vec<Value>) {
        self.items = items;
    }

    /// Item at the given (lower-bound relative) indices.
    pub fn get(&self, indices: &[i64]) -> Option<&Value> {
        if indices.len() != self.rank() {
            return None;
        }
        let mut offset = 0usize;
        for ((index, lower), len) in indices.iter().zip(&self.lower_bounds).zip(&self.lengths) {
            let relative = usize::try_from(index.checked_sub(*lower)?).ok()?;
            if relative >= *len {
                return None;
            }
            offset = offset * len + relative;
        }
        self.items.get(offset)
    }
}

/// Decides equality and ordering of keys in sets and maps.
///
/// Built-in comparers order values of different variants by variant, and object
/// references by the identity of the object. That order is not reproduced by decoding,
/// so sorted collections keyed by references are refused when encoding.
#[derive(Clone, Default)]
pub enum Comparer {
    /// Natural ordering of values.
    #[default]
    Default,
    /// Byte-wise ordering of strings.
    Ordinal,
    /// Byte-wise ordering of lowercased strings.
    OrdinalIgnoreCase,
    /// Natural ordering, reversed.
    Reverse,
    /// A user-supplied ordering. Cannot be written to a stream.
    Custom(CustomComparer),
}

/// A named, user-supplied ordering.
#[derive(Clone)]
pub struct CustomComparer {
    name: String,
    compare: Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>,
}

impl Comparer {
    pub fn custom(
        name: impl Into<String>,
        compare: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        Comparer::Custom(CustomComparer {
            name: name.into(),
            compare: Arc::new(compare),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Comparer::Default => "default",
            Comparer::Ordinal => "ordinal",
            Comparer::OrdinalIgnoreCase => "ordinal-ignore-case",
            Comparer::Reverse => "reverse",
            Comparer::Custom(custom) => &custom.name,
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            Comparer::Default | Comparer::Ordinal => natural_cmp(a, b),
            Comparer::OrdinalIgnoreCase => match (a, b) {
                (Value::String(a), Value::String(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
                (Value::Char(a), Value::Char(b)) => a.to_lowercase().cmp(b.to_lowercase()),
                _ => natural_cmp(a, b),
            },
            Comparer::Reverse => natural_cmp(b, a),
            Comparer::Custom(custom) => (custom.compare)(a, b),
        }
    }

    pub fn equals(&self, a: &Value, b: &Value) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// Identifier written to the stream, `None` for comparers that cannot be restored.
    pub fn wire_id(&self) -> Option<u8> {
        match self {
            Comparer::Default => Some(0),
            Comparer::Ordinal => Some(1),
            Comparer::OrdinalIgnoreCase => Some(2),
            Comparer::Reverse => Some(3),
            Comparer::Custom(_) => None,
        }
    }

    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            0 => Some(Comparer::Default),
            1 => Some(Comparer::Ordinal),
            2 => Some(Comparer::OrdinalIgnoreCase),
            3 => Some(Comparer::Reverse),
            _ => None,
        }
    }
}

impl PartialEq for Comparer {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl std::fmt::Debug for Comparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn variant_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::I8(_) => 2,
        Value::U8(_) => 3,
        Value::I16(_) => 4,
        Value::U16(_) => 5,
        Value::I32(_) => 6,
        Value::U32(_) => 7,
        Value::I64(_) => 8,
        Value::U64(_) => 9,
        Value::I128(_) => 10,
        Value::U128(_) => 11,
        Value::F32(_) => 12,
        Value::F64(_) => 13,
        Value::Char(_) => 14,
        Value::String(_) => 15,
        Value::Struct(_) => 16,
        Value::Pair(_) => 17,
        Value::Ref(_) => 18,
    }
}

/// Total order behind the built-in comparers. Equal values hash alike in [hash_natural].
fn natural_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::I8(a), Value::I8(b)) => a.cmp(b),
        (Value::U8(a), Value::U8(b)) => a.cmp(b),
        (Value::I16(a), Value::I16(b)) => a.cmp(b),
        (Value::U16(a), Value::U16(b)) => a.cmp(b),
        (Value::I32(a), Value::I32(b)) => a.cmp(b),
        (Value::U32(a), Value::U32(b)) => a.cmp(b),
        (Value::I64(a), Value::I64(b)) => a.cmp(b),
        (Value::U64(a), Value::U64(b)) => a.cmp(b),
        (Value::I128(a), Value::I128(b)) => a.cmp(b),
        (Value::U128(a), Value::U128(b)) => a.cmp(b),
        (Value::F32(a), Value::F32(b)) => a.total_cmp(b),
        (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
        (Value::Char(a), Value::Char(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Struct(a), Value::Struct(b)) => a.ty().name().cmp(b.ty().name()).then_with(|| {
            a.fields()
                .iter()
                .zip(b.fields())
                .map(|(x, y)| natural_cmp(x, y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.fields().len().cmp(&b.fields().len()))
        }),
        (Value::Pair(a), Value::Pair(b)) => {
            natural_cmp(&a.0, &b.0).then_with(|| natural_cmp(&a.1, &b.1))
        }
        (Value::Ref(a), Value::Ref(b)) => a.id().cmp(&b.id()),
        (a, b) => variant_rank(a).cmp(&variant_rank(b)),
    }
}

/// Items of a collection.
#[derive(Clone, Debug, PartialEq)]
pub enum Items {
    Sequence(Vec<Value>),
    Entries(Vec<(Value, Value)>),
}

impl Items {
    fn key(&self, index: usize) -> Option<&Value> {
        match self {
            Items::Sequence(items) => items.get(index),
            Items::Entries(entries) => entries.get(index).map(|(key, _)| key),
        }
    }

    fn len(&self) -> usize {
        match self {
            Items::Sequence(items) => items.len(),
            Items::Entries(entries) => entries.len(),
        }
    }
}

/// Positions of the keys of an unsorted set or map, by key hash.
///
/// The hasher is randomly keyed per collection, so a stream cannot be crafted to make
/// every key land in the same bucket.
#[derive(Clone, Default)]
struct KeyIndex {
    state: RandomState,
    table: HashTable<usize>,
}

impl std::fmt::Debug for KeyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyIndex")
            .field("keys", &self.table.len())
            .finish()
    }
}

/// Hashes `value` consistently with [Comparer::equals]. `None` for custom comparers, whose
/// equality cannot be hashed.
fn key_hash(comparer: &Comparer, state: &RandomState, value: &Value) -> Option<u64> {
    let fold_case = match comparer {
        Comparer::Custom(_) => return None,
        Comparer::OrdinalIgnoreCase => true,
        Comparer::Default | Comparer::Ordinal | Comparer::Reverse => false,
    };
    let mut hasher = state.build_hasher();
    hash_natural(value, fold_case, &mut hasher);
    Some(hasher.finish())
}

fn hash_natural(value: &Value, fold_case: bool, state: &mut impl Hasher) {
    variant_rank(value).hash(state);
    match value {
        Value::Null => {}
        Value::Bool(v) => v.hash(state),
        Value::I8(v) => v.hash(state),
        Value::U8(v) => v.hash(state),
        Value::I16(v) => v.hash(state),
        Value::U16(v) => v.hash(state),
        Value::I32(v) => v.hash(state),
        Value::U32(v) => v.hash(state),
        Value::I64(v) => v.hash(state),
        Value::U64(v) => v.hash(state),
        Value::I128(v) => v.hash(state),
        Value::U128(v) => v.hash(state),
        Value::F32(v) => v.to_bits().hash(state),
        Value::F64(v) => v.to_bits().hash(state),
        Value::Char(v) if fold_case => {
            for c in v.to_lowercase() {
                c.hash(state);
            }
        }
        Value::Char(v) => v.hash(state),
        Value::String(v) if fold_case => v.to_lowercase().hash(state),
        Value::String(v) => v.hash(state),
        Value::Struct(record) => {
            record.ty().name().hash(state);
            for field in record.fields() {
                hash_natural(field, false, state);
            }
        }
        Value::Pair(pair) => {
            hash_natural(&pair.0, false, state);
            hash_natural(&pair.1, false, state);
        }
        Value::Ref(object) => object.id().hash(state),
    }
}

/// Where a key is, or where it would go.
enum Slot {
    Found(usize),
    Vacant { index: usize, hash: Option<u64> },
}

/// A list, deque, set, map, read-only list or user-defined collection.
///
/// Set and map kinds hold unique keys: unsorted kinds find keys through a hash index,
/// sorted kinds through binary search. Adding many items to a sorted kind is cheapest
/// through [Extend], which sorts once instead of shifting on every insert.
#[derive(Clone, Debug)]
pub struct Collection {
    kind: CollectionKind,
    custom: Option<Arc<TypeDescriptor>>,
    args: Vec<DataType>,
    comparer: Comparer,
    items: Items,
    index: KeyIndex,
}

impl Collection {
    fn new(kind: CollectionKind, custom: Option<Arc<TypeDescriptor>>, args: Vec<DataType>) -> Self {
        let items = match kind.is_map() {
            true => Items::Entries(Vec::new()),
            false => Items::Sequence(Vec::new()),
        };
        Self {
            kind,
            custom,
            args,
            comparer: Comparer::Default,
            items,
            index: KeyIndex::default(),
        }
    }

    pub(crate) fn from_type(ty: &CollectionType, comparer: Comparer) -> Self {
        Self::new(ty.kind(), ty.custom().cloned(), ty.args().to_vec()).with_comparer(comparer)
    }

    pub fn list(element: DataType) -> Self {
        Self::new(CollectionKind::List, None, vec![element])
    }

    pub fn deque(element: DataType) -> Self {
        Self::new(CollectionKind::Deque, None, vec![element])
    }

    pub fn set(element: DataType) -> Self {
        Self::new(CollectionKind::Set, None, vec![element])
    }

    pub fn sorted_set(element: DataType) -> Self {
        Self::new(CollectionKind::SortedSet, None, vec![element])
    }

    pub fn map(key: DataType, value: DataType) -> Self {
        Self::new(CollectionKind::Map, None, vec![key, value])
    }

    pub fn sorted_map(key: DataType, value: DataType) -> Self {
        Self::new(CollectionKind::SortedMap, None, vec![key, value])
    }

    /// A read-only view. Items can only be added while the view is being built.
    pub fn read_only_list(element: DataType) -> Self {
        Self::new(CollectionKind::ReadOnlyList, None, vec![element])
    }

    /// An instance of a user-defined collection type (a map when `value` is set).
    pub fn custom(ty: Arc<TypeDescriptor>, element: DataType, value: Option<DataType>) -> Self {
        match value {
            Some(value) => Self::new(CollectionKind::CustomMap, Some(ty), vec![element, value]),
            None => Self::new(CollectionKind::Custom, Some(ty), vec![element]),
        }
    }

    /// Sets the comparer. Items already present are reordered and deduplicated under it.
    pub fn with_comparer(mut self, comparer: Comparer) -> Self {
        self.comparer = comparer;
        self.reindex();
        self
    }

    /// Builder form of [Collection::push].
    pub fn with_items(mut self, items: impl IntoIterator<Item = Value>) -> Self {
        self.extend(items);
        self
    }

    /// Builder form of [Collection::insert].
    pub fn with_entries(mut self, entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        self.extend(entries);
        self
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn custom_type(&self) -> Option<&Arc<TypeDescriptor>> {
        self.custom.as_ref()
    }

    pub fn args(&self) -> &[DataType] {
        &self.args
    }

    pub fn comparer(&self) -> &Comparer {
        &self.comparer
    }

    pub fn data_type(&self) -> DataType {
        DataType::from_parts(self.kind, self.custom.clone(), self.args.clone())
    }

    pub fn items(&self) -> &Items {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items of a sequence kind (empty for maps).
    pub fn values(&self) -> &[Value] {
        match &self.items {
            Items::Sequence(items) => items,
            Items::Entries(_) => &[],
        }
    }

    /// Entries of a map kind (empty for sequences).
    pub fn entries(&self) -> &[(Value, Value)] {
        match &self.items {
            Items::Sequence(_) => &[],
            Items::Entries(entries) => entries,
        }
    }

    /// Whether keys are unique under the comparer.
    fn unique_keys(&self) -> bool {
        self.kind.is_keyed() || self.kind.is_map()
    }

    /// Finds `key` among the keys of the collection.
    fn locate(&self, key: &Value) -> Slot {
        let comparer = &self.comparer;
        let len = self.items.len();
        if self.kind.is_sorted() {
            let index = match &self.items {
                Items::Sequence(items) => {
                    items.partition_point(|item| comparer.compare(item, key).is_lt())
                }
                Items::Entries(entries) => {
                    entries.partition_point(|(k, _)| comparer.compare(k, key).is_lt())
                }
            };
            return match self.items.key(index) {
                Some(found) if comparer.equals(found, key) => Slot::Found(index),
                _ => Slot::Vacant { index, hash: None },
            };
        }
        if self.unique_keys() {
            if let Some(hash) = key_hash(comparer, &self.index.state, key) {
                let found = self.index.table.find(hash, |&index| {
                    self.items
                        .key(index)
                        .is_some_and(|candidate| comparer.equals(candidate, key))
                });
                return match found {
                    Some(&index) => Slot::Found(index),
                    None => Slot::Vacant {
                        index: len,
                        hash: Some(hash),
                    },
                };
            }
        }
        // Custom comparers and non-keyed kinds.
        match (0..len).find(|&index| {
            self.items
                .key(index)
                .is_some_and(|candidate| comparer.equals(candidate, key))
        }) {
            Some(index) => Slot::Found(index),
            None => Slot::Vacant {
                index: len,
                hash: None,
            },
        }
    }

    /// Records the key just placed at `index` in the hash index.
    fn index_key(&mut self, index: usize, hash: Option<u64>) {
        let Some(hash) = hash else {
            return;
        };
        let KeyIndex { state, table } = &mut self.index;
        let state = &*state;
        let (items, comparer) = (&self.items, &self.comparer);
        table.insert_unique(hash, index, |&index| {
            items
                .key(index)
                .and_then(|key| key_hash(comparer, state, key))
                .unwrap_or_default()
        });
    }

    /// Adds an item to a sequence kind.
    ///
    /// Returns false (and leaves the collection unchanged) for map kinds, and for set kinds
    /// that already contain an equal item.
    pub fn push(&mut self, value: Value) -> bool {
        if !matches!(self.items, Items::Sequence(_)) {
            return false;
        }
        let (index, hash) = match self.unique_keys() {
            false => (self.items.len(), None),
            true => match self.locate(&value) {
                Slot::Found(_) => return false,
                Slot::Vacant { index, hash } => (index, hash),
            },
        };
        if let Items::Sequence(items) = &mut self.items {
            items.insert(index, value);
        }
        self.index_key(index, hash);
        true
    }

    /// Inserts or replaces an entry of a map kind, returning the replaced value.
    ///
    /// Has no effect on sequence kinds.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        if !matches!(self.items, Items::Entries(_)) {
            return None;
        }
        let slot = self.locate(&key);
        let Items::Entries(entries) = &mut self.items else {
            return None;
        };
        match slot {
            Slot::Found(index) => entries
                .get_mut(index)
                .map(|(_, existing)| std::mem::replace(existing, value)),
            Slot::Vacant { index, hash } => {
                entries.insert(index, (key, value));
                self.index_key(index, hash);
                None
            }
        }
    }

    /// Value of the entry whose key equals `key`.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self.locate(key) {
            Slot::Found(index) => self.entries().get(index).map(|(_, v)| v),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        matches!(self.items, Items::Sequence(_)) && matches!(self.locate(value), Slot::Found(_))
    }

    /// Orders the items of a sorted kind and drops repeated keys. The first of equal keys
    /// stays; for maps it takes the value of the last.
    fn sort_and_dedup(&mut self) {
        let comparer = &self.comparer;
        match &mut self.items {
            Items::Sequence(items) => {
                items.sort_by(|a, b| comparer.compare(a, b));
                items.dedup_by(|later, kept| comparer.equals(later, kept));
            }
            Items::Entries(entries) => {
                entries.sort_by(|a, b| comparer.compare(&a.0, &b.0));
                entries.dedup_by(|later, kept| {
                    let repeated = comparer.equals(&later.0, &kept.0);
                    if repeated {
                        std::mem::swap(&mut later.1, &mut kept.1);
                    }
                    repeated
                });
            }
        }
    }

    pub(crate) fn items_mut(&mut self) -> &mut Items {
        &mut self.items
    }

    /// Restores key order and uniqueness after keys were rewritten through
    /// [Collection::items_mut].
    pub(crate) fn reindex(&mut self) {
        if !self.unique_keys() {
            return;
        }
        self.index.table.clear();
        let empty = match self.items {
            Items::Sequence(_) => Items::Sequence(Vec::new()),
            Items::Entries(_) => Items::Entries(Vec::new()),
        };
        match std::mem::replace(&mut self.items, empty) {
            Items::Sequence(items) => self.extend(items),
            Items::Entries(entries) => self.extend(entries),
        }
    }

    /// Pre-sizes the item storage. Failure to reserve is not an error.
    pub(crate) fn reserve(&mut self, additional: usize) {
        let _ = match &mut self.items {
            Items::Sequence(items) => items.try_reserve(additional),
            Items::Entries(entries) => entries.try_reserve(additional),
        };
    }

    pub(crate) fn clear(&mut self) {
        match &mut self.items {
            Items::Sequence(items) => items.clear(),
            Items::Entries(entries) => entries.clear(),
        }
        self.index.table.clear();
    }
}

impl Extend<Value> for Collection {
    fn extend<I: IntoIterator<Item = Value>>(&mut self, items: I) {
        if self.kind.is_sorted() {
            if let Items::Sequence(existing) = &mut self.items {
                existing.extend(items);
                self.sort_and_dedup();
            }
            return;
        }
        for item in items {
            self.push(item);
        }
    }
}

impl Extend<(Value, Value)> for Collection {
    fn extend<I: IntoIterator<Item = (Value, Value)>>(&mut self, entries: I) {
        if self.kind.is_sorted() {
            if let Items::Entries(existing) = &mut self.items {
                existing.extend(entries);
                self.sort_and_dedup();
            }
            return;
        }
        for (key, value) in entries {
            self.insert(key, value);
        }
    }
}

/// Conversion out of a decoded [Value].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Error>;
}

fn unexpected(expected: &str, found: &Value) -> Error {
    Error::UnexpectedType {
        expected: expected.to_string(),
        found: found.type_name(),
    }
}

macro_rules! impl_value {
    ($($variant:ident => $type:ty,)*) => {
        $(
            impl From<$type> for Value {
                fn from(value: $type) -> Self {
                    Value::$variant(value)
                }
            }

            impl FromValue for $type {
                fn from_value(value: Value) -> Result<Self, Error> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(unexpected(stringify!($type), &other)),
                    }
                }
            }
        )*
    };
}

impl_value! {
    Bool => bool,
    I8 => i8,
    U8 => u8,
    I16 => i16,
    U16 => u16,
    I32 => i32,
    U32 => u32,
    I64 => i64,
    U64 => u64,
    I128 => i128,
    U128 => u128,
    F32 => f32,
    F64 => f64,
    Char => char,
    String => String,
    Ref => ObjectRef,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl FromValue for Record {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Struct(record) => Ok(record),
            other => Err(unexpected("struct", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
