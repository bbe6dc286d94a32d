//! Serialize arbitrary object graphs.
//!
//! # Overview
//!
//! A binary serialization engine designed to efficiently and safely:
//! - Serialize object graphs (shared nodes and cycles included) into a self-describing
//!   binary stream
//! - Deserialize untrusted binary input back into an equivalent graph
//!
//! Every inline value in the stream is preceded by a compact type description, so a
//! stream can be decoded without knowing the shape of the root in advance. An object
//! reached more than once is written once and referred to by ordinal afterwards.
//!
//! # Supported Shapes
//!
//! - Primitives: `bool`, `i8`..`i128`, `u8`..`u128`, `f32`, `f64`, `char` and strings
//! - Records described by a [TypeDescriptor]: reference types (with identity) and value
//!   types (copied, eligible for a raw fixed layout under [Options::COMPACT_VALUE_TYPES])
//! - Arrays of any rank and lower bounds, lists, deques, sets, maps (plain and sorted),
//!   optionals, pairs, read-only lists and user-defined collections
//!
//! Types can customize their encoding with a [CustomSerializer], lifecycle callbacks and a
//! substitution hook (see [TypeBuilder]).
//!
//! # Safe Mode
//!
//! [Options::SAFE_MODE] (on by default for deserialization) checks every stream-supplied
//! length against the bytes actually available before allocating, ignores capacity hints
//! and only resolves type names listed among the expected types (or mentioned by their
//! declarations).
//!
//! # Example
//!
//! ```
//! use graph_codec::{DataType, Options, Record, Serializer, TypeDescriptor, Value};
//!
//! // Describe a node that may point at any object
//! let node = TypeDescriptor::reference("example.Node")
//!     .member("label", DataType::STRING)
//!     .member("next", DataType::OBJECT)
//!     .build();
//!
//! // Build a node that points at itself
//! let root = Value::object(Record::new(node.clone()).with("label", "loop"));
//! if let Some(object) = root.as_object() {
//!     if let Some(record) = object.borrow_mut().as_record_mut() {
//!         record.set("next", object.clone());
//!     }
//! }
//!
//! // Serialize, then deserialize in safe mode
//! let bytes = Serializer::new(Options::SERIALIZE).serialize(&root)?;
//! let decoded = Serializer::new(Options::DESERIALIZE)
//!     .with_expected_types([node])
//!     .deserialize(&bytes, 0)?;
//! assert!(decoded.graph_eq(&root));
//! # Ok::<(), graph_codec::Error>(())
//! ```

pub mod collections;
pub mod config;
mod decoder;
pub mod descriptor;
mod encoder;
pub mod error;
pub mod fastpath;
mod guard;
pub mod hooks;
pub mod introspect;
mod primitives;
mod refs;
pub mod registry;
pub mod serializer;
pub mod text;
pub mod types;
pub mod util;
pub mod value;
pub mod varint;

// Re-export main types and traits
pub use config::{Config, Options, DEFAULT_MAX_DEPTH};
pub use descriptor::{
    Capabilities, Initializer, Member, MemberInfo, TypeBuilder, TypeDescriptor, TypeKind,
};
pub use encoder::FORMAT_VERSION;
pub use error::{BoxError, Error, ErrorKind};
pub use fastpath::{
    deserialize_value_array, deserialize_value_type, layout_size, serialize_value_array,
    serialize_value_type, try_deserialize_value_type,
};
pub use hooks::{Callback, CustomSerializer, SerializationInfo, Substitute};
pub use introspect::{FieldIntrospector, Introspect};
pub use registry::{TypeRegistry, TypeResolver};
pub use serializer::{
    deserialize, deserialize_as, deserialize_from_stream, serialize, serialize_to_stream,
    Serializer,
};
pub use text::{BinaryReader, BinaryWriter, TextEncoding};
pub use types::{CollectionKind, CollectionType, DataType, ElementaryKind, TypeCode};
pub use value::{
    Array, Collection, Comparer, CustomComparer, FromValue, Items, Object, ObjectRef, Record,
    Value, MAX_RANK,
};
