//! Type descriptions carried in the stream.
//!
//! Every inline value is preceded by a flattened, pre-order type tree of [TypeCode]s
//! (followed by the names of the user-defined types it mentions). [TypeCodeWalker]
//! walks such a sequence and [DataType] is its tree form.

mod code;
mod data_type;
mod walker;

pub use code::{CollectionKind, ElementaryKind, TypeCode};
pub use data_type::{CollectionType, DataType};
pub use walker::{read_tree, TypeCodeWalker, MAX_TYPE_DEPTH};
