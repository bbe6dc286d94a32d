//! Error types for codec operations

use crate::Options;
use thiserror::Error;

/// Boxed error returned by user-supplied hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broad class of an [Error], used by callers to decide how to react.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller supplied an invalid argument (or, in safe mode, the stream
    /// declared more data than it holds).
    Argument,
    /// The value (or the stream) uses a shape that cannot be represented
    /// under the active options.
    Unsupported,
    /// The stream does not parse.
    Corrupt,
    /// The stream was rejected by the safe mode type policy.
    Security,
    /// A user-supplied hook failed.
    Hook,
    /// The underlying reader or writer failed.
    Io,
}

/// Error type for codec operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("offset {offset} is out of range for {len} bytes")]
    InvalidOffset { offset: usize, len: usize },
    #[error("declared length exceeds the available data")]
    LengthMismatch { declared: u64, available: usize },
    #[error("data is too short: {found} < {required}")]
    DataTooShort { found: usize, required: usize },
    #[error("unexpected type: expected {expected}, found {found}")]
    UnexpectedType { expected: String, found: String },

    #[error("{type_name} is not supported with options {options:?}: {reason}")]
    Unsupported {
        type_name: String,
        options: Options,
        reason: &'static str,
    },
    #[error("collection {type_name} is not supported with options {options:?}: {reason}")]
    UnsupportedCollection {
        type_name: String,
        options: Options,
        reason: &'static str,
    },
    #[error("comparer {comparer} of {type_name} is not supported with options {options:?}")]
    UnsupportedComparer {
        type_name: String,
        comparer: String,
        options: Options,
    },
    #[error("value does not match declared type {expected}: found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("invalid varint")]
    InvalidVarint,
    #[error("invalid type code: {0:#06x}")]
    InvalidTypeCode(u16),
    #[error("type code sequence ended before the type tree was complete")]
    TruncatedTypeCodes,
    #[error("invalid data in {0}: {1}")]
    InvalidData(&'static str, String),
    #[error("back-reference to unknown object #{0}")]
    UnknownReference(u64),
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("cannot resolve type {0}")]
    UnknownType(String),
    #[error("member {member} of {type_name} no longer exists")]
    MissingMember { type_name: String, member: String },
    #[error("nesting depth exceeds {0}")]
    DepthExceeded(usize),
    #[error("substitution chain is circular")]
    CircularSubstitution,
    #[error("cannot allocate {0} elements")]
    Allocation(usize),

    #[error("stream refers to types by name: specify the expected types")]
    ExpectedTypesRequired,
    #[error("stream refers to a type that is not among the expected types")]
    TypeNotAllowed,

    #[error("hook failed: {0}")]
    Hook(#[source] BoxError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidOffset { .. }
            | Error::LengthMismatch { .. }
            | Error::DataTooShort { .. }
            | Error::UnexpectedType { .. } => ErrorKind::Argument,
            Error::Unsupported { .. }
            | Error::UnsupportedCollection { .. }
            | Error::UnsupportedComparer { .. }
            | Error::TypeMismatch { .. } => ErrorKind::Unsupported,
            Error::EndOfBuffer
            | Error::InvalidVarint
            | Error::InvalidTypeCode(_)
            | Error::TruncatedTypeCodes
            | Error::InvalidData(..)
            | Error::UnknownReference(_)
            | Error::ChecksumMismatch { .. }
            | Error::UnknownType(_)
            | Error::MissingMember { .. }
            | Error::DepthExceeded(_)
            | Error::CircularSubstitution
            | Error::Allocation(_) => ErrorKind::Corrupt,
            Error::ExpectedTypesRequired | Error::TypeNotAllowed => ErrorKind::Security,
            Error::Hook(_) => ErrorKind::Hook,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}
