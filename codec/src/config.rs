//! Options and per-call configuration.

use crate::{
    introspect::{FieldIntrospector, Introspect},
    registry::{self, TypeResolver},
    text::TextEncoding,
    TypeDescriptor,
};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Flags controlling a single serialize or deserialize call.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Options: u32 {
        /// Encode eligible value types and primitive arrays as raw fixed-layout blocks.
        const COMPACT_VALUE_TYPES = 1 << 0;
        /// Treat stream-supplied lengths and type names as untrusted.
        const SAFE_MODE = 1 << 1;
        /// Encode unsupported collections and comparers anyway (decoding may be lossy).
        const FORCE_RECURSIVE_FALLBACK = 1 << 2;
        /// Skip stream members that the decoding type no longer declares.
        const IGNORE_MISSING_MEMBERS = 1 << 3;
        /// Use structural encoding even for types with a custom serializer.
        const IGNORE_CUSTOM_SERIALIZERS = 1 << 4;
        /// Do not invoke lifecycle callbacks.
        const IGNORE_LIFECYCLE_CALLBACKS = 1 << 5;
        /// Do not invoke substitution hooks after decoding.
        const IGNORE_SUBSTITUTION = 1 << 6;
    }
}

impl Options {
    /// Default options for serialization.
    pub const SERIALIZE: Options = Options::COMPACT_VALUE_TYPES;

    /// Default options for deserialization.
    pub const DESERIALIZE: Options = Options::SAFE_MODE;
}

impl Default for Options {
    fn default() -> Self {
        Options::SERIALIZE | Options::DESERIALIZE
    }
}

/// Default bound on the nesting depth of a graph (and of a type tree walk).
///
/// Encoding and decoding recurse once per level of nesting, and each level costs a few
/// native stack frames. The default fits a 2 MiB thread stack in unoptimized builds;
/// raising it requires running the [crate::Serializer] on a thread with a larger stack.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Configuration of a [crate::Serializer].
#[derive(Clone)]
pub struct Config {
    /// Active option flags.
    pub options: Options,

    /// Encoding of string payloads.
    pub encoding: TextEncoding,

    /// Types the stream is allowed to name (required in safe mode).
    pub expected_types: Vec<Arc<TypeDescriptor>>,

    /// Maximum nesting depth before a call fails.
    pub max_depth: usize,

    /// Resolves type names outside of safe mode.
    pub resolver: Arc<dyn TypeResolver>,

    /// Supplies the members of record types.
    pub introspector: Arc<dyn Introspect>,
}

impl Config {
    /// Creates a configuration with the given options and defaults for everything else.
    pub fn new(options: Options) -> Self {
        Self {
            options,
            encoding: TextEncoding::default(),
            expected_types: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            resolver: registry::global(),
            introspector: Arc::new(FieldIntrospector),
        }
    }

    /// Returns true if `flag` is set.
    pub fn has(&self, flag: Options) -> bool {
        self.options.contains(flag)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("options", &self.options)
            .field("encoding", &self.encoding)
            .field(
                "expected_types",
                &self
                    .expected_types
                    .iter()
                    .map(|ty| ty.name())
                    .collect::<Vec<_>>(),
            )
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}
