//! Public entry points.
//!
//! Every call opens its own reference table and name table, so a [Serializer] can be
//! shared freely and independent calls never observe each other. Streams, writers and
//! readers stay owned by the caller: they are flushed (or repositioned) but never closed.

use crate::{
    decoder::decode,
    encoder::encode,
    introspect::Introspect,
    registry::TypeResolver,
    text::{BinaryReader, BinaryWriter, TextEncoding},
    Config, Error, FromValue, Options, TypeDescriptor, Value,
};
use bytes::Bytes;
use std::{
    io::{Read, Seek, SeekFrom, Write},
    sync::Arc,
};
use tracing::trace;

/// A configured serialization session factory.
#[derive(Clone, Debug, Default)]
pub struct Serializer {
    config: Config,
}

impl Serializer {
    /// Creates a serializer with the given options and default configuration otherwise.
    pub fn new(options: Options) -> Self {
        Self::with_config(Config::new(options))
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.config.options = options;
        self
    }

    /// Sets the types a stream may name (required in safe mode for named types).
    pub fn with_expected_types(
        mut self,
        types: impl IntoIterator<Item = Arc<TypeDescriptor>>,
    ) -> Self {
        self.config.expected_types = types.into_iter().collect();
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn TypeResolver>) -> Self {
        self.config.resolver = resolver;
        self
    }

    pub fn with_introspector(mut self, introspector: Arc<dyn Introspect>) -> Self {
        self.config.introspector = introspector;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Encodes the graph rooted at `value`.
    pub fn serialize(&self, value: &Value) -> Result<Bytes, Error> {
        serialize_with(value, &self.config)
    }

    /// Decodes the graph stored at `offset` in `data`. Bytes after it are ignored.
    pub fn deserialize(&self, data: &[u8], offset: usize) -> Result<Value, Error> {
        let data = data.get(offset..).ok_or(Error::InvalidOffset {
            offset,
            len: data.len(),
        })?;
        Ok(deserialize_with(data, &self.config)?.0)
    }

    /// Decodes the graph stored at `offset` in `data` and converts its root.
    pub fn deserialize_as<T: FromValue>(&self, data: &[u8], offset: usize) -> Result<T, Error> {
        T::from_value(self.deserialize(data, offset)?)
    }

    /// Writes the encoded graph to `stream` and flushes it.
    pub fn serialize_to_stream<W: Write>(
        &self,
        value: &Value,
        stream: &mut W,
    ) -> Result<(), Error> {
        let bytes = self.serialize(value)?;
        stream.write_all(&bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Decodes a graph starting at the current position of `stream`.
    ///
    /// On success the stream is left positioned right after the consumed bytes.
    pub fn deserialize_from_stream<R: Read + Seek>(&self, stream: &mut R) -> Result<Value, Error> {
        read_stream(stream, &self.config)
    }

    /// Writes the encoded graph through `writer`, using the writer's text encoding.
    pub fn serialize_to_writer<W: Write>(
        &self,
        value: &Value,
        writer: &mut BinaryWriter<W>,
    ) -> Result<(), Error> {
        let config = Config {
            encoding: writer.encoding(),
            ..self.config.clone()
        };
        let bytes = serialize_with(value, &config)?;
        writer.write_bytes(&bytes)?;
        writer.flush()
    }

    /// Decodes a graph through `reader`, using the reader's text encoding.
    pub fn deserialize_from_reader<R: Read + Seek>(
        &self,
        reader: &mut BinaryReader<R>,
    ) -> Result<Value, Error> {
        let config = Config {
            encoding: reader.encoding(),
            ..self.config.clone()
        };
        read_stream(reader.get_mut(), &config)
    }
}

fn serialize_with(value: &Value, config: &Config) -> Result<Bytes, Error> {
    trace!(options = ?config.options, "serializing graph");
    let (bytes, objects) = encode(value, config)?;
    trace!(bytes = bytes.len(), objects, "serialized graph");
    Ok(bytes)
}

fn deserialize_with(data: &[u8], config: &Config) -> Result<(Value, usize), Error> {
    trace!(options = ?config.options, available = data.len(), "deserializing graph");
    let decoded = decode(data, config)?;
    trace!(
        bytes = decoded.consumed,
        objects = decoded.objects,
        "deserialized graph"
    );
    Ok((decoded.value, decoded.consumed))
}

fn read_stream<R: Read + Seek>(stream: &mut R, config: &Config) -> Result<Value, Error> {
    let start = stream.stream_position()?;
    let mut data = Vec::new();
    stream.read_to_end(&mut data)?;
    let (value, consumed) = deserialize_with(&data, config)?;
    stream.seek(SeekFrom::Start(start + consumed as u64))?;
    Ok(value)
}

/// Encodes `value` under `options`.
pub fn serialize(value: &Value, options: Options) -> Result<Bytes, Error> {
    Serializer::new(options).serialize(value)
}

/// Decodes the graph stored at `offset` in `data`.
///
/// `expected_types` lists the types the stream may name (required in safe mode when the
/// stream names any type).
pub fn deserialize(
    data: &[u8],
    offset: usize,
    options: Options,
    expected_types: &[Arc<TypeDescriptor>],
) -> Result<Value, Error> {
    Serializer::new(options)
        .with_expected_types(expected_types.iter().cloned())
        .deserialize(data, offset)
}

/// Decodes the graph stored at `offset` in `data` and converts its root.
pub fn deserialize_as<T: FromValue>(
    data: &[u8],
    offset: usize,
    options: Options,
    expected_types: &[Arc<TypeDescriptor>],
) -> Result<T, Error> {
    T::from_value(deserialize(data, offset, options, expected_types)?)
}

/// Writes the encoded graph to `stream` and flushes it.
pub fn serialize_to_stream<W: Write>(
    value: &Value,
    stream: &mut W,
    options: Options,
) -> Result<(), Error> {
    Serializer::new(options).serialize_to_stream(value, stream)
}

/// Decodes a graph starting at the current position of `stream`.
pub fn deserialize_from_stream<R: Read + Seek>(
    stream: &mut R,
    options: Options,
    expected_types: &[Arc<TypeDescriptor>],
) -> Result<Value, Error> {
    Serializer::new(options)
        .with_expected_types(expected_types.iter().cloned())
        .deserialize_from_stream(stream)
}
