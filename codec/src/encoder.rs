//! Graph to stream.

use crate::{
    collections::{self, has_capacity_hint},
    fastpath::{layout_size, write_block, write_raw},
    hooks::{self, Stage},
    primitives::write_fixed,
    refs::{EncodeTable, Registration},
    types::{CollectionKind, DataType, ElementaryKind},
    util::write_name,
    varint, Array, Collection, Config, Error, Items, ObjectRef, Options, Record, SerializationInfo,
    TypeDescriptor, Value,
};
use bytes::{BufMut, Bytes, BytesMut};
use std::{collections::HashMap, sync::Arc};

/// Version byte at the start of every stream.
pub const FORMAT_VERSION: u8 = 1;

pub(crate) const TAG_NULL: u64 = 0;
pub(crate) const TAG_INLINE: u64 = 1;
/// Back-reference tags are the ordinal plus this offset.
pub(crate) const TAG_REFERENCE: u64 = 2;

pub(crate) const LAYOUT_STRUCTURAL: u8 = 0;
pub(crate) const LAYOUT_RAW: u8 = 1;
pub(crate) const LAYOUT_CUSTOM: u8 = 2;

pub(crate) const ARRAY_PER_ELEMENT: u8 = 0;
pub(crate) const ARRAY_BLOCK: u8 = 1;

/// Encodes `value` under `config`. Returns the stream and the number of objects written.
pub(crate) fn encode(value: &Value, config: &Config) -> Result<(Bytes, usize), Error> {
    let mut encoder = Encoder {
        config,
        buf: BytesMut::new(),
        refs: EncodeTable::default(),
        names: HashMap::new(),
        depth: 0,
    };
    encoder.buf.put_u8(FORMAT_VERSION);
    encoder.write_polymorphic(value)?;
    let objects = encoder.refs.len();
    Ok((encoder.buf.freeze(), objects))
}

struct Encoder<'a> {
    config: &'a Config,
    buf: BytesMut,
    refs: EncodeTable,
    names: HashMap<String, u64>,
    depth: usize,
}

impl Encoder<'_> {
    fn options(&self) -> Options {
        self.config.options
    }

    fn enter(&mut self) -> Result<(), Error> {
        if self.depth >= self.config.max_depth {
            return Err(Error::DepthExceeded(self.config.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Writes a slot whose type is only known at runtime.
    fn write_polymorphic(&mut self, value: &Value) -> Result<(), Error> {
        let ty = match value {
            Value::Null => {
                varint::write(TAG_NULL, &mut self.buf);
                return Ok(());
            }
            Value::Ref(object) => {
                if let Registration::Existing(ordinal) = self.refs.register(object) {
                    varint::write(ordinal + TAG_REFERENCE, &mut self.buf);
                    return Ok(());
                }
                object.borrow().data_type()
            }
            other => match other.data_type() {
                Some(ty) => ty,
                None => return Err(mismatch(&DataType::OBJECT, other)),
            },
        };
        varint::write(TAG_INLINE, &mut self.buf);
        self.write_type(&ty);
        self.write_inline(value, &ty)
    }

    /// Writes a slot of a known type.
    fn write_typed(&mut self, value: &Value, ty: &DataType) -> Result<(), Error> {
        match ty {
            DataType::Elementary(ElementaryKind::Object) => self.write_polymorphic(value),
            ty if ty.has_identity() => {
                let object = match value {
                    Value::Null => {
                        varint::write(TAG_NULL, &mut self.buf);
                        return Ok(());
                    }
                    Value::Ref(object) if object.borrow().data_type() == *ty => object,
                    other => return Err(mismatch(ty, other)),
                };
                match self.refs.register(object) {
                    Registration::Existing(ordinal) => {
                        varint::write(ordinal + TAG_REFERENCE, &mut self.buf);
                        Ok(())
                    }
                    Registration::New(_) => {
                        varint::write(TAG_INLINE, &mut self.buf);
                        self.write_inline(value, ty)
                    }
                }
            }
            DataType::Collection(ct) if ct.kind() == CollectionKind::Optional => {
                if value.is_null() {
                    self.buf.put_u8(0);
                    return Ok(());
                }
                self.write_inline(value, ty)
            }
            ty => self.write_inline(value, ty),
        }
    }

    /// Writes the payload of a non-null `value` of runtime or declared type `ty`.
    fn write_inline(&mut self, value: &Value, ty: &DataType) -> Result<(), Error> {
        self.enter()?;
        let result = self.write_payload(value, ty);
        self.leave();
        result
    }

    fn write_payload(&mut self, value: &Value, ty: &DataType) -> Result<(), Error> {
        match (ty, value) {
            (DataType::Elementary(ElementaryKind::String), Value::String(s)) => {
                self.config.encoding.encode(s, &mut self.buf);
                Ok(())
            }
            (DataType::Elementary(kind), value) if kind.fixed_size().is_some() => {
                write_fixed(*kind, value, &mut self.buf)
            }
            (DataType::Named(named), Value::Struct(record))
                if named.is_value_type() && record.ty().name() == named.name() =>
            {
                self.write_struct(record)
            }
            (DataType::Named(named), Value::Ref(object)) if !named.is_value_type() => {
                self.write_record_object(object)
            }
            (DataType::Collection(ct), value) => match (ct.kind(), value) {
                (CollectionKind::Optional, value) => {
                    self.buf.put_u8(1);
                    let inner = first_arg(ty)?;
                    self.write_typed(value, inner)
                }
                (CollectionKind::Pair, Value::Pair(pair)) => {
                    let (key, val) = (&ct.args()[0], &ct.args()[1]);
                    self.write_typed(&pair.0, key)?;
                    self.write_typed(&pair.1, val)
                }
                (CollectionKind::Array, Value::Ref(object)) => {
                    let object = object.borrow();
                    match object.as_array() {
                        Some(array) => self.write_array(array),
                        None => Err(mismatch(ty, value)),
                    }
                }
                (_, Value::Ref(object)) if ct.kind().has_identity() => {
                    let object = object.borrow();
                    match object.as_collection() {
                        Some(collection) => self.write_collection(collection),
                        None => Err(mismatch(ty, value)),
                    }
                }
                _ => Err(mismatch(ty, value)),
            },
            (ty, value) => Err(mismatch(ty, value)),
        }
    }

    /// Writes a type descriptor: the type codes, then one name entry per named type.
    fn write_type(&mut self, ty: &DataType) {
        let mut codes = Vec::new();
        let mut named = Vec::new();
        ty.to_codes(&mut codes, &mut named);
        for code in codes {
            self.buf.put_u16(code.to_u16());
        }
        for descriptor in named {
            if !self.names.contains_key(descriptor.name()) {
                self.config.resolver.register(descriptor.clone());
            }
            self.write_name_entry(descriptor.name());
        }
    }

    fn write_name_entry(&mut self, name: &str) {
        if let Some(index) = self.names.get(name) {
            varint::write(*index, &mut self.buf);
            return;
        }
        let index = self.names.len() as u64 + 1;
        self.names.insert(name.to_string(), index);
        varint::write(0, &mut self.buf);
        write_name(name, &mut self.buf);
    }

    fn write_struct(&mut self, record: &Record) -> Result<(), Error> {
        let mut record = record.clone();
        hooks::run(Stage::Serializing, &mut record, self.options())?;
        self.write_record(&record)?;
        hooks::run(Stage::Serialized, &mut record, self.options())
    }

    fn write_record_object(&mut self, object: &ObjectRef) -> Result<(), Error> {
        hooks::run_on(Stage::Serializing, object, self.options())?;
        // Written from a copy, so nested hooks may borrow this object.
        let record = object.borrow().as_record().cloned();
        let Some(record) = record else {
            return Err(Error::UnexpectedType {
                expected: "record".into(),
                found: object.borrow().data_type().to_string(),
            });
        };
        self.write_record(&record)?;
        hooks::run_on(Stage::Serialized, object, self.options())
    }

    /// Writes the layout byte and the members of `record`.
    fn write_record(&mut self, record: &Record) -> Result<(), Error> {
        let ty = record.ty();
        if let Some(serializer) = hooks::custom_serializer(ty, self.options()) {
            let mut info = SerializationInfo::new();
            serializer.pack(record, &mut info).map_err(Error::Hook)?;
            self.buf.put_u8(LAYOUT_CUSTOM);
            varint::write(info.len() as u64, &mut self.buf);
            for (name, value) in info.iter() {
                self.write_name_entry(name);
                self.write_polymorphic(value)?;
            }
            return Ok(());
        }

        if self.config.has(Options::COMPACT_VALUE_TYPES) && layout_size(ty).is_some() {
            self.buf.put_u8(LAYOUT_RAW);
            return write_raw(record, &mut self.buf);
        }

        self.write_members(ty, record)
    }

    fn write_members(&mut self, ty: &Arc<TypeDescriptor>, record: &Record) -> Result<(), Error> {
        let members = self.config.introspector.members(ty);
        self.buf.put_u8(LAYOUT_STRUCTURAL);
        varint::write(members.len() as u64, &mut self.buf);
        for member in &members {
            self.write_name_entry(member.name());
            self.write_polymorphic(member.get(record))?;
        }
        Ok(())
    }

    fn write_array(&mut self, array: &Array) -> Result<(), Error> {
        self.buf.put_u8(array.rank() as u8);
        for len in array.lengths() {
            varint::write(*len as u64, &mut self.buf);
        }
        if array.lower_bounds().iter().all(|bound| *bound == 0) {
            self.buf.put_u8(0);
        } else {
            self.buf.put_u8(1);
            for bound in array.lower_bounds() {
                varint::write_signed(*bound, &mut self.buf);
            }
        }

        match array.element() {
            DataType::Elementary(kind) if kind.fixed_size().is_some() => {
                if self.config.has(Options::COMPACT_VALUE_TYPES) {
                    self.buf.put_u8(ARRAY_BLOCK);
                    return write_block(*kind, array.items(), &mut self.buf);
                }
                self.buf.put_u8(ARRAY_PER_ELEMENT);
                for item in array.items() {
                    write_fixed(*kind, item, &mut self.buf)?;
                }
                Ok(())
            }
            element => {
                for item in array.items() {
                    self.write_typed(item, element)?;
                }
                Ok(())
            }
        }
    }

    fn write_collection(&mut self, collection: &Collection) -> Result<(), Error> {
        let descriptor = collections::describe(collection, self.options())?;
        if let Some(comparer) = descriptor.comparer {
            self.buf.put_u8(comparer);
        }
        if has_capacity_hint(descriptor.shape) {
            varint::write(collection.len() as u64, &mut self.buf);
        }
        varint::write(collection.len() as u64, &mut self.buf);

        let element = descriptor.element.first().ok_or_else(|| missing_arg(collection))?;
        match collection.items() {
            Items::Sequence(items) => {
                for item in items {
                    self.write_typed(item, element)?;
                }
            }
            Items::Entries(entries) => {
                let value_type = descriptor.element.get(1).ok_or_else(|| missing_arg(collection))?;
                for (key, value) in entries {
                    self.write_typed(key, element)?;
                    self.write_typed(value, value_type)?;
                }
            }
        }
        Ok(())
    }
}

fn missing_arg(collection: &Collection) -> Error {
    Error::InvalidData(
        "collection",
        format!("{} lacks an element type", collection.data_type()),
    )
}

fn first_arg(ty: &DataType) -> Result<&DataType, Error> {
    match ty {
        DataType::Collection(ct) => ct.args().first(),
        _ => None,
    }
    .ok_or_else(|| Error::InvalidData("type", format!("{ty} has no element type")))
}

fn mismatch(expected: &DataType, found: &Value) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        found: found.type_name(),
    }
}
