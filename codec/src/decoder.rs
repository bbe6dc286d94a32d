//! Stream to graph.

use crate::{
    collections::{has_capacity_hint, Builder},
    encoder::{
        ARRAY_BLOCK, ARRAY_PER_ELEMENT, FORMAT_VERSION, LAYOUT_CUSTOM, LAYOUT_RAW,
        LAYOUT_STRUCTURAL, TAG_INLINE, TAG_NULL, TAG_REFERENCE,
    },
    fastpath::{read_block, read_raw},
    guard::{min_size, Guard},
    hooks::{self, Stage, Unpacked},
    primitives::read_fixed,
    refs::DecodeTable,
    types::{read_tree, CollectionKind, CollectionType, DataType, ElementaryKind},
    util::{at_least, read_name},
    varint, Array, Comparer, Config, Error, ObjectRef, Options, Record, SerializationInfo,
    TypeDescriptor, Value, MAX_RANK,
};
use bytes::Buf;
use std::sync::Arc;
use tracing::debug;

/// Result of decoding one stream.
pub(crate) struct Decoded {
    pub value: Value,
    /// Bytes consumed from the input, version byte included.
    pub consumed: usize,
    pub objects: usize,
}

/// Decodes the stream at the start of `data` under `config`.
///
/// Bytes following the root value are left unread.
pub(crate) fn decode(data: &[u8], config: &Config) -> Result<Decoded, Error> {
    let mut decoder = Decoder {
        config,
        buf: data,
        guard: Guard::new(config),
        refs: DecodeTable::default(),
        names: Vec::new(),
        depth: 0,
    };
    at_least(&decoder.buf, 1)?;
    let version = decoder.buf.get_u8();
    if version != FORMAT_VERSION {
        return Err(Error::InvalidData(
            "stream",
            format!("unsupported format version {version}"),
        ));
    }
    let root = decoder.read_polymorphic(None)?;
    let consumed = data.len() - decoder.buf.remaining();
    let objects = decoder.refs.len();
    let value = decoder.refs.finish(root)?;
    Ok(Decoded {
        value,
        consumed,
        objects,
    })
}

/// Decoded content of a record payload, before it is applied to an instance.
enum Members {
    Raw(Record),
    Named(Vec<(String, Value)>),
    Custom(SerializationInfo),
}

struct Decoder<'a> {
    config: &'a Config,
    buf: &'a [u8],
    guard: Guard<'a>,
    refs: DecodeTable,
    names: Vec<String>,
    depth: usize,
}

impl Decoder<'_> {
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

    fn read_u8(&mut self) -> Result<u8, Error> {
        at_least(&self.buf, 1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads a declared count and checks it against the remaining input.
    fn read_count(&mut self, unit: usize) -> Result<usize, Error> {
        let declared = varint::read(&mut self.buf)?;
        self.guard.check_length(declared, unit, self.buf.remaining())
    }

    /// Reads a slot whose type is only known at runtime.
    ///
    /// `existing` is the value the destination already holds, if any.
    fn read_polymorphic(&mut self, existing: Option<&Value>) -> Result<Value, Error> {
        match varint::read(&mut self.buf)? {
            TAG_NULL => Ok(Value::Null),
            TAG_INLINE => {
                let ty = self.read_type()?;
                if ty == DataType::OBJECT {
                    return Err(Error::InvalidData(
                        "type",
                        "object is not a runtime type".into(),
                    ));
                }
                self.read_inline(&ty, existing)
            }
            tag => self.refs.resolve(tag - TAG_REFERENCE),
        }
    }

    /// Reads a slot of a known type.
    fn read_typed(&mut self, ty: &DataType, existing: Option<&Value>) -> Result<Value, Error> {
        match ty {
            DataType::Elementary(ElementaryKind::Object) => self.read_polymorphic(existing),
            ty if ty.has_identity() => match varint::read(&mut self.buf)? {
                TAG_NULL => Ok(Value::Null),
                TAG_INLINE => self.read_inline(ty, existing),
                tag => self.refs.resolve(tag - TAG_REFERENCE),
            },
            ty => self.read_inline(ty, existing),
        }
    }

    fn read_inline(&mut self, ty: &DataType, existing: Option<&Value>) -> Result<Value, Error> {
        self.enter()?;
        let result = self.read_payload(ty, existing);
        self.leave();
        result
    }

    fn read_payload(&mut self, ty: &DataType, existing: Option<&Value>) -> Result<Value, Error> {
        match ty {
            DataType::Elementary(ElementaryKind::String) => {
                Ok(Value::String(self.config.encoding.decode(&mut self.buf)?))
            }
            DataType::Elementary(kind) if kind.fixed_size().is_some() => {
                read_fixed(*kind, &mut self.buf)
            }
            DataType::Elementary(kind) => Err(Error::InvalidData(
                "type",
                format!("{} has no payload", kind.name()),
            )),
            DataType::Named(named) if named.is_value_type() => self.read_struct(named),
            DataType::Named(named) => self.read_record_object(named),
            DataType::Collection(ct) => match ct.kind() {
                CollectionKind::Optional => match self.read_u8()? {
                    0 => Ok(Value::Null),
                    1 => self.read_typed(arg(ct, 0)?, None),
                    other => Err(Error::InvalidData("optional", format!("presence {other}"))),
                },
                CollectionKind::Pair => {
                    let key = self.read_typed(arg(ct, 0)?, None)?;
                    let value = self.read_typed(arg(ct, 1)?, None)?;
                    Ok(Value::pair(key, value))
                }
                CollectionKind::Array => self.read_array(ct),
                _ => self.read_collection(ct, existing),
            },
        }
    }

    /// Reads a type descriptor.
    fn read_type(&mut self) -> Result<DataType, Error> {
        let mut walker = read_tree(&mut self.buf)?;
        let count: usize = walker.codes().iter().map(|code| code.name_count()).sum();
        let mut named = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_name_entry()?;
            named.push(self.guard.resolve(&name)?);
        }
        DataType::from_walker(&mut walker, &mut named.into_iter())
    }

    fn read_name_entry(&mut self) -> Result<String, Error> {
        match varint::read(&mut self.buf)? {
            0 => {
                let name = read_name(&mut self.buf)?;
                self.names.push(name.clone());
                Ok(name)
            }
            index => usize::try_from(index - 1)
                .ok()
                .and_then(|index| self.names.get(index))
                .cloned()
                .ok_or_else(|| Error::InvalidData("name", "unknown name index".into())),
        }
    }

    fn read_struct(&mut self, ty: &Arc<TypeDescriptor>) -> Result<Value, Error> {
        let mut record = Record::new(ty.clone());
        hooks::run(Stage::Deserializing, &mut record, self.options())?;
        let initial = record.fields().to_vec();
        let members = self.read_members(ty, &initial)?;
        self.apply(&mut record, members)?;
        hooks::run(Stage::Deserialized, &mut record, self.options())?;
        Ok(Value::Struct(record))
    }

    fn read_record_object(&mut self, ty: &Arc<TypeDescriptor>) -> Result<Value, Error> {
        let object = ObjectRef::new(Record::new(ty.clone()));
        let ordinal = self.refs.register(Value::Ref(object.clone()));
        hooks::run_on(Stage::Deserializing, &object, self.options())?;

        let initial = match object.borrow().as_record() {
            Some(record) => record.fields().to_vec(),
            None => Vec::new(),
        };
        let members = self.read_members(ty, &initial)?;
        self.apply(&object, members)?;
        hooks::run_on(Stage::Deserialized, &object, self.options())?;

        match hooks::finish_unpack(object, self.options()) {
            Unpacked::Value(value) => Ok(value),
            Unpacked::Substitute {
                placeholder,
                factory,
            } => {
                let replacement = factory(&placeholder).map_err(Error::Hook)?;
                self.refs
                    .substitute(ordinal, placeholder, replacement.clone());
                Ok(replacement)
            }
        }
    }

    /// Reads a record payload. `initial` holds the field values of the fresh instance.
    fn read_members(
        &mut self,
        ty: &Arc<TypeDescriptor>,
        initial: &[Value],
    ) -> Result<Members, Error> {
        match self.read_u8()? {
            LAYOUT_STRUCTURAL => {
                let count = self.read_count(2)?;
                let members = self.config.introspector.members(ty);
                let mut values = self.guard.allocate(count)?;
                for _ in 0..count {
                    let name = self.read_name_entry()?;
                    let existing = members
                        .iter()
                        .find(|member| member.name() == name)
                        .and_then(|member| initial.get(member.slot()));
                    let value = self.read_polymorphic(existing)?;
                    values.push((name, value));
                }
                Ok(Members::Named(values))
            }
            LAYOUT_RAW => Ok(Members::Raw(read_raw(ty, &mut self.buf)?)),
            LAYOUT_CUSTOM => {
                let count = self.read_count(2)?;
                let mut info = SerializationInfo::new();
                for _ in 0..count {
                    let name = self.read_name_entry()?;
                    let value = self.read_polymorphic(None)?;
                    info.add(name, value);
                }
                Ok(Members::Custom(info))
            }
            other => Err(Error::InvalidData(
                "record layout",
                format!("unknown layout {other}"),
            )),
        }
    }

    /// Stores decoded members into the record held by `object`.
    fn apply(&self, object: &ObjectRef, members: Members) -> Result<(), Error> {
        let named = match members {
            Members::Raw(raw) => {
                if let Some(record) = object.borrow_mut().as_record_mut() {
                    for member in raw.ty().all_members() {
                        if !member.is_transient() {
                            member.set(record, member.get(&raw).clone());
                        }
                    }
                }
                return Ok(());
            }
            Members::Custom(info) => {
                let ty = object.borrow().as_record().map(|record| record.ty().clone());
                match ty.and_then(|ty| hooks::custom_serializer(&ty, self.options())) {
                    Some(serializer) => {
                        let unpacked =
                            hooks::with_detached(object, |record| serializer.unpack(record, info));
                        return unpacked.unwrap_or(Ok(())).map_err(Error::Hook);
                    }
                    None => info.into_iter().collect(),
                }
            }
            Members::Named(values) => values,
        };

        let mut object = object.borrow_mut();
        let Some(record) = object.as_record_mut() else {
            return Ok(());
        };
        let members = self.config.introspector.members(record.ty());
        for (name, value) in named {
            match members.iter().find(|member| member.name() == name) {
                Some(member) => member.set(record, value),
                None if self.config.has(Options::IGNORE_MISSING_MEMBERS) => {
                    debug!(ty = record.ty().name(), member = %name, "skipping removed member");
                }
                None => {
                    return Err(Error::MissingMember {
                        type_name: record.ty().name().to_string(),
                        member: name,
                    })
                }
            }
        }
        Ok(())
    }

    fn read_array(&mut self, ct: &CollectionType) -> Result<Value, Error> {
        let element = arg(ct, 0)?.clone();
        let rank = usize::from(self.read_u8()?);
        if rank == 0 || rank > MAX_RANK {
            return Err(Error::InvalidData("array", format!("rank {rank}")));
        }

        let mut declared = Vec::with_capacity(rank);
        for _ in 0..rank {
            declared.push(varint::read(&mut self.buf)?);
        }
        let total = declared
            .iter()
            .try_fold(1u64, |total, len| total.checked_mul(*len))
            .unwrap_or(u64::MAX);
        let lower_bounds = match self.read_u8()? {
            0 => vec![0; rank],
            1 => {
                let mut bounds = Vec::with_capacity(rank);
                for _ in 0..rank {
                    bounds.push(varint::read_signed(&mut self.buf)?);
                }
                bounds
            }
            other => return Err(Error::InvalidData("array", format!("bounds flag {other}"))),
        };

        let fixed = match &element {
            DataType::Elementary(kind) => kind.fixed_size().map(|size| (*kind, size)),
            _ => None,
        };
        let (block, count) = match fixed {
            Some((_, size)) => {
                let block = match self.read_u8()? {
                    ARRAY_BLOCK => true,
                    ARRAY_PER_ELEMENT => false,
                    other => return Err(Error::InvalidData("array", format!("mode {other}"))),
                };
                // A block is followed by its checksum.
                let trailer = if block { 4 } else { 0 };
                let available = self.buf.remaining().saturating_sub(trailer);
                (block, self.guard.check_length(total, size, available)?)
            }
            None => {
                let unit = min_size(&element);
                (false, self.guard.check_length(total, unit, self.buf.remaining())?)
            }
        };
        let lengths = declared
            .iter()
            .map(|len| usize::try_from(*len).map_err(|_| Error::Allocation(usize::MAX)))
            .collect::<Result<Vec<_>, _>>()?;

        let object = ObjectRef::new(Array::shaped(element.clone(), lengths, lower_bounds));
        self.refs.register(Value::Ref(object.clone()));

        let items = match fixed {
            Some((kind, _)) if block => read_block(kind, count, &mut self.buf)?,
            Some((kind, _)) => {
                let mut items = self.guard.allocate(count)?;
                for _ in 0..count {
                    items.push(read_fixed(kind, &mut self.buf)?);
                }
                items
            }
            None => {
                let mut items = self.guard.allocate(count)?;
                for _ in 0..count {
                    items.push(self.read_typed(&element, None)?);
                }
                items
            }
        };
        if let Some(array) = object.borrow_mut().as_array_mut() {
            array.set_items(items);
        }
        Ok(Value::Ref(object))
    }

    fn read_collection(
        &mut self,
        ct: &CollectionType,
        existing: Option<&Value>,
    ) -> Result<Value, Error> {
        let comparer = match ct.kind().is_keyed() {
            true => {
                let id = self.read_u8()?;
                Comparer::from_wire(id)
                    .ok_or_else(|| {
                        Error::InvalidData("comparer", format!("unknown comparer {id}"))
                    })?
            }
            false => Comparer::Default,
        };
        let mut builder = Builder::new(ct, comparer, existing, self.options())?;
        self.refs.register(Value::Ref(builder.target().clone()));

        if has_capacity_hint(ct.kind()) {
            let hint = varint::read(&mut self.buf)?;
            builder.reserve(self.guard.capacity_hint(hint));
        }

        let key = arg(ct, 0)?;
        match ct.kind().is_map() {
            true => {
                let value = arg(ct, 1)?;
                let count = self.read_count(min_size(key) + min_size(value))?;
                for _ in 0..count {
                    let k = self.read_typed(key, None)?;
                    let v = self.read_typed(value, None)?;
                    builder.insert(k, v);
                }
            }
            false => {
                let count = self.read_count(min_size(key))?;
                for _ in 0..count {
                    let item = self.read_typed(key, None)?;
                    builder.push(item);
                }
            }
        }
        Ok(Value::Ref(builder.finish()))
    }
}

fn arg(ct: &CollectionType, index: usize) -> Result<&DataType, Error> {
    ct.args()
        .get(index)
        .ok_or_else(|| Error::InvalidData("type", format!("missing element type {index}")))
}
