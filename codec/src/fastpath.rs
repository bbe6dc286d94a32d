//! Raw, fixed-layout copies of reference-free data.
//!
//! A value type whose (non-transient) members are all fixed-size primitives or other such
//! value types has a fixed layout: its members are written back to back with no names,
//! tags or type codes. Arrays of fixed-size primitives are written as one block followed
//! by a CRC32 of the block, which decoding verifies before trusting any element.
//!
//! The `*_value_*` functions at the bottom bypass the engine entirely and copy
//! [bytemuck::Pod] data in native byte order.

use crate::{
    primitives::{read_fixed, write_fixed},
    types::{DataType, ElementaryKind},
    util::at_least,
    Error, MemberInfo, Options, Record, TypeDescriptor, Value,
};
use bytemuck::Pod;
use bytes::{Buf, BufMut};
use std::sync::Arc;
use tracing::debug;

/// Size of the raw layout of `ty`, or `None` if the type has no fixed layout.
///
/// Computed once per descriptor.
pub fn layout_size(ty: &TypeDescriptor) -> Option<usize> {
    *ty.layout.get_or_init(|| {
        if !ty.is_value_type() {
            return None;
        }
        ty.all_members()
            .iter()
            .filter(|member| !member.is_transient())
            .try_fold(0usize, |size, member| {
                let member_size = match member.ty() {
                    DataType::Elementary(kind) => kind.fixed_size()?,
                    DataType::Named(nested) => layout_size(nested)?,
                    DataType::Collection(_) => return None,
                };
                size.checked_add(member_size)
            })
    })
}

fn raw_members(ty: &TypeDescriptor) -> impl Iterator<Item = &MemberInfo> {
    ty.all_members().iter().filter(|member| !member.is_transient())
}

/// Writes the raw layout of `record`. The record's type must have a fixed layout.
pub(crate) fn write_raw(record: &Record, buf: &mut impl BufMut) -> Result<(), Error> {
    for member in raw_members(record.ty()) {
        let value = member.get(record);
        match member.ty() {
            DataType::Elementary(kind) => write_fixed(*kind, value, buf)?,
            DataType::Named(nested) => match value {
                Value::Struct(inner) if inner.ty().name() == nested.name() => {
                    write_raw(inner, buf)?
                }
                other => {
                    return Err(Error::TypeMismatch {
                        expected: nested.name().to_string(),
                        found: other.type_name(),
                    })
                }
            },
            DataType::Collection(_) => {
                return Err(Error::Unsupported {
                    type_name: record.ty().name().to_string(),
                    options: Options::COMPACT_VALUE_TYPES,
                    reason: "raw layout cannot hold a collection",
                })
            }
        }
    }
    Ok(())
}

/// Reads the raw layout of a `ty` instance.
pub(crate) fn read_raw(ty: &Arc<TypeDescriptor>, buf: &mut impl Buf) -> Result<Record, Error> {
    let Some(size) = layout_size(ty) else {
        return Err(no_layout(ty));
    };
    at_least(buf, size)?;
    let mut record = Record::new(ty.clone());
    for member in raw_members(ty) {
        let value = match member.ty() {
            DataType::Elementary(kind) => read_fixed(*kind, buf)?,
            DataType::Named(nested) => Value::Struct(read_raw(nested, buf)?),
            DataType::Collection(_) => return Err(no_layout(ty)),
        };
        member.set(&mut record, value);
    }
    Ok(record)
}

fn no_layout(ty: &TypeDescriptor) -> Error {
    Error::InvalidData(
        "record layout",
        format!("{} has no fixed layout", ty.name()),
    )
}

/// Writes `items` as one block of fixed-size primitives followed by its CRC32.
pub(crate) fn write_block(
    kind: ElementaryKind,
    items: &[Value],
    buf: &mut impl BufMut,
) -> Result<(), Error> {
    let size = kind.fixed_size().unwrap_or_default();
    let mut block = Vec::with_capacity(items.len() * size);
    for item in items {
        write_fixed(kind, item, &mut block)?;
    }
    buf.put_slice(&block);
    buf.put_u32(crc32fast::hash(&block));
    Ok(())
}

/// Reads a block written by [write_block], verifying the checksum before decoding.
pub(crate) fn read_block(
    kind: ElementaryKind,
    count: usize,
    buf: &mut impl Buf,
) -> Result<Vec<Value>, Error> {
    let size = kind.fixed_size().unwrap_or_default();
    let len = count.checked_mul(size).ok_or(Error::Allocation(count))?;
    at_least(buf, len.saturating_add(4))?;
    let block = buf.copy_to_bytes(len);
    let stored = buf.get_u32();
    let computed = crc32fast::hash(&block);
    if stored != computed {
        debug!(stored, computed, len, "primitive block checksum mismatch");
        return Err(Error::ChecksumMismatch { stored, computed });
    }

    let mut reader = &block[..];
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_fixed(kind, &mut reader)?);
    }
    Ok(items)
}

/// Copies the bytes of `value`.
pub fn serialize_value_type<T: Pod>(value: &T) -> Vec<u8> {
    bytemuck::bytes_of(value).to_vec()
}

/// Reads a `T` from the start of `data`, or `None` if `data` is too short.
pub fn try_deserialize_value_type<T: Pod>(data: &[u8]) -> Option<T> {
    let bytes = data.get(..std::mem::size_of::<T>())?;
    Some(bytemuck::pod_read_unaligned(bytes))
}

/// Reads a `T` from the start of `data`.
pub fn deserialize_value_type<T: Pod>(data: &[u8]) -> Result<T, Error> {
    try_deserialize_value_type(data).ok_or(Error::DataTooShort {
        found: data.len(),
        required: std::mem::size_of::<T>(),
    })
}

/// Copies the bytes of `values`.
pub fn serialize_value_array<T: Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

/// Reads `count` consecutive `T`s starting at `offset`.
pub fn deserialize_value_array<T: Pod>(
    data: &[u8],
    offset: usize,
    count: usize,
) -> Result<Vec<T>, Error> {
    if offset > data.len() {
        return Err(Error::InvalidOffset {
            offset,
            len: data.len(),
        });
    }
    let data = &data[offset..];
    let size = std::mem::size_of::<T>();
    let required = count.checked_mul(size).ok_or(Error::DataTooShort {
        found: data.len(),
        required: usize::MAX,
    })?;
    if data.len() < required {
        return Err(Error::DataTooShort {
            found: data.len(),
            required,
        });
    }
    if size == 0 {
        return Ok(vec![T::zeroed(); count]);
    }
    Ok(data[..required]
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}
