//! Fixed-size primitive payloads.
//!
//! Integers are written big-endian, floats by bit pattern (so signed zeros and NaN
//! payloads survive), `bool` as a single `0`/`1` byte and `char` as its `u32` scalar value.

use crate::{types::ElementaryKind, util::at_least, Error, Value};
use bytes::{Buf, BufMut};
use paste::paste;

fn mismatch(kind: ElementaryKind, value: &Value) -> Error {
    Error::TypeMismatch {
        expected: kind.name().to_string(),
        found: value.type_name(),
    }
}

macro_rules! fixed {
    ($($variant:ident => $type:ident,)*) => {
        paste! {
            /// Writes `value` as a fixed-size primitive of `kind`.
            pub(crate) fn write_fixed(
                kind: ElementaryKind,
                value: &Value,
                buf: &mut impl BufMut,
            ) -> Result<(), Error> {
                match (kind, value) {
                    $((ElementaryKind::$variant, Value::$variant(v)) => buf.[<put_ $type>](*v),)*
                    (ElementaryKind::Bool, Value::Bool(v)) => buf.put_u8(u8::from(*v)),
                    (ElementaryKind::F32, Value::F32(v)) => buf.put_u32(v.to_bits()),
                    (ElementaryKind::F64, Value::F64(v)) => buf.put_u64(v.to_bits()),
                    (ElementaryKind::Char, Value::Char(v)) => buf.put_u32(u32::from(*v)),
                    (kind, value) => return Err(mismatch(kind, value)),
                }
                Ok(())
            }

            /// Reads a fixed-size primitive of `kind`.
            pub(crate) fn read_fixed(
                kind: ElementaryKind,
                buf: &mut impl Buf,
            ) -> Result<Value, Error> {
                at_least(buf, kind.fixed_size().unwrap_or_default())?;
                Ok(match kind {
                    $(ElementaryKind::$variant => Value::$variant(buf.[<get_ $type>]()),)*
                    ElementaryKind::Bool => match buf.get_u8() {
                        0 => Value::Bool(false),
                        1 => Value::Bool(true),
                        other => return Err(Error::InvalidData("bool", format!("{other:#04x}"))),
                    },
                    ElementaryKind::F32 => Value::F32(f32::from_bits(buf.get_u32())),
                    ElementaryKind::F64 => Value::F64(f64::from_bits(buf.get_u64())),
                    ElementaryKind::Char => {
                        let scalar = buf.get_u32();
                        match char::from_u32(scalar) {
                            Some(c) => Value::Char(c),
                            None => return Err(Error::InvalidData("char", format!("{scalar:#x}"))),
                        }
                    }
                    kind => {
                        return Err(Error::InvalidData(
                            "primitive",
                            format!("{} is not fixed-size", kind.name()),
                        ))
                    }
                })
            }
        }
    };
}

fixed! {
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
}
