//! Schema-driven codec for fixed-layout payload records.
//!
//! Every structured payload on the wire is a flat, unpadded sequence of
//! fixed-width integers, doubles and fixed-width byte strings. A [`Schema`]
//! names those fields in wire order; [`Record`] types are generated from
//! a schema description with [`wire_record!`].
//!
//! String fields are NUL-padded on encode and cut at the first NUL on
//! decode. A field with no NUL is taken whole. Strings longer than the
//! field are truncated on a UTF-8 character boundary.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Byte order of a payload family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Wire type of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U32,
    I32,
    U64,
    I64,
    F64,
    /// Fixed-width byte string.
    Str(usize),
}

impl FieldType {
    /// Width of the field on the wire.
    pub const fn width(&self) -> usize {
        match self {
            FieldType::U32 | FieldType::I32 => 4,
            FieldType::U64 | FieldType::I64 | FieldType::F64 => 8,
            FieldType::Str(n) => *n,
        }
    }
}

/// A named field of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

/// Ordered field layout of one payload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub order: ByteOrder,
    pub fields: &'static [Field],
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Schema {
    /// Total wire size of the record.
    pub const fn size(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < self.fields.len() {
            total += self.fields[i].ty.width();
            i += 1;
        }
        total
    }

    /// Encodes values in field order, appending to `buf`.
    pub fn encode(&self, values: &[Value], buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if values.len() != self.fields.len() {
            return Err(ProtocolError::FieldCount {
                record: self.name,
                expected: self.fields.len(),
                actual: values.len(),
            });
        }

        buf.reserve(self.size());
        let little = self.order == ByteOrder::Little;

        for (field, value) in self.fields.iter().zip(values) {
            match (field.ty, value) {
                (FieldType::U32, Value::U32(v)) => {
                    if little {
                        buf.put_u32_le(*v)
                    } else {
                        buf.put_u32(*v)
                    }
                }
                (FieldType::I32, Value::I32(v)) => {
                    if little {
                        buf.put_i32_le(*v)
                    } else {
                        buf.put_i32(*v)
                    }
                }
                (FieldType::U64, Value::U64(v)) => {
                    if little {
                        buf.put_u64_le(*v)
                    } else {
                        buf.put_u64(*v)
                    }
                }
                (FieldType::I64, Value::I64(v)) => {
                    if little {
                        buf.put_i64_le(*v)
                    } else {
                        buf.put_i64(*v)
                    }
                }
                (FieldType::F64, Value::F64(v)) => {
                    if little {
                        buf.put_f64_le(*v)
                    } else {
                        buf.put_f64(*v)
                    }
                }
                (FieldType::Str(width), Value::Str(s)) => put_fixed_str(buf, s, width),
                _ => {
                    return Err(ProtocolError::FieldType {
                        record: self.name,
                        field: field.name,
                    })
                }
            }
        }

        Ok(())
    }

    /// Decodes exactly one record's bytes into values in field order.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<Value>, ProtocolError> {
        let expected = self.size();
        if bytes.len() != expected {
            return Err(ProtocolError::SizeMismatch {
                record: self.name,
                expected,
                actual: bytes.len(),
            });
        }

        let little = self.order == ByteOrder::Little;
        let mut values = Vec::with_capacity(self.fields.len());
        let mut offset = 0;

        for field in self.fields {
            let width = field.ty.width();
            let raw = &bytes[offset..offset + width];
            offset += width;

            let value = match field.ty {
                FieldType::U32 => {
                    let b = word4(raw);
                    Value::U32(if little {
                        u32::from_le_bytes(b)
                    } else {
                        u32::from_be_bytes(b)
                    })
                }
                FieldType::I32 => {
                    let b = word4(raw);
                    Value::I32(if little {
                        i32::from_le_bytes(b)
                    } else {
                        i32::from_be_bytes(b)
                    })
                }
                FieldType::U64 => {
                    let b = word8(raw);
                    Value::U64(if little {
                        u64::from_le_bytes(b)
                    } else {
                        u64::from_be_bytes(b)
                    })
                }
                FieldType::I64 => {
                    let b = word8(raw);
                    Value::I64(if little {
                        i64::from_le_bytes(b)
                    } else {
                        i64::from_be_bytes(b)
                    })
                }
                FieldType::F64 => {
                    let b = word8(raw);
                    Value::F64(if little {
                        f64::from_le_bytes(b)
                    } else {
                        f64::from_be_bytes(b)
                    })
                }
                FieldType::Str(_) => Value::Str(fixed_str(raw)),
            };
            values.push(value);
        }

        Ok(values)
    }
}

fn word4(raw: &[u8]) -> [u8; 4] {
    [raw[0], raw[1], raw[2], raw[3]]
}

fn word8(raw: &[u8]) -> [u8; 8] {
    [raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7]]
}

/// Writes `s` into a NUL-padded field of `width` bytes.
pub fn put_fixed_str(buf: &mut BytesMut, s: &str, width: usize) {
    let mut end = s.len().min(width);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_slice(&s.as_bytes()[..end]);
    buf.put_bytes(0, width - end);
}

/// Reads a C string out of a fixed-width field.
pub fn fixed_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Conversion between a Rust field type and a wire [`Value`].
pub trait WireValue: Sized {
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_wire_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl WireValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_wire_value! {
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f64 => F64,
    String => Str,
}

/// Pulls the next value out of a decoded value list.
pub fn take<T: WireValue>(
    values: &mut impl Iterator<Item = Value>,
    record: &'static str,
    field: &'static str,
) -> Result<T, ProtocolError> {
    let value = values.next().ok_or(ProtocolError::MissingField(field))?;
    T::from_value(value).ok_or(ProtocolError::FieldType { record, field })
}

/// A typed payload record with a static wire schema.
pub trait Record: Sized {
    const SCHEMA: Schema;

    /// Field values in wire order.
    fn to_values(&self) -> Vec<Value>;

    /// Rebuilds the record from values in wire order.
    fn from_values(values: Vec<Value>) -> Result<Self, ProtocolError>;

    /// Wire size of one record.
    fn wire_size() -> usize {
        Self::SCHEMA.size()
    }

    fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(Self::wire_size());
        Self::SCHEMA.encode(&self.to_values(), &mut buf)?;
        Ok(buf.freeze())
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_values(Self::SCHEMA.decode(bytes)?)
    }
}

/// Encodes a slice of records back to back.
pub fn encode_records<R: Record>(records: &[R]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(records.len() * R::wire_size());
    for record in records {
        R::SCHEMA.encode(&record.to_values(), &mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decodes `count` back-to-back records; the byte length must match exactly.
pub fn decode_records<R: Record>(bytes: &[u8], count: usize) -> Result<Vec<R>, ProtocolError> {
    let size = R::wire_size();
    if bytes.len() != size * count {
        return Err(ProtocolError::SizeMismatch {
            record: R::SCHEMA.name,
            expected: size * count,
            actual: bytes.len(),
        });
    }
    bytes.chunks_exact(size).map(R::decode).collect()
}

/// Decodes a little-endian array of doubles (spectra, wavelengths).
pub fn decode_f64_array(bytes: &[u8], count: usize) -> Result<Vec<f64>, ProtocolError> {
    if bytes.len() != count * 8 {
        return Err(ProtocolError::SizeMismatch {
            record: "f64 array",
            expected: count * 8,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(word8(c)))
        .collect())
}

/// Declares a payload record type and its wire schema.
///
/// ```ignore
/// wire_record! {
///     /// Stage position.
///     pub struct Position(Little) {
///         pub x: f64 => F64,
///         pub y: f64 => F64,
///     }
/// }
/// ```
macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($order:ident) {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $fty:ty => $wire:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $fty,
            )*
        }

        impl $name {
            const FIELDS: &'static [$crate::record::Field] = &[
                $(
                    $crate::record::Field {
                        name: stringify!($field),
                        ty: {
                            #[allow(unused_imports)]
                            use $crate::record::FieldType::*;
                            $wire
                        },
                    },
                )*
            ];
        }

        impl $crate::record::Record for $name {
            const SCHEMA: $crate::record::Schema = $crate::record::Schema {
                name: stringify!($name),
                order: $crate::record::ByteOrder::$order,
                fields: Self::FIELDS,
            };

            fn to_values(&self) -> Vec<$crate::record::Value> {
                vec![
                    $( $crate::record::WireValue::into_value(self.$field.clone()), )*
                ]
            }

            fn from_values(
                values: Vec<$crate::record::Value>,
            ) -> Result<Self, $crate::error::ProtocolError> {
                if values.len() != Self::FIELDS.len() {
                    return Err($crate::error::ProtocolError::FieldCount {
                        record: stringify!($name),
                        expected: Self::FIELDS.len(),
                        actual: values.len(),
                    });
                }
                let mut values = values.into_iter();
                Ok(Self {
                    $(
                        $field: $crate::record::take(
                            &mut values,
                            stringify!($name),
                            stringify!($field),
                        )?,
                    )*
                })
            }
        }
    };
}

pub(crate) use wire_record;

/// Declares a C-style wire enumeration with `code`/`from_code` conversions.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:expr),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $($variant = $value),*
        }

        impl $name {
            pub fn code(self) -> u32 {
                self as u32
            }

            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $(c if c == $value => Some($name::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use wire_enum;
