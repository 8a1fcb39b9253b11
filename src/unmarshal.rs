//! The type-directed unmarshaller (C5).

use crate::buf::{ReadBuf, MAX_ARRAY_LENGTH};
use crate::error::UnmarshallError;
use crate::signature::Type;
use crate::value::{Int64Value, Uint64Value, Value};

type Result<T> = std::result::Result<T, UnmarshallError>;

/// Options controlling a handful of unmarshal-time representation choices.
#[derive(Debug, Clone, Copy)]
pub struct UnmarshallOptions {
    /// Decode `ay` as a contiguous byte array value rather than a sequence
    /// of individually-tagged byte values.
    pub byte_arrays_as_buffers: bool,
    /// Always decode 64-bit integers into the `Big` representation, even
    /// when the value would fit a native integer losslessly.
    pub preserve_large_integers: bool,
}

impl Default for UnmarshallOptions {
    fn default() -> Self {
        UnmarshallOptions {
            byte_arrays_as_buffers: true,
            preserve_large_integers: false,
        }
    }
}

/// Unmarshal `bytes` against `types`, with alignment computed as though
/// `bytes` began at `start_offset`.
pub fn unmarshall(
    bytes: &[u8],
    types: &[Type],
    start_offset: usize,
    options: UnmarshallOptions,
) -> Result<Vec<Value>> {
    let mut buf = ReadBuf::with_base(bytes, start_offset);
    let mut values = Vec::with_capacity(types.len());

    for ty in types {
        values.push(unmarshall_value(&mut buf, ty, &options)?);
    }

    Ok(values)
}

/// Unmarshal a single value from an already-positioned buffer, continuing
/// its running offset. Used by the message codec.
pub(crate) fn unmarshall_value(
    buf: &mut ReadBuf<'_>,
    ty: &Type,
    options: &UnmarshallOptions,
) -> Result<Value> {
    buf.align(ty.alignment())?;

    Ok(match ty {
        Type::Byte => Value::Byte(buf.read_u8()?),
        Type::Boolean => Value::Boolean(buf.read_u32()? != 0),
        Type::Int16 => Value::Int16(buf.read_i16()?),
        Type::Uint16 => Value::Uint16(buf.read_u16()?),
        Type::Int32 => Value::Int32(buf.read_i32()?),
        Type::Uint32 => Value::Uint32(buf.read_u32()?),
        Type::Int64 => {
            let raw = buf.read_i64()?;
            Value::Int64(if options.preserve_large_integers {
                Int64Value::Big(i128::from(raw))
            } else {
                Int64Value::Native(raw)
            })
        }
        Type::Uint64 => {
            let raw = buf.read_u64()?;
            Value::Uint64(if options.preserve_large_integers {
                Uint64Value::Big(u128::from(raw))
            } else {
                Uint64Value::Native(raw)
            })
        }
        Type::Double => Value::Double(buf.read_f64()?),
        Type::Str => Value::Str(read_string(buf)?),
        Type::ObjectPath => {
            let s = read_string(buf)?;
            crate::object_path::validate(&s)?;
            Value::ObjectPath(s)
        }
        Type::Signature => Value::Signature(read_signature_str(buf)?),
        Type::UnixFd => Value::UnixFd(buf.read_u32()?),
        Type::Array(elem) => unmarshall_array(buf, elem, options)?,
        Type::Struct(fields) => {
            let mut items = Vec::with_capacity(fields.len());
            for field_ty in fields {
                items.push(unmarshall_value(buf, field_ty, options)?);
            }
            Value::Struct(items)
        }
        Type::DictEntry(key_ty, value_ty) => {
            let key = unmarshall_value(buf, key_ty, options)?;
            let value = unmarshall_value(buf, value_ty, options)?;
            Value::DictEntry(Box::new(key), Box::new(value))
        }
        Type::Variant => {
            let sig_str = read_signature_str(buf)?;
            let sig = crate::signature::parse(&sig_str)?;
            if sig.types.len() != 1 {
                return Err(UnmarshallError::VariantNotSingleType);
            }
            let inner = unmarshall_value(buf, &sig.types[0], options)?;
            Value::Variant(sig_str, Box::new(inner))
        }
    })
}

fn read_string(buf: &mut ReadBuf<'_>) -> Result<String> {
    let len = buf.read_u32()? as usize;
    let bytes = buf.read_bytes(len)?;
    let nul = buf.read_u8()?;
    if nul != 0 {
        return Err(UnmarshallError::NotNulTerminated);
    }
    String::from_utf8(bytes.to_vec()).map_err(|_| UnmarshallError::InvalidUtf8)
}

fn read_signature_str(buf: &mut ReadBuf<'_>) -> Result<String> {
    let len = buf.read_u8()? as usize;
    let bytes = buf.read_bytes(len)?;
    let nul = buf.read_u8()?;
    if nul != 0 {
        return Err(UnmarshallError::NotNulTerminated);
    }
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| UnmarshallError::InvalidUtf8)
}

fn unmarshall_array(
    buf: &mut ReadBuf<'_>,
    elem_ty: &Type,
    options: &UnmarshallOptions,
) -> Result<Value> {
    let len = buf.read_u32()?;
    if len > MAX_ARRAY_LENGTH || len as usize > buf.remaining() {
        return Err(UnmarshallError::ArrayTooLong(len));
    }
    buf.align(elem_ty.alignment())?;

    let end_offset = buf.offset() + len as usize;
    let mut items = Vec::new();

    if matches!(elem_ty, Type::Byte) && options.byte_arrays_as_buffers {
        let bytes = buf.read_bytes(len as usize)?;
        return Ok(Value::byte_array(bytes.to_vec()));
    }

    while buf.offset() < end_offset {
        items.push(unmarshall_value(buf, elem_ty, options)?);
    }

    Ok(Value::Array(items))
}
