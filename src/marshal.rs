//! The type-directed marshaller (C3).
//!
//! Marshalling dispatches on the signature tree, validating that the value
//! tree matches its shape and that every scalar is in range, before any
//! bytes for that value are written — so a rejected value never leaves
//! partial state in the output buffer.

use crate::buf::PutBuf;
use crate::error::MarshallError;
use crate::signature::Type;
use crate::value::Value;

type Result<T> = std::result::Result<T, MarshallError>;

/// Marshal `values` against `signature` into a fresh buffer, with alignment
/// computed as though the buffer began at `start_offset`.
pub fn marshall(types: &[Type], values: &[Value], start_offset: usize) -> Result<Vec<u8>> {
    let mut buf = PutBuf::new();
    buf.set_base(start_offset);

    if types.len() != values.len() {
        return Err(MarshallError::TypeMismatch);
    }

    for (ty, value) in types.iter().zip(values) {
        marshall_value(&mut buf, ty, value)?;
    }

    Ok(buf.into_vec())
}

/// Marshal a single value into an already-positioned buffer, continuing its
/// running offset. Used by the message codec to interleave the header field
/// array and the body into one contiguous, correctly-aligned buffer.
pub(crate) fn marshall_value(buf: &mut PutBuf, ty: &Type, value: &Value) -> Result<()> {
    buf.align(ty.alignment());

    match (ty, value) {
        (Type::Byte, Value::Byte(v)) => buf.write_u8(*v),
        (Type::Boolean, Value::Boolean(v)) => buf.write_u32(if *v { 1 } else { 0 }),
        (Type::Int16, Value::Int16(v)) => {
            let range = i32::from(*v);
            if !(i32::from(i16::MIN)..=i32::from(i16::MAX)).contains(&range) {
                return Err(MarshallError::OutOfRange('n'));
            }
            buf.write_i16(*v);
        }
        (Type::Uint16, Value::Uint16(v)) => buf.write_u16(*v),
        (Type::Int32, Value::Int32(v)) => buf.write_i32(*v),
        (Type::Uint32, Value::Uint32(v)) => buf.write_u32(*v),
        (Type::Int64, Value::Int64(v)) => {
            let resolved = v.resolve()?;
            buf.write_i64(resolved);
        }
        (Type::Uint64, Value::Uint64(v)) => {
            let resolved = v.resolve()?;
            buf.write_u64(resolved);
        }
        (Type::Double, Value::Double(v)) => {
            if !v.is_finite() {
                return Err(MarshallError::NonFinite);
            }
            buf.write_f64(*v);
        }
        (Type::Str, Value::Str(s)) => marshall_string(buf, s)?,
        (Type::ObjectPath, Value::ObjectPath(s)) => {
            crate::object_path::validate(s).map_err(|_| MarshallError::InvalidObjectPathValue)?;
            marshall_string(buf, s)?;
        }
        (Type::Signature, Value::Signature(s)) => {
            if s.len() > crate::signature::MAX_SIGNATURE_LEN {
                return Err(MarshallError::InvalidSignatureValue);
            }
            crate::signature::parse(s).map_err(|_| MarshallError::InvalidSignatureValue)?;
            marshall_signature_str(buf, s);
        }
        (Type::UnixFd, Value::UnixFd(v)) => buf.write_u32(*v),
        (Type::Array(elem), Value::Array(items)) => {
            marshall_array(buf, elem, items)?;
        }
        (Type::Array(elem), Value::Bytes(bytes)) if matches!(**elem, Type::Byte) => {
            marshall_byte_array(buf, bytes)?;
        }
        (Type::Struct(fields), Value::Struct(items)) => {
            if fields.len() != items.len() {
                return Err(MarshallError::TypeMismatch);
            }
            for (field_ty, field_value) in fields.iter().zip(items) {
                marshall_value(buf, field_ty, field_value)?;
            }
        }
        (Type::DictEntry(key_ty, value_ty), Value::DictEntry(k, v)) => {
            marshall_value(buf, key_ty, k)?;
            marshall_value(buf, value_ty, v)?;
        }
        (Type::Variant, Value::Variant(sig, inner)) => {
            let parsed = crate::signature::parse(sig).map_err(|_| MarshallError::InvalidSignatureValue)?;
            if parsed.types.len() != 1 {
                return Err(MarshallError::InvalidSignatureValue);
            }
            marshall_signature_str(buf, sig);
            marshall_value(buf, &parsed.types[0], inner)?;
        }
        _ => return Err(MarshallError::TypeMismatch),
    }

    Ok(())
}

fn marshall_string(buf: &mut PutBuf, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(MarshallError::EmbeddedNul);
    }

    let bytes = s.as_bytes();
    buf.write_u32(bytes.len() as u32);
    buf.write_bytes(bytes);
    buf.write_u8(0);
    Ok(())
}

fn marshall_signature_str(buf: &mut PutBuf, s: &str) {
    let bytes = s.as_bytes();
    buf.write_u8(bytes.len() as u8);
    buf.write_bytes(bytes);
    buf.write_u8(0);
}

fn marshall_array(buf: &mut PutBuf, elem_ty: &Type, items: &[Value]) -> Result<()> {
    let len_pos = buf.reserve_u32();
    buf.align(elem_ty.alignment());
    let data_start = buf.len();

    for item in items {
        marshall_value(buf, elem_ty, item)?;
    }

    let array_len = (buf.len() - data_start) as u32;
    if array_len > crate::buf::MAX_ARRAY_LENGTH {
        return Err(MarshallError::OutOfRange('a'));
    }
    buf.patch_u32(len_pos, array_len);
    Ok(())
}

fn marshall_byte_array(buf: &mut PutBuf, bytes: &[u8]) -> Result<()> {
    if bytes.len() as u64 > u64::from(crate::buf::MAX_ARRAY_LENGTH) {
        return Err(MarshallError::OutOfRange('a'));
    }
    buf.write_u32(bytes.len() as u32);
    buf.write_bytes(bytes);
    Ok(())
}
