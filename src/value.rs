//! The dynamic value tree marshalled against a [`Signature`](crate::signature::Signature).
//!
//! D-Bus payloads are dynamically typed at the wire level: a signature
//! describes the shape, and the value carried alongside it must match that
//! shape exactly. This is modelled as a recursive tagged union, with the
//! marshaller dispatching on the *signature* node rather than on the value's
//! own tag, validating correspondence as it goes (spec-level design note:
//! "the marshaller dispatches on the signature node, not on the value tag").

/// A single dynamically-typed D-Bus value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(Int64Value),
    Uint64(Uint64Value),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    UnixFd(u32),
    Array(Vec<Value>),
    /// A byte array (`ay`) decoded as a contiguous buffer rather than a
    /// sequence of individually-tagged [`Value::Byte`]s, selected by the
    /// `ByteArraysAsBuffers` configuration flag.
    Bytes(Vec<u8>),
    Struct(Vec<Value>),
    DictEntry(Box<Value>, Box<Value>),
    /// A variant carries its own signature string alongside the value.
    Variant(String, Box<Value>),
}

/// Accepted shapes for a 64-bit signed integer on the way into the
/// marshaller, per the "accepts any of" policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Int64Value {
    Native(i64),
    Decimal(String),
    Hex(String),
    /// A low/high/unsigned triple, as used by sources whose native integer
    /// is itself 32-bit.
    Parts { low: u32, high: u32, unsigned: bool },
    /// A value already decoded from the wire that did not fit the safe
    /// 53-bit window, preserved verbatim (`PreserveLargeIntegers`).
    Big(i128),
}

/// Accepted shapes for a 64-bit unsigned integer, mirroring [`Int64Value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uint64Value {
    Native(u64),
    Decimal(String),
    Hex(String),
    Parts { low: u32, high: u32 },
    Big(u128),
}

/// A native integer's safe window: values whose magnitude fits can always be
/// losslessly represented without widening.
const SAFE_WINDOW: i64 = 1 << 53;

impl Int64Value {
    /// Resolve this value to a concrete `i64`, rejecting overflow and sign
    /// mismatches.
    pub fn resolve(&self) -> Result<i64, crate::error::MarshallError> {
        use crate::error::MarshallError;

        match self {
            Int64Value::Native(v) => Ok(*v),
            Int64Value::Decimal(s) => s.parse().map_err(|_| MarshallError::OutOfRange('x')),
            Int64Value::Hex(s) => {
                let (neg, digits) = match s.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, s.as_str()),
                };
                let digits = digits
                    .strip_prefix("0x")
                    .ok_or(MarshallError::OutOfRange('x'))?;
                let magnitude =
                    u64::from_str_radix(digits, 16).map_err(|_| MarshallError::OutOfRange('x'))?;
                if neg {
                    i64::try_from(magnitude)
                        .ok()
                        .and_then(i64::checked_neg)
                        .ok_or(MarshallError::OutOfRange('x'))
                } else {
                    i64::try_from(magnitude).map_err(|_| MarshallError::OutOfRange('x'))
                }
            }
            Int64Value::Parts {
                low,
                high,
                unsigned,
            } => {
                if *unsigned {
                    return Err(MarshallError::SignMismatch);
                }
                Ok(((*high as i64) << 32) | (*low as i64))
            }
            Int64Value::Big(v) => i64::try_from(*v).map_err(|_| MarshallError::OutOfRange('x')),
        }
    }

    /// Whether this value is guaranteed to round-trip through a native
    /// double without losing precision.
    pub fn fits_safe_window(value: i64) -> bool {
        value.abs() < SAFE_WINDOW
    }
}

impl Uint64Value {
    pub fn resolve(&self) -> Result<u64, crate::error::MarshallError> {
        use crate::error::MarshallError;

        match self {
            Uint64Value::Native(v) => Ok(*v),
            Uint64Value::Decimal(s) => s.parse().map_err(|_| MarshallError::OutOfRange('t')),
            Uint64Value::Hex(s) => {
                let digits = s.strip_prefix("0x").ok_or(MarshallError::OutOfRange('t'))?;
                u64::from_str_radix(digits, 16).map_err(|_| MarshallError::OutOfRange('t'))
            }
            Uint64Value::Parts { low, high } => Ok(((*high as u64) << 32) | (*low as u64)),
            Uint64Value::Big(v) => u64::try_from(*v).map_err(|_| MarshallError::OutOfRange('t')),
        }
    }

    pub fn fits_safe_window(value: u64) -> bool {
        value < SAFE_WINDOW as u64
    }
}

impl From<i64> for Int64Value {
    fn from(v: i64) -> Self {
        Int64Value::Native(v)
    }
}

impl From<u64> for Uint64Value {
    fn from(v: u64) -> Self {
        Uint64Value::Native(v)
    }
}

impl Value {
    /// Shorthand for constructing a byte array value (`ay`), which decodes
    /// as a contiguous slice rather than a sequence of integers when
    /// `ByteArraysAsBuffers` is enabled.
    pub fn byte_array(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(bytes.into())
    }
}
