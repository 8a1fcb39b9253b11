//! D-Bus type signatures.
//!
//! A signature is a compact string describing a tree of D-Bus types. This
//! module parses that string into a [`Type`] tree that the marshaller and
//! unmarshaller dispatch on directly, per the container/basic-type split in
//! the D-Bus specification.

pub use self::error::SignatureError;
mod error;

#[cfg(test)]
mod tests;

/// Container nesting may not exceed this depth (arrays, structs, dict-entries
/// and variants all count).
pub const MAX_DEPTH: usize = 32;

/// Signature strings may not exceed this many bytes.
pub const MAX_SIGNATURE_LEN: usize = 255;

/// A single complete D-Bus type, parsed into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    Str,
    ObjectPath,
    Signature,
    UnixFd,
    Array(Box<Type>),
    Struct(Vec<Type>),
    DictEntry(Box<Type>, Box<Type>),
    Variant,
}

impl Type {
    /// Whether this is one of the twelve basic (non-container) types.
    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            Type::Array(..) | Type::Struct(..) | Type::DictEntry(..) | Type::Variant
        )
    }

    /// The natural alignment of this type in bytes.
    pub fn alignment(&self) -> usize {
        match self {
            Type::Byte | Type::Signature => 1,
            Type::Int16 | Type::Uint16 => 2,
            Type::Boolean
            | Type::Int32
            | Type::Uint32
            | Type::Str
            | Type::ObjectPath
            | Type::UnixFd
            | Type::Array(..) => 4,
            Type::Int64
            | Type::Uint64
            | Type::Double
            | Type::Struct(..)
            | Type::DictEntry(..) => 8,
            Type::Variant => 1,
        }
    }

    /// Render this type back into its signature string.
    pub fn render(&self, out: &mut String) {
        match self {
            Type::Byte => out.push('y'),
            Type::Boolean => out.push('b'),
            Type::Int16 => out.push('n'),
            Type::Uint16 => out.push('q'),
            Type::Int32 => out.push('i'),
            Type::Uint32 => out.push('u'),
            Type::Int64 => out.push('x'),
            Type::Uint64 => out.push('t'),
            Type::Double => out.push('d'),
            Type::Str => out.push('s'),
            Type::ObjectPath => out.push('o'),
            Type::Signature => out.push('g'),
            Type::UnixFd => out.push('h'),
            Type::Variant => out.push('v'),
            Type::Array(elem) => {
                out.push('a');
                elem.render(out);
            }
            Type::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.render(out);
                }
                out.push(')');
            }
            Type::DictEntry(key, value) => {
                out.push('{');
                key.render(out);
                value.render(out);
                out.push('}');
            }
        }
    }

    /// Render this type to a new owned string.
    pub fn to_signature_string(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        out
    }
}

/// A parsed signature: an ordered sequence of zero or more complete types.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub types: Vec<Type>,
}

impl Signature {
    pub const fn empty() -> Self {
        Signature { types: Vec::new() }
    }

    /// Render this signature back to its canonical string form.
    pub fn to_signature_string(&self) -> String {
        let mut out = String::new();
        for ty in &self.types {
            ty.render(&mut out);
        }
        out
    }
}

/// Parse a complete signature string into a [`Signature`] tree.
///
/// `a` consumes exactly one following complete type, `(...)` opens a struct
/// that must be closed with `)`, and `{...}` opens a dict-entry that must
/// consume exactly two complete types (the first of which must be a basic
/// type) followed by `}`. Dict-entries may only appear as the element type
/// of an array.
pub fn parse(sig: &str) -> Result<Signature, SignatureError> {
    if sig.len() > MAX_SIGNATURE_LEN {
        return Err(SignatureError::TooLong);
    }

    let bytes = sig.as_bytes();
    let mut pos = 0;
    let mut types = Vec::new();

    while pos < bytes.len() {
        types.push(parse_one(bytes, &mut pos, 0, false)?);
    }

    Ok(Signature { types })
}

/// Parse exactly one complete type starting at `*pos`, advancing `*pos` past it.
fn parse_one(
    bytes: &[u8],
    pos: &mut usize,
    depth: usize,
    inside_array: bool,
) -> Result<Type, SignatureError> {
    if depth > MAX_DEPTH {
        return Err(SignatureError::MaxNesting);
    }

    let Some(&b) = bytes.get(*pos) else {
        return Err(SignatureError::UnexpectedEnd);
    };
    *pos += 1;

    let ty = match b {
        b'y' => Type::Byte,
        b'b' => Type::Boolean,
        b'n' => Type::Int16,
        b'q' => Type::Uint16,
        b'i' => Type::Int32,
        b'u' => Type::Uint32,
        b'x' => Type::Int64,
        b't' => Type::Uint64,
        b'd' => Type::Double,
        b's' => Type::Str,
        b'o' => Type::ObjectPath,
        b'g' => Type::Signature,
        b'h' => Type::UnixFd,
        b'v' => Type::Variant,
        b'a' => {
            let elem = parse_one(bytes, pos, depth + 1, true)?;
            Type::Array(Box::new(elem))
        }
        b'(' => {
            let mut fields = Vec::new();

            loop {
                match bytes.get(*pos) {
                    Some(b')') => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => {
                        fields.push(parse_one(bytes, pos, depth + 1, false)?);
                    }
                    None => return Err(SignatureError::Unclosed),
                }
            }

            if fields.is_empty() {
                return Err(SignatureError::UnexpectedEnd);
            }

            Type::Struct(fields)
        }
        b'{' => {
            if !inside_array {
                return Err(SignatureError::BadDictEntry);
            }

            let key = parse_one(bytes, pos, depth + 1, false)?;

            if !key.is_basic() {
                return Err(SignatureError::BadDictEntry);
            }

            let value = parse_one(bytes, pos, depth + 1, false)?;

            match bytes.get(*pos) {
                Some(b'}') => {
                    *pos += 1;
                }
                Some(_) | None => return Err(SignatureError::Unclosed),
            }

            Type::DictEntry(Box::new(key), Box::new(value))
        }
        b')' | b'}' => return Err(SignatureError::UnbalancedClose),
        _ => return Err(SignatureError::UnknownType),
    };

    Ok(ty)
}
