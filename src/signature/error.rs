use std::fmt;

/// Detailed errors raised when a signature string fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureError {
    /// A byte that is not one of the known type codes.
    UnknownType,
    /// The signature ended in the middle of a complete type.
    UnexpectedEnd,
    /// Container nesting exceeded 32 levels.
    MaxNesting,
    /// A dict-entry's key was not a basic type, or the entry appeared
    /// outside of an array.
    BadDictEntry,
    /// The signature string exceeded 255 bytes.
    TooLong,
    /// A `)` or `}` appeared without a matching opener.
    UnbalancedClose,
    /// A struct or dict-entry was left unclosed.
    Unclosed,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SignatureError::UnknownType => "unknown type code",
            SignatureError::UnexpectedEnd => "signature ended inside a complete type",
            SignatureError::MaxNesting => "maximum container nesting exceeded",
            SignatureError::BadDictEntry => "dict-entry key must be a basic type inside an array",
            SignatureError::TooLong => "signature exceeds 255 bytes",
            SignatureError::UnbalancedClose => "unbalanced ')' or '}'",
            SignatureError::Unclosed => "unclosed struct or dict-entry",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for SignatureError {}
