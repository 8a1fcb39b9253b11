//! The crate-wide error type.

use std::io;

use crate::object_path::ObjectPathError;
use crate::signature::SignatureError;

/// Result alias using [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A signature failed to parse.
    #[error("bad signature: {0}")]
    Signature(#[from] SignatureError),
    /// An object path failed to validate.
    #[error("bad object path: {0}")]
    ObjectPath(#[from] ObjectPathError),
    /// A value could not be marshalled against its declared signature.
    #[error("marshal error: {0}")]
    Marshall(#[from] MarshallError),
    /// Bytes could not be unmarshalled against a signature.
    #[error("unmarshal error: {0}")]
    Unmarshall(#[from] UnmarshallError),
    /// A message frame was truncated.
    #[error("short read: {0}")]
    ShortRead(String),
    /// A complete message was structurally invalid.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// The SASL handshake did not succeed with any configured mechanism.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// The connection has been closed and can no longer be used.
    #[error("connection closed")]
    ConnectionClosed,
    /// An error reply arrived from the bus or peer.
    #[error("{name}: {message}")]
    DBusError {
        /// The fully-qualified D-Bus error name.
        name: String,
        /// The human-readable message, if the error body carried one.
        message: String,
    },
    /// The bus address was missing or malformed.
    #[error("invalid bus address: {0}")]
    InvalidAddress(String),
    /// Underlying I/O failure.
    #[error("I/O error")]
    Io(#[from] io::Error),
    /// UTF-8 validation failure.
    #[error("invalid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
}

impl Error {
    /// Construct a [`Error::DBusError`] with no message.
    pub fn dbus(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::DBusError {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while marshalling a value tree against a signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MarshallError {
    /// An integer value fell outside the range of its declared type.
    #[error("value out of range for type {0:?}")]
    OutOfRange(char),
    /// A floating point value was not finite where the wire format requires it.
    #[error("non-finite double")]
    NonFinite,
    /// A string contained an embedded NUL byte.
    #[error("string contains an embedded NUL byte")]
    EmbeddedNul,
    /// A signature string exceeded 255 bytes or failed to parse.
    #[error("invalid signature value")]
    InvalidSignatureValue,
    /// An object path value failed to validate.
    #[error("invalid object path value")]
    InvalidObjectPathValue,
    /// The value tree did not match the shape described by the signature.
    #[error("value does not match signature")]
    TypeMismatch,
    /// An unsigned 64-bit value was supplied for a signed field, or vice versa.
    #[error("sign mismatch for 64-bit integer")]
    SignMismatch,
    /// Container nesting exceeded the protocol limit of 32.
    #[error("maximum container nesting exceeded")]
    MaxNesting,
}

/// Errors raised while unmarshalling bytes against a signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum UnmarshallError {
    /// The buffer ended before the value was fully read.
    #[error("buffer underflow")]
    BufferUnderflow,
    /// A string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// A string was missing its NUL terminator.
    #[error("string is not NUL terminated")]
    NotNulTerminated,
    /// An embedded signature failed to parse.
    #[error("embedded signature failed to parse: {0}")]
    BadSignature(#[from] SignatureError),
    /// An array's declared length exceeds the remaining buffer or the protocol maximum.
    #[error("array length {0} exceeds the remaining buffer")]
    ArrayTooLong(u32),
    /// A variant's inner signature described more than one complete type.
    #[error("variant signature must describe exactly one complete type")]
    VariantNotSingleType,
    /// An object path failed to validate.
    #[error("invalid object path: {0}")]
    BadObjectPath(#[from] ObjectPathError),
}
