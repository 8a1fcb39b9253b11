//! The message codec (C6): marshal/unmarshal complete D-Bus messages.

use std::num::NonZeroU32;

use crate::buf::{PutBuf, ReadBuf};
use crate::error::{Error, Result, UnmarshallError};
use crate::marshal::marshall_value;
use crate::protocol::{Endianness, FixedHeader, Flags, HeaderField, MessageType, PROTOCOL_VERSION};
use crate::signature::{self, Type};
use crate::unmarshal::{unmarshall_value, UnmarshallOptions};
use crate::value::Value;


/// The semantic kind of a message, read-only: derived from `Message`'s
/// fields, never constructed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    MethodCall { path: String, member: String },
    MethodReturn { reply_serial: NonZeroU32 },
    Error { error_name: String, reply_serial: NonZeroU32 },
    Signal { path: String, interface: String, member: String },
}

/// A complete D-Bus message: fixed header, header fields and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub flags: Flags,
    pub serial: NonZeroU32,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub error_name: Option<String>,
    pub reply_serial: Option<NonZeroU32>,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub signature: String,
    pub body: Vec<Value>,
}

impl Message {
    pub fn method_call(path: impl Into<String>, member: impl Into<String>, serial: NonZeroU32) -> Self {
        Message {
            message_type: MessageType::MethodCall,
            flags: Flags::EMPTY,
            serial,
            path: Some(path.into()),
            interface: None,
            member: Some(member.into()),
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: String::new(),
            body: Vec::new(),
        }
    }

    pub fn method_return(reply_serial: NonZeroU32, serial: NonZeroU32) -> Self {
        Message {
            message_type: MessageType::MethodReturn,
            flags: Flags::EMPTY,
            serial,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: Some(reply_serial),
            destination: None,
            sender: None,
            signature: String::new(),
            body: Vec::new(),
        }
    }

    pub fn error(error_name: impl Into<String>, reply_serial: NonZeroU32, serial: NonZeroU32) -> Self {
        Message {
            message_type: MessageType::Error,
            flags: Flags::EMPTY,
            serial,
            path: None,
            interface: None,
            member: None,
            error_name: Some(error_name.into()),
            reply_serial: Some(reply_serial),
            destination: None,
            sender: None,
            signature: String::new(),
            body: Vec::new(),
        }
    }

    pub fn signal(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        serial: NonZeroU32,
    ) -> Self {
        Message {
            message_type: MessageType::Signal,
            flags: Flags::EMPTY,
            serial,
            path: Some(path.into()),
            interface: Some(interface.into()),
            member: Some(member.into()),
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: String::new(),
            body: Vec::new(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_body(mut self, signature: impl Into<String>, body: Vec<Value>) -> Self {
        self.signature = signature.into();
        self.body = body;
        self
    }

    /// The semantic kind of this message, validating the per-type required
    /// headers are present.
    pub fn kind(&self) -> Result<MessageKind> {
        match self.message_type {
            MessageType::MethodCall => Ok(MessageKind::MethodCall {
                path: self.path.clone().ok_or_else(|| invalid("missing PATH"))?,
                member: self.member.clone().ok_or_else(|| invalid("missing MEMBER"))?,
            }),
            MessageType::MethodReturn => Ok(MessageKind::MethodReturn {
                reply_serial: self
                    .reply_serial
                    .ok_or_else(|| invalid("missing REPLY_SERIAL"))?,
            }),
            MessageType::Error => Ok(MessageKind::Error {
                error_name: self
                    .error_name
                    .clone()
                    .ok_or_else(|| invalid("missing ERROR_NAME"))?,
                reply_serial: self
                    .reply_serial
                    .ok_or_else(|| invalid("missing REPLY_SERIAL"))?,
            }),
            MessageType::Signal => Ok(MessageKind::Signal {
                path: self.path.clone().ok_or_else(|| invalid("missing PATH"))?,
                interface: self
                    .interface
                    .clone()
                    .ok_or_else(|| invalid("missing INTERFACE"))?,
                member: self.member.clone().ok_or_else(|| invalid("missing MEMBER"))?,
            }),
        }
    }
}

fn invalid(msg: &str) -> Error {
    Error::InvalidMessage(msg.to_string())
}

/// A buffer running out of bytes mid-decode means the frame was truncated;
/// every other unmarshal failure is a structural problem with the bytes
/// that were actually present.
fn unmarshall_err(err: UnmarshallError) -> Error {
    match err {
        UnmarshallError::BufferUnderflow => Error::ShortRead(err.to_string()),
        other => Error::Unmarshall(other),
    }
}

/// Header fields are encoded in this fixed order; the D-Bus wire format
/// does not require any particular order, but a deterministic one makes
/// messages reproducible.
const HEADER_FIELD_ORDER: [HeaderField; 7] = [
    HeaderField::Path,
    HeaderField::Interface,
    HeaderField::Member,
    HeaderField::ErrorName,
    HeaderField::ReplySerial,
    HeaderField::Destination,
    HeaderField::Sender,
];

/// Marshal a complete message into its wire representation.
pub fn marshall_message(msg: &Message) -> Result<Vec<u8>> {
    // Validate the per-type required headers before writing anything.
    msg.kind()?;

    if !msg.body.is_empty() && msg.signature.is_empty() {
        return Err(invalid("body is non-empty but signature header is missing"));
    }

    let body_types = signature::parse(&msg.signature)?.types;
    if body_types.len() != msg.body.len() {
        return Err(invalid("body does not match declared signature"));
    }

    let mut buf = PutBuf::new();

    buf.write_u8(Endianness::NATIVE as u8);
    buf.write_u8(msg.message_type as u8);
    buf.write_u8(msg.flags.0);
    buf.write_u8(PROTOCOL_VERSION);
    let body_length_pos = buf.len();
    buf.write_u32(0);
    buf.write_u32(msg.serial.get());

    let mut entries = Vec::new();

    for field in HEADER_FIELD_ORDER {
        let entry = match field {
            HeaderField::Path => msg.path.as_ref().map(|v| (field, "o", Value::ObjectPath(v.clone()))),
            HeaderField::Interface => msg.interface.as_ref().map(|v| (field, "s", Value::Str(v.clone()))),
            HeaderField::Member => msg.member.as_ref().map(|v| (field, "s", Value::Str(v.clone()))),
            HeaderField::ErrorName => msg.error_name.as_ref().map(|v| (field, "s", Value::Str(v.clone()))),
            HeaderField::ReplySerial => msg
                .reply_serial
                .map(|v| (field, "u", Value::Uint32(v.get()))),
            HeaderField::Destination => msg
                .destination
                .as_ref()
                .map(|v| (field, "s", Value::Str(v.clone()))),
            HeaderField::Sender => msg.sender.as_ref().map(|v| (field, "s", Value::Str(v.clone()))),
            HeaderField::Signature | HeaderField::UnixFds => None,
        };

        if let Some((field, sig, value)) = entry {
            entries.push(Value::Struct(vec![
                Value::Byte(field as u8),
                Value::Variant(sig.to_string(), Box::new(value)),
            ]));
        }
    }

    if !msg.signature.is_empty() {
        entries.push(Value::Struct(vec![
            Value::Byte(HeaderField::Signature as u8),
            Value::Variant(
                "g".to_string(),
                Box::new(Value::Signature(msg.signature.clone())),
            ),
        ]));
    }

    let header_field_ty = Type::Array(Box::new(Type::Struct(vec![Type::Byte, Type::Variant])));
    marshall_value(&mut buf, &header_field_ty, &Value::Array(entries))
        .map_err(Error::Marshall)?;

    buf.align(8);
    let body_start = buf.len();

    for (ty, value) in body_types.iter().zip(&msg.body) {
        marshall_value(&mut buf, ty, value).map_err(Error::Marshall)?;
    }

    let body_length = (buf.len() - body_start) as u32;
    if body_length > crate::buf::MAX_BODY_LENGTH {
        return Err(invalid("body exceeds the maximum message length"));
    }
    buf.patch_u32(body_length_pos, body_length);

    Ok(buf.into_vec())
}

/// Unmarshal a complete message from a buffer known to hold exactly one
/// whole frame (see [`crate::connection::Connection`] for framing).
pub fn unmarshall_message(bytes: &[u8], options: &UnmarshallOptions) -> Result<Message> {
    let mut buf = ReadBuf::new(bytes);

    let endianness_byte = buf.read_u8().map_err(unmarshall_err)?;
    let endianness =
        Endianness::from_byte(endianness_byte).ok_or_else(|| invalid("unknown endianness byte"))?;
    buf.set_endianness(endianness);

    let message_type_byte = buf.read_u8().map_err(unmarshall_err)?;
    let message_type =
        MessageType::from_byte(message_type_byte).ok_or_else(|| invalid("unknown message type"))?;
    let flags = Flags(buf.read_u8().map_err(unmarshall_err)?);
    let version = buf.read_u8().map_err(unmarshall_err)?;
    if version != PROTOCOL_VERSION {
        return Err(invalid("unsupported protocol version"));
    }
    let body_length = buf.read_u32().map_err(unmarshall_err)?;
    let serial = buf.read_u32().map_err(unmarshall_err)?;
    let serial = NonZeroU32::new(serial).ok_or_else(|| invalid("serial must be nonzero"))?;

    let _fixed = FixedHeader {
        endianness,
        message_type,
        flags,
        version,
        body_length,
        serial: serial.get(),
    };

    let header_field_ty = Type::Array(Box::new(Type::Struct(vec![Type::Byte, Type::Variant])));
    let header_fields =
        unmarshall_value(&mut buf, &header_field_ty, options).map_err(unmarshall_err)?;

    let Value::Array(entries) = header_fields else {
        return Err(invalid("header field array decoded incorrectly"));
    };

    let mut path = None;
    let mut interface = None;
    let mut member = None;
    let mut error_name = None;
    let mut reply_serial = None;
    let mut destination = None;
    let mut sender = None;
    let mut signature = String::new();

    for entry in entries {
        let Value::Struct(fields) = entry else {
            return Err(invalid("malformed header field entry"));
        };
        let [Value::Byte(code), Value::Variant(_, inner)] = <[Value; 2]>::try_from(fields)
            .map_err(|_| invalid("malformed header field entry"))?
        else {
            return Err(invalid("malformed header field entry"));
        };

        let Some(field) = HeaderField::from_byte(code) else {
            continue; // unknown header fields are ignored
        };

        match (field, *inner) {
            (HeaderField::Path, Value::ObjectPath(v)) => path = Some(v),
            (HeaderField::Interface, Value::Str(v)) => interface = Some(v),
            (HeaderField::Member, Value::Str(v)) => member = Some(v),
            (HeaderField::ErrorName, Value::Str(v)) => error_name = Some(v),
            (HeaderField::ReplySerial, Value::Uint32(v)) => {
                reply_serial = Some(NonZeroU32::new(v).ok_or_else(|| invalid("zero REPLY_SERIAL"))?);
            }
            (HeaderField::Destination, Value::Str(v)) => destination = Some(v),
            (HeaderField::Sender, Value::Str(v)) => sender = Some(v),
            (HeaderField::Signature, Value::Signature(v)) => signature = v,
            (HeaderField::UnixFds, _) => {}
            _ => return Err(invalid("header field type mismatch")),
        }
    }

    buf.align(8).map_err(unmarshall_err)?;

    let body_types = signature::parse(&signature)?.types;

    if body_types.is_empty() && body_length != 0 {
        return Err(invalid("non-empty body with empty signature"));
    }

    let mut body = Vec::with_capacity(body_types.len());
    for ty in &body_types {
        body.push(unmarshall_value(&mut buf, ty, options).map_err(unmarshall_err)?);
    }

    let msg = Message {
        message_type,
        flags,
        serial,
        path,
        interface,
        member,
        error_name,
        reply_serial,
        destination,
        sender,
        signature,
        body,
    };

    // Validates the per-type required headers are all present.
    msg.kind()?;

    Ok(msg)
}

/// Compute the length, in bytes, of the header-fields-plus-padding portion
/// of a frame given the `headers` byte count read from the wire, so the
/// connection's read loop knows how many more bytes to buffer before it can
/// call [`unmarshall_message`].
pub fn header_and_body_len(headers: u32, body_length: u32) -> Result<usize, UnmarshallError> {
    let headers = headers as usize;
    let pad = crate::buf::padding_to(headers, 8);
    Ok(headers + pad + body_length as usize)
}
