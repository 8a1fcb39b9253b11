//! Low-level wire constants: endianness, message type, flags and header
//! field codes, carried from the teacher's `protocol` module with its
//! `repr(u8)` newtype pattern kept for the fixed-size wire fields.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// The endianness a message was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Endianness {
    Little = b'l',
    Big = b'B',
}

impl Endianness {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endianness = Endianness::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endianness = Endianness::Big;

    pub fn from_byte(b: u8) -> Option<Endianness> {
        match b {
            b'l' => Some(Endianness::Little),
            b'B' => Some(Endianness::Big),
            _ => None,
        }
    }
}

/// The type of a complete D-Bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<MessageType> {
        match b {
            1 => Some(MessageType::MethodCall),
            2 => Some(MessageType::MethodReturn),
            3 => Some(MessageType::Error),
            4 => Some(MessageType::Signal),
            _ => None,
        }
    }
}

/// Flags inside a D-Bus message header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags(pub u8);

impl Flags {
    pub const EMPTY: Flags = Flags(0);
    pub const NO_REPLY_EXPECTED: Flags = Flags(1);
    pub const NO_AUTO_START: Flags = Flags(2);
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Flags = Flags(4);
}

impl BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitAnd for Flags {
    type Output = bool;
    fn bitand(self, rhs: Flags) -> bool {
        self.0 & rhs.0 != 0
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Header field codes, as they appear as the first element of each `(yv)`
/// entry in the header field array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderField {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

impl HeaderField {
    pub fn from_byte(b: u8) -> Option<HeaderField> {
        match b {
            1 => Some(HeaderField::Path),
            2 => Some(HeaderField::Interface),
            3 => Some(HeaderField::Member),
            4 => Some(HeaderField::ErrorName),
            5 => Some(HeaderField::ReplySerial),
            6 => Some(HeaderField::Destination),
            7 => Some(HeaderField::Sender),
            8 => Some(HeaderField::Signature),
            9 => Some(HeaderField::UnixFds),
            _ => None,
        }
    }
}

/// The fixed 12-byte prefix of every D-Bus message.
#[derive(Debug, Clone, Copy)]
pub struct FixedHeader {
    pub endianness: Endianness,
    pub message_type: MessageType,
    pub flags: Flags,
    pub version: u8,
    pub body_length: u32,
    pub serial: u32,
}

pub const PROTOCOL_VERSION: u8 = 1;
