//! A native D-Bus protocol engine: wire codec, SASL handshake, session
//! multiplexing and an introspection-driven proxy/service layer.
//!
//! The wire-level modules (`signature`, `value`, `marshal`, `unmarshal`,
//! `object_path`, `message`) have no I/O dependency and work with any byte
//! buffer. Everything above the codec (`sasl`, `address`, `connection`,
//! `session`, `proxy`, `service`) is built on `tokio` and requires the
//! `tokio` feature, which is enabled by default.

pub mod address;
mod buf;
pub mod error;
pub mod introspect;
pub mod marshal;
pub mod message;
pub mod object_path;
pub mod protocol;
pub mod sasl;
pub mod signature;
pub mod unmarshal;
pub mod value;

#[cfg(feature = "tokio")]
pub mod connection;
#[cfg(feature = "tokio")]
pub mod proxy;
#[cfg(feature = "tokio")]
pub mod service;
#[cfg(feature = "tokio")]
pub mod session;

#[cfg(test)]
mod marshal_tests;
#[cfg(test)]
mod marshal_proptests;

pub use error::{Error, Result};
pub use message::{Message, MessageKind};
pub use signature::{Signature, Type};
pub use value::Value;

#[cfg(feature = "tokio")]
pub use connection::Connection;
#[cfg(feature = "tokio")]
pub use proxy::Proxy;
#[cfg(feature = "tokio")]
pub use sasl::Mechanism;
#[cfg(feature = "tokio")]
pub use service::{InterfaceBuilder, ObjectBuilder, Service};
#[cfg(feature = "tokio")]
pub use session::{ReleaseNameReply, RequestNameReply, SessionBuilder, SessionHandle, SignalStream};
