//! Bus address parsing.
//!
//! A D-Bus address is a semicolon-separated list of alternatives, each of
//! the form `transport:key1=value1,key2=value2`. The first alternative this
//! crate knows how to connect to is used; the rest are a fallback list for
//! transports or well-known paths it doesn't support yet.

use std::env;

use crate::error::{Error, Result};

#[cfg(test)]
mod tests;

/// One parsed address alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// `unix:path=/run/dbus/system_bus_socket`
    UnixPath(String),
    /// `unix:abstract=/tmp/dbus-xyz` (Linux abstract namespace socket).
    UnixAbstract(String),
    /// `tcp:host=...,port=...`
    Tcp { host: String, port: u16 },
}

/// Parse a full `DBUS_SESSION_BUS_ADDRESS`-style string into its ordered
/// list of alternatives.
pub fn parse_addresses(addr: &str) -> Result<Vec<Address>> {
    addr.split(';')
        .filter(|s| !s.is_empty())
        .map(parse_one)
        .collect()
}

fn parse_one(entry: &str) -> Result<Address> {
    let (transport, params) = entry
        .split_once(':')
        .ok_or_else(|| Error::InvalidAddress(format!("missing ':' in address: {entry:?}")))?;

    let mut path = None;
    let mut abstract_path = None;
    let mut host = None;
    let mut port = None;

    for kv in params.split(',') {
        if kv.is_empty() {
            continue;
        }
        let (key, value) = kv
            .split_once('=')
            .ok_or_else(|| Error::InvalidAddress(format!("malformed key=value pair: {kv:?}")))?;
        let value = unescape(value)?;

        match key {
            "path" => path = Some(value),
            "abstract" => abstract_path = Some(value),
            "host" => host = Some(value),
            "port" => {
                port = Some(
                    value
                        .parse()
                        .map_err(|_| Error::InvalidAddress(format!("bad port: {value:?}")))?,
                )
            }
            _ => {}
        }
    }

    match transport {
        "unix" => {
            if let Some(path) = path {
                Ok(Address::UnixPath(path))
            } else if let Some(path) = abstract_path {
                Ok(Address::UnixAbstract(path))
            } else {
                Err(Error::InvalidAddress(
                    "unix address needs path= or abstract=".into(),
                ))
            }
        }
        "tcp" => {
            let host = host.ok_or_else(|| Error::InvalidAddress("tcp address needs host=".into()))?;
            let port = port.ok_or_else(|| Error::InvalidAddress("tcp address needs port=".into()))?;
            Ok(Address::Tcp { host, port })
        }
        other => Err(Error::InvalidAddress(format!("unsupported transport: {other:?}"))),
    }
}

/// D-Bus addresses percent-escape characters outside a small safe set.
fn unescape(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::InvalidAddress("truncated percent escape".into()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::InvalidAddress(format!("bad percent escape: %{hex}")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| Error::InvalidAddress("address is not valid UTF-8".into()))
}

/// The well-known fallback address for the session bus, per the
/// `DBUS_SESSION_BUS_ADDRESS` environment variable.
pub fn session_bus_address() -> Result<Vec<Address>> {
    let addr = env::var("DBUS_SESSION_BUS_ADDRESS")
        .map_err(|_| Error::InvalidAddress("DBUS_SESSION_BUS_ADDRESS is not set".into()))?;
    parse_addresses(&addr)
}

/// The system bus's standard, effectively hardcoded address.
pub fn system_bus_address() -> Vec<Address> {
    vec![Address::UnixPath("/var/run/dbus/system_bus_socket".into())]
}
