//! The SASL authentication handshake (C7): line-based exchange that
//! precedes the binary D-Bus protocol on every newly opened connection.
//!
//! Every line in the handshake is US-ASCII terminated by `\r\n`. On Unix
//! domain sockets the client must first send a single NUL byte (carrying
//! the ancillary credentials the server uses for EXTERNAL) before the first
//! `AUTH` line.

use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

#[cfg(test)]
mod tests;

/// A SASL mechanism this crate knows how to drive, tried in the order
/// configured on a [`crate::session::SessionBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Authenticate as the local Unix UID, trusting the kernel-verified
    /// socket credentials.
    External,
    /// Authenticate by proving knowledge of a shared secret stored in
    /// `~/.dbus-keyrings/<context>`.
    CookieSha1,
    /// No authentication at all.
    Anonymous,
}

impl Mechanism {
    fn name(self) -> &'static str {
        match self {
            Mechanism::External => "EXTERNAL",
            Mechanism::CookieSha1 => "DBUS_COOKIE_SHA1",
            Mechanism::Anonymous => "ANONYMOUS",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The default mechanism order: try kernel-verified credentials first, fall
/// back to the shared-secret cookie scheme, and finally no authentication.
pub fn default_mechanisms() -> Vec<Mechanism> {
    vec![Mechanism::External, Mechanism::CookieSha1, Mechanism::Anonymous]
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{:02x}", b).unwrap();
    }
    out
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::AuthFailed("odd-length hex data".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| Error::AuthFailed("invalid hex data".into()))
        })
        .collect()
}

/// Build the initial `AUTH <mechanism> <initial-response>` line for
/// `mechanism`, along with whatever additional local state that mechanism's
/// continuation (if any) will need.
pub fn initial_request(mechanism: Mechanism) -> Result<(String, AuthContinuation)> {
    match mechanism {
        Mechanism::External => {
            let uid = current_uid()?;
            let line = format!("AUTH EXTERNAL {}", hex_encode(uid.to_string().as_bytes()));
            Ok((line, AuthContinuation::None))
        }
        Mechanism::Anonymous => {
            let line = "AUTH ANONYMOUS 7465737420636f6f6b6965".to_string();
            Ok((line, AuthContinuation::None))
        }
        Mechanism::CookieSha1 => {
            let username = current_username()?;
            let line = format!("AUTH DBUS_COOKIE_SHA1 {}", hex_encode(username.as_bytes()));
            Ok((line, AuthContinuation::AwaitingCookieChallenge))
        }
    }
}

/// What additional round trip, if any, a mechanism still owes before the
/// handshake can complete. EXTERNAL and ANONYMOUS finish in one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthContinuation {
    None,
    AwaitingCookieChallenge,
}

/// Given the server's `DATA <hex>` reply to the DBUS_COOKIE_SHA1 initial
/// request, compute the `DATA <hex>` line to answer with.
pub fn answer_cookie_challenge(data_hex: &str) -> Result<String> {
    let challenge = String::from_utf8(hex_decode(data_hex)?)
        .map_err(|_| Error::AuthFailed("cookie challenge was not valid UTF-8".into()))?;

    let mut parts = challenge.splitn(3, ' ');
    let context = parts
        .next()
        .ok_or_else(|| Error::AuthFailed("cookie challenge missing context".into()))?;
    let cookie_id = parts
        .next()
        .ok_or_else(|| Error::AuthFailed("cookie challenge missing cookie id".into()))?;
    let server_challenge = parts
        .next()
        .ok_or_else(|| Error::AuthFailed("cookie challenge missing server challenge".into()))?;

    let cookie = find_cookie(context, cookie_id)?;
    let client_challenge = hex_encode(fresh_nonce().as_bytes());

    let mut hasher = Sha1::new();
    hasher.update(server_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(client_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(cookie.as_bytes());
    let digest = hex_encode(&hasher.finalize());

    let response = format!("{} {}", client_challenge, digest);
    Ok(format!("DATA {}", hex_encode(response.as_bytes())))
}

/// A client challenge nonce: the wall-clock time and our own process id
/// mixed together, which is all the reference client needs either since
/// this value's only job is to not repeat across a handshake.
fn fresh_nonce() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", process::id(), nanos)
}

fn cookie_keyring_dir() -> Result<PathBuf> {
    let home = env::var_os("HOME")
        .ok_or_else(|| Error::AuthFailed("HOME is not set, cannot locate cookie keyring".into()))?;
    Ok(PathBuf::from(home).join(".dbus-keyrings"))
}

/// Look up cookie `id` in the keyring file for `context`, per the
/// `<id> <timestamp> <cookie>` line format.
fn find_cookie(context: &str, id: &str) -> Result<String> {
    let path = cookie_keyring_dir()?.join(context);
    let contents = fs::read_to_string(&path)
        .map_err(|e| Error::AuthFailed(format!("reading cookie file {}: {e}", path.display())))?;

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let line_id = fields.next();
        let _timestamp = fields.next();
        let cookie = fields.next();

        if let (Some(line_id), Some(cookie)) = (line_id, cookie) {
            if line_id == id {
                return Ok(cookie.to_string());
            }
        }
    }

    Err(Error::AuthFailed(format!(
        "no cookie with id {id} in context {context}"
    )))
}

#[cfg(all(unix, feature = "libc"))]
fn current_uid() -> Result<u32> {
    Ok(unsafe { libc::getuid() })
}

#[cfg(not(all(unix, feature = "libc")))]
fn current_uid() -> Result<u32> {
    Err(Error::AuthFailed(
        "EXTERNAL authentication requires the \"libc\" feature on unix".into(),
    ))
}

fn current_username() -> Result<String> {
    if let Ok(user) = env::var("USER") {
        return Ok(user);
    }
    if let Ok(user) = env::var("LOGNAME") {
        return Ok(user);
    }
    Err(Error::AuthFailed(
        "could not determine the local username for DBUS_COOKIE_SHA1".into(),
    ))
}

/// The outcome of processing one line from the server during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// `OK <guid>`: authentication succeeded.
    Ok { guid: String },
    /// `REJECTED <mechanisms...>`: try the next configured mechanism.
    Rejected { mechanisms: Vec<String> },
    /// `DATA <hex>`: a mechanism-specific continuation is required.
    Data { hex: String },
    /// `ERROR <message>`: malformed request; the client may retry.
    Error { message: String },
}

/// Parse one line (without its trailing `\r\n`) sent by the server.
pub fn parse_server_line(line: &str) -> Result<ServerLine> {
    let mut parts = line.splitn(2, ' ');
    let verb = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    match verb {
        "OK" => Ok(ServerLine::Ok { guid: rest.trim().to_string() }),
        "REJECTED" => Ok(ServerLine::Rejected {
            mechanisms: rest.split_whitespace().map(str::to_string).collect(),
        }),
        "DATA" => Ok(ServerLine::Data { hex: rest.trim().to_string() }),
        "ERROR" => Ok(ServerLine::Error { message: rest.trim().to_string() }),
        _ => Err(Error::AuthFailed(format!("unexpected server line: {line:?}"))),
    }
}

/// The line sent once the handshake has produced an `OK`, before the
/// connection switches to the binary protocol.
pub const BEGIN_LINE: &str = "BEGIN";

/// Sent right after `OK` when the transport supports passing file
/// descriptors, before `BEGIN`.
pub const NEGOTIATE_UNIX_FD_LINE: &str = "NEGOTIATE_UNIX_FD";
