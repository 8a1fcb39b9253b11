//! Framed, authenticated connections to a message bus or peer (C8).
//!
//! A [`Connection`] owns a duplex byte stream — a Unix socket or a TCP
//! socket — and drives it through the SASL line protocol, then switches to
//! framing whole D-Bus messages. Unlike the teacher's blocking
//! `std::os::unix::net::UnixStream`-only connection, this one is generic
//! over any `AsyncRead + AsyncWrite` stream so the session layer can run
//! over Unix or TCP transports without duplicating the framing logic.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use crate::address::{self, Address};
use crate::buf::{MAX_ARRAY_LENGTH, MAX_BODY_LENGTH};
use crate::error::{Error, Result};
use crate::message::{marshall_message, unmarshall_message, Message};
use crate::sasl::{self, AuthContinuation, Mechanism, ServerLine};
use crate::unmarshal::UnmarshallOptions;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Sasl,
    Idle,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Sasl => write!(f, "sasl"),
            ConnectionState::Idle => write!(f, "idle"),
        }
    }
}

/// An authenticated, message-framed connection over any duplex byte stream.
pub struct Connection<T> {
    stream: T,
    state: ConnectionState,
    /// Bytes read from the stream but not yet consumed: carries leftover
    /// SASL-line bytes into the first binary read, and leftover binary
    /// bytes between messages.
    recv_buf: Vec<u8>,
    recv_pos: usize,
    options: UnmarshallOptions,
}

impl Connection<UnixStream> {
    /// Connect and authenticate against the session bus named by
    /// `DBUS_SESSION_BUS_ADDRESS`.
    pub async fn session_bus(mechanisms: &[Mechanism]) -> Result<Self> {
        let addresses = address::session_bus_address()?;
        Self::connect_unix(&addresses, mechanisms).await
    }

    /// Connect and authenticate against the system bus.
    pub async fn system_bus(mechanisms: &[Mechanism]) -> Result<Self> {
        let addresses = address::system_bus_address();
        Self::connect_unix(&addresses, mechanisms).await
    }

    async fn connect_unix(addresses: &[Address], mechanisms: &[Mechanism]) -> Result<Self> {
        for addr in addresses {
            if let Address::UnixPath(path) = addr {
                let stream = UnixStream::connect(path).await?;
                return Connection::from_stream(stream, mechanisms).await;
            }
        }

        Err(Error::InvalidAddress(
            "no supported unix transport in address list".into(),
        ))
    }
}

impl Connection<TcpStream> {
    /// Connect and authenticate over TCP, the transport used mainly for
    /// testing and for buses exposed across a network boundary.
    pub async fn connect_tcp(host: &str, port: u16, mechanisms: &[Mechanism]) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Connection::from_stream(stream, mechanisms).await
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-open stream and run the SASL handshake over it, using
    /// the default unmarshal options.
    pub async fn from_stream(stream: T, mechanisms: &[Mechanism]) -> Result<Self> {
        Self::from_stream_with_options(stream, mechanisms, UnmarshallOptions::default()).await
    }

    /// Like [`Self::from_stream`], with explicit control over how values are
    /// decoded on the way in.
    pub async fn from_stream_with_options(
        stream: T,
        mechanisms: &[Mechanism],
        options: UnmarshallOptions,
    ) -> Result<Self> {
        let mut conn = Connection {
            stream,
            state: ConnectionState::Sasl,
            recv_buf: Vec::new(),
            recv_pos: 0,
            options,
        };
        conn.handshake(mechanisms).await?;
        Ok(conn)
    }

    async fn handshake(&mut self, mechanisms: &[Mechanism]) -> Result<()> {
        self.stream.write_all(b"\0").await?;

        let mechanisms: Vec<Mechanism> = if mechanisms.is_empty() {
            sasl::default_mechanisms()
        } else {
            mechanisms.to_vec()
        };

        let mut tried = Vec::new();

        for mechanism in mechanisms {
            tried.push(mechanism.to_string());
            let (line, continuation) = sasl::initial_request(mechanism)?;
            self.send_line(&line).await?;

            let reply = self.recv_line().await?;
            let mut reply = sasl::parse_server_line(&reply)?;

            if let (ServerLine::Data { hex }, AuthContinuation::AwaitingCookieChallenge) =
                (&reply, continuation)
            {
                let answer = sasl::answer_cookie_challenge(hex)?;
                self.send_line(&answer).await?;
                reply = sasl::parse_server_line(&self.recv_line().await?)?;
            }

            match reply {
                ServerLine::Ok { .. } => {
                    self.send_line(sasl::BEGIN_LINE).await?;
                    self.state = ConnectionState::Idle;
                    return Ok(());
                }
                ServerLine::Rejected { .. } => continue,
                ServerLine::Error { message } => {
                    return Err(Error::AuthFailed(format!("server reported: {message}")))
                }
                ServerLine::Data { .. } => {
                    return Err(Error::AuthFailed(
                        "unexpected DATA continuation outside DBUS_COOKIE_SHA1".into(),
                    ))
                }
            }
        }

        Err(Error::AuthFailed(format!(
            "no configured mechanism was accepted (tried: {})",
            tried.join(", ")
        )))
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.recv_buf[self.recv_pos..]
                .windows(2)
                .position(|w| w == b"\r\n")
            {
                let start = self.recv_pos;
                let end = start + pos;
                let line = std::str::from_utf8(&self.recv_buf[start..end])
                    .map_err(|_| Error::AuthFailed("SASL line was not valid UTF-8".into()))?
                    .to_string();
                self.recv_pos = end + 2;
                self.compact_recv_buf();
                return Ok(line);
            }

            if !self.fill_recv_buf().await? {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Reads more bytes into `recv_buf`. Returns `false` on a clean EOF,
    /// leaving it to the caller to decide whether that EOF is expected
    /// (between SASL lines or messages) or a truncation.
    async fn fill_recv_buf(&mut self) -> Result<bool> {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        self.recv_buf.extend_from_slice(&chunk[..n]);
        Ok(true)
    }

    fn compact_recv_buf(&mut self) {
        if self.recv_pos > 0 {
            self.recv_buf.drain(..self.recv_pos);
            self.recv_pos = 0;
        }
    }

    /// Reads exactly `n` bytes. An EOF after some, but not all, of those
    /// bytes have arrived means a frame was cut off mid-flight, which is
    /// distinct from the peer cleanly closing the connection between
    /// frames.
    async fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let have_at_start = self.recv_buf.len() - self.recv_pos;

        while self.recv_buf.len() - self.recv_pos < n {
            if !self.fill_recv_buf().await? {
                let have = self.recv_buf.len() - self.recv_pos;
                return if have > 0 || have_at_start > 0 {
                    Err(Error::ShortRead(format!(
                        "connection closed after {have} of {n} expected bytes"
                    )))
                } else {
                    Err(Error::ConnectionClosed)
                };
            }
        }

        let out = self.recv_buf[self.recv_pos..self.recv_pos + n].to_vec();
        self.recv_pos += n;
        self.compact_recv_buf();
        Ok(out)
    }

    /// Marshal and send a single message.
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        if self.state != ConnectionState::Idle {
            return Err(Error::InvalidMessage(format!(
                "cannot send a message while connection is {}",
                self.state
            )));
        }

        let bytes = marshall_message(message)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive and decode the next whole message, blocking until a complete
    /// frame has arrived.
    pub async fn recv_message(&mut self) -> Result<Message> {
        if self.state != ConnectionState::Idle {
            return Err(Error::InvalidMessage(format!(
                "cannot receive a message while connection is {}",
                self.state
            )));
        }

        let prefix = self.recv_exact(16).await?;

        let endianness = crate::protocol::Endianness::from_byte(prefix[0])
            .ok_or_else(|| Error::InvalidMessage("unknown endianness byte".into()))?;
        let read_u32 = |bytes: [u8; 4]| match endianness {
            crate::protocol::Endianness::Little => u32::from_le_bytes(bytes),
            crate::protocol::Endianness::Big => u32::from_be_bytes(bytes),
        };

        let body_length = read_u32(prefix[4..8].try_into().unwrap());
        let headers = read_u32(prefix[12..16].try_into().unwrap());

        if body_length > MAX_BODY_LENGTH {
            return Err(Error::InvalidMessage("body exceeds the maximum length".into()));
        }
        if headers > MAX_ARRAY_LENGTH {
            return Err(Error::InvalidMessage(
                "header field array exceeds the maximum length".into(),
            ));
        }

        let rest_len = crate::message::header_and_body_len(headers, body_length)
            .map_err(Error::Unmarshall)?;
        let rest = self.recv_exact(rest_len).await?;

        let mut frame = Vec::with_capacity(16 + rest.len());
        frame.extend_from_slice(&prefix);
        frame.extend_from_slice(&rest);

        unmarshall_message(&frame, &self.options)
    }
}
