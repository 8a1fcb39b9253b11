//! The session engine (C9): serial allocation, pending method-call
//! resolution, signal dispatch and name/match-rule bookkeeping layered on
//! top of a single authenticated [`Connection`].
//!
//! A [`Session`] owns the connection privately; all public interaction goes
//! through a cloneable [`SessionHandle`] backed by a background task that
//! owns the actual socket, so multiple in-flight calls and signal
//! subscriptions can share one connection the way a real bus client does.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::address;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::message::{Message, MessageKind};
use crate::sasl::Mechanism;
use crate::unmarshal::UnmarshallOptions;
use crate::value::Value;

#[cfg(test)]
mod tests;

const ORG_FREEDESKTOP_DBUS: &str = "org.freedesktop.DBus";
const ORG_FREEDESKTOP_DBUS_PATH: &str = "/org/freedesktop/DBus";

/// Configuration for opening a [`Session`], mirroring the knobs the wire
/// codec exposes through [`UnmarshallOptions`] plus the handshake's
/// mechanism order and transport target.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    bus_address: Option<String>,
    mechanisms: Vec<Mechanism>,
    byte_arrays_as_buffers: bool,
    preserve_large_integers: bool,
    direct_peer: bool,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        SessionBuilder {
            bus_address: None,
            mechanisms: Vec::new(),
            byte_arrays_as_buffers: true,
            preserve_large_integers: false,
            direct_peer: false,
        }
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the bus address instead of reading it from the environment.
    pub fn bus_address(mut self, address: impl Into<String>) -> Self {
        self.bus_address = Some(address.into());
        self
    }

    /// Set the SASL mechanisms to try, in order. Defaults to
    /// [`crate::sasl::default_mechanisms`].
    pub fn mechanisms(mut self, mechanisms: Vec<Mechanism>) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Decode `ay` values as contiguous buffers. Default `true`.
    pub fn byte_arrays_as_buffers(mut self, value: bool) -> Self {
        self.byte_arrays_as_buffers = value;
        self
    }

    /// Always widen 64-bit integers to their `Big` representation on
    /// decode. Default `false`.
    pub fn preserve_large_integers(mut self, value: bool) -> Self {
        self.preserve_large_integers = value;
        self
    }

    /// Skip the `Hello` handshake and name-acquisition dance, for
    /// connecting directly to a peer rather than a bus daemon.
    pub fn direct_peer(mut self, value: bool) -> Self {
        self.direct_peer = value;
        self
    }

    /// Connect to the session bus.
    pub async fn connect_session_bus(self) -> Result<SessionHandle> {
        let addresses = match &self.bus_address {
            Some(addr) => address::parse_addresses(addr)?,
            None => address::session_bus_address()?,
        };
        self.connect(addresses).await
    }

    /// Connect to the system bus.
    pub async fn connect_system_bus(self) -> Result<SessionHandle> {
        let addresses = match &self.bus_address {
            Some(addr) => address::parse_addresses(addr)?,
            None => address::system_bus_address(),
        };
        self.connect(addresses).await
    }

    async fn connect(self, addresses: Vec<address::Address>) -> Result<SessionHandle> {
        let options = UnmarshallOptions {
            byte_arrays_as_buffers: self.byte_arrays_as_buffers,
            preserve_large_integers: self.preserve_large_integers,
        };

        let transport = Transport::connect(&addresses, &self.mechanisms, options).await?;

        let handle = Session::spawn(transport);

        if !self.direct_peer {
            handle.hello().await?;
        }

        Ok(handle)
    }
}

enum Transport {
    Unix(Connection<UnixStream>),
    Tcp(Connection<TcpStream>),
}

impl Transport {
    async fn connect(
        addresses: &[address::Address],
        mechanisms: &[Mechanism],
        options: UnmarshallOptions,
    ) -> Result<Self> {
        for addr in addresses {
            match addr {
                address::Address::UnixPath(path) => {
                    let stream = UnixStream::connect(path).await?;
                    return Ok(Transport::Unix(
                        Connection::from_stream_with_options(stream, mechanisms, options).await?,
                    ));
                }
                address::Address::Tcp { host, port } => {
                    let stream = TcpStream::connect((host.as_str(), *port)).await?;
                    return Ok(Transport::Tcp(
                        Connection::from_stream_with_options(stream, mechanisms, options).await?,
                    ));
                }
                address::Address::UnixAbstract(_) => continue,
            }
        }

        Err(Error::InvalidAddress(
            "no address in the list uses a supported transport".into(),
        ))
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        match self {
            Transport::Unix(conn) => conn.send_message(msg).await,
            Transport::Tcp(conn) => conn.send_message(msg).await,
        }
    }

    async fn recv(&mut self) -> Result<Message> {
        match self {
            Transport::Unix(conn) => conn.recv_message().await,
            Transport::Tcp(conn) => conn.recv_message().await,
        }
    }
}

/// A subscription to a stream of matching signals; dropping it releases the
/// underlying match rule once no other subscription needs it.
pub struct SignalStream {
    rx: mpsc::UnboundedReceiver<Message>,
    key: MatchKey,
    handle: SessionHandle,
}

impl SignalStream {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for SignalStream {
    fn drop(&mut self) {
        self.handle.release_match(self.key.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    path: Option<String>,
    interface: Option<String>,
    member: Option<String>,
}

impl MatchKey {
    fn to_match_rule(&self) -> String {
        let mut parts = vec!["type='signal'".to_string()];
        if let Some(path) = &self.path {
            parts.push(format!("path='{path}'"));
        }
        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{interface}'"));
        }
        if let Some(member) = &self.member {
            parts.push(format!("member='{member}'"));
        }
        parts.join(",")
    }

    fn matches(&self, msg: &Message) -> bool {
        self.path.as_deref().map_or(true, |p| msg.path.as_deref() == Some(p))
            && self
                .interface
                .as_deref()
                .map_or(true, |i| msg.interface.as_deref() == Some(i))
            && self
                .member
                .as_deref()
                .map_or(true, |m| msg.member.as_deref() == Some(m))
    }
}

enum Command {
    Send {
        message: Message,
        reply: Option<oneshot::Sender<Result<Message>>>,
    },
    Subscribe {
        key: MatchKey,
        tx: mpsc::UnboundedSender<Message>,
        /// Whether this was the 0->1 transition for `key`'s refcount, i.e.
        /// whether the caller must emit a broker `AddMatch`.
        reply: oneshot::Sender<Result<bool>>,
    },
    Unsubscribe {
        key: MatchKey,
        /// Whether this was the 1->0 transition, i.e. whether the caller
        /// must emit a broker `RemoveMatch`.
        reply: oneshot::Sender<bool>,
    },
    TakeIncomingCalls {
        reply: oneshot::Sender<Result<mpsc::UnboundedReceiver<Message>>>,
    },
}

struct Inner {
    next_serial: AtomicU32,
    pending: Mutex<HashMap<NonZeroU32, oneshot::Sender<Result<Message>>>>,
    signal_routes: Mutex<HashMap<MatchKey, (u32, mpsc::UnboundedSender<Message>)>>,
}

impl Inner {
    fn alloc_serial(&self) -> NonZeroU32 {
        loop {
            let n = self.next_serial.fetch_add(1, Ordering::Relaxed);
            if let Some(n) = NonZeroU32::new(n) {
                return n;
            }
        }
    }
}

/// A running session: a connection plus the background task driving it.
/// Use [`Session::spawn`] to start one; interact through the returned
/// [`SessionHandle`].
pub struct Session;

impl Session {
    fn spawn(mut transport: Transport) -> SessionHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();

        let inner = Arc::new(Inner {
            next_serial: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            signal_routes: Mutex::new(HashMap::new()),
        });

        let task_inner = inner.clone();

        tokio::spawn(async move {
            let mut incoming_calls_tx: Option<mpsc::UnboundedSender<Message>> = None;

            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(Command::Send { message, reply }) => {
                                if let Some(reply) = reply {
                                    task_inner.pending.lock().await.insert(message.serial, reply);
                                }
                                if let Err(err) = transport.send(&message).await {
                                    warn!("failed to send message: {err}");
                                    if let Some(tx) = task_inner.pending.lock().await.remove(&message.serial) {
                                        let _ = tx.send(Err(Error::ConnectionClosed));
                                    }
                                }
                            }
                            Some(Command::Subscribe { key, tx, reply }) => {
                                let mut routes = task_inner.signal_routes.lock().await;
                                let is_first = match routes.get_mut(&key) {
                                    Some((count, _)) => {
                                        *count += 1;
                                        false
                                    }
                                    None => {
                                        routes.insert(key, (1, tx));
                                        true
                                    }
                                };
                                let _ = reply.send(Ok(is_first));
                            }
                            Some(Command::Unsubscribe { key, reply }) => {
                                let mut routes = task_inner.signal_routes.lock().await;
                                let is_last = match routes.get_mut(&key) {
                                    Some((count, _)) => {
                                        *count -= 1;
                                        let last = *count == 0;
                                        if last {
                                            routes.remove(&key);
                                        }
                                        last
                                    }
                                    None => false,
                                };
                                let _ = reply.send(is_last);
                            }
                            Some(Command::TakeIncomingCalls { reply }) => {
                                if incoming_calls_tx.is_some() {
                                    let _ = reply.send(Err(Error::InvalidMessage(
                                        "incoming call channel was already taken".into(),
                                    )));
                                } else {
                                    let (tx, rx) = mpsc::unbounded_channel();
                                    incoming_calls_tx = Some(tx);
                                    let _ = reply.send(Ok(rx));
                                }
                            }
                            None => break,
                        }
                    }
                    msg = transport.recv() => {
                        match msg {
                            Ok(message) => dispatch_incoming(&task_inner, &incoming_calls_tx, message).await,
                            Err(err) => {
                                debug!("connection closed: {err}");
                                break;
                            }
                        }
                    }
                }
            }

            trace!("session task exiting");
        });

        SessionHandle { cmd_tx, inner }
    }
}

async fn dispatch_incoming(
    inner: &Arc<Inner>,
    incoming_calls_tx: &Option<mpsc::UnboundedSender<Message>>,
    message: Message,
) {
    let Ok(kind) = message.kind() else {
        warn!("dropping structurally invalid incoming message");
        return;
    };

    match kind {
        MessageKind::MethodReturn { reply_serial } | MessageKind::Error { reply_serial, .. } => {
            if let Some(tx) = inner.pending.lock().await.remove(&reply_serial) {
                let result = match message.kind() {
                    Ok(MessageKind::Error { error_name, .. }) => {
                        let text = message
                            .body
                            .first()
                            .and_then(|v| match v {
                                Value::Str(s) => Some(s.clone()),
                                _ => None,
                            })
                            .unwrap_or_default();
                        Err(Error::dbus(error_name, text))
                    }
                    _ => Ok(message),
                };
                let _ = tx.send(result);
            }
        }
        MessageKind::Signal { .. } => {
            let routes = inner.signal_routes.lock().await;
            for (key, (_, tx)) in routes.iter() {
                if key.matches(&message) {
                    let _ = tx.send(message.clone());
                }
            }
        }
        MessageKind::MethodCall { .. } => {
            if let Some(tx) = incoming_calls_tx {
                let _ = tx.send(message);
            }
        }
    }
}

/// A cheaply cloneable reference to a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Allocate the next outgoing serial number.
    pub fn next_serial(&self) -> NonZeroU32 {
        self.inner.alloc_serial()
    }

    /// Send a message with no reply expected (a signal, or a method call
    /// with the `NO_REPLY_EXPECTED` flag set).
    pub async fn send(&self, message: Message) -> Result<()> {
        self.cmd_tx
            .send(Command::Send { message, reply: None })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Send a method call and wait for its matching method-return or error.
    pub async fn call(&self, message: Message) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send { message, reply: Some(tx) })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Subscribe to signals matching the given (optional) path, interface
    /// and member. `None` fields act as wildcards.
    pub async fn subscribe(
        &self,
        path: Option<String>,
        interface: Option<String>,
        member: Option<String>,
    ) -> Result<SignalStream> {
        let key = MatchKey { path, interface, member };
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Subscribe { key: key.clone(), tx, reply: reply_tx })
            .map_err(|_| Error::ConnectionClosed)?;
        let is_first = reply_rx.await.map_err(|_| Error::ConnectionClosed)??;

        // Only the 0->1 transition needs a broker AddMatch; later
        // subscribers to the same rule ride along on the first one.
        if is_first {
            let add_match =
                Message::method_call(ORG_FREEDESKTOP_DBUS_PATH, "AddMatch", self.next_serial())
                    .with_destination(ORG_FREEDESKTOP_DBUS)
                    .with_interface(ORG_FREEDESKTOP_DBUS)
                    .with_body("s", vec![Value::Str(key.to_match_rule())]);
            self.call(add_match).await?;
        }

        Ok(SignalStream { rx, key, handle: self.clone() })
    }

    fn release_match(&self, key: MatchKey) {
        let handle = self.clone();
        tokio::spawn(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .cmd_tx
                .send(Command::Unsubscribe { key: key.clone(), reply: reply_tx })
                .is_err()
            {
                return;
            }

            // Only the 1->0 transition needs a broker RemoveMatch.
            if reply_rx.await.unwrap_or(false) {
                let remove_match = Message::method_call(
                    ORG_FREEDESKTOP_DBUS_PATH,
                    "RemoveMatch",
                    handle.next_serial(),
                )
                .with_destination(ORG_FREEDESKTOP_DBUS)
                .with_interface(ORG_FREEDESKTOP_DBUS)
                .with_body("s", vec![Value::Str(key.to_match_rule())]);
                let _ = handle.call(remove_match).await;
            }
        });
    }

    /// Receive the channel of method calls addressed to this connection
    /// that no route has claimed yet; used by [`crate::service`] to serve
    /// exported objects. May only be taken once.
    pub async fn take_incoming_calls(&self) -> Result<mpsc::UnboundedReceiver<Message>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::TakeIncomingCalls { reply })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Perform the `org.freedesktop.DBus.Hello` call every bus client must
    /// make before anything else, learning its unique connection name.
    pub async fn hello(&self) -> Result<String> {
        let hello = Message::method_call(ORG_FREEDESKTOP_DBUS_PATH, "Hello", self.next_serial())
            .with_destination(ORG_FREEDESKTOP_DBUS)
            .with_interface(ORG_FREEDESKTOP_DBUS);

        let reply = self.call(hello).await?;
        match reply.body.first() {
            Some(Value::Str(name)) => Ok(name.clone()),
            _ => Err(Error::InvalidMessage("Hello did not return a unique name".into())),
        }
    }

    /// Request ownership of a well-known bus name.
    pub async fn request_name(
        &self,
        name: impl Into<String>,
        flags: u32,
    ) -> Result<RequestNameReply> {
        let msg = Message::method_call(ORG_FREEDESKTOP_DBUS_PATH, "RequestName", self.next_serial())
            .with_destination(ORG_FREEDESKTOP_DBUS)
            .with_interface(ORG_FREEDESKTOP_DBUS)
            .with_body("su", vec![Value::Str(name.into()), Value::Uint32(flags)]);

        let reply = self.call(msg).await?;
        match reply.body.first() {
            Some(Value::Uint32(code)) => RequestNameReply::from_code(*code),
            _ => Err(Error::InvalidMessage("RequestName did not return a result code".into())),
        }
    }

    /// Release a previously acquired well-known bus name.
    pub async fn release_name(&self, name: impl Into<String>) -> Result<ReleaseNameReply> {
        let msg = Message::method_call(ORG_FREEDESKTOP_DBUS_PATH, "ReleaseName", self.next_serial())
            .with_destination(ORG_FREEDESKTOP_DBUS)
            .with_interface(ORG_FREEDESKTOP_DBUS)
            .with_body("s", vec![Value::Str(name.into())]);

        let reply = self.call(msg).await?;
        match reply.body.first() {
            Some(Value::Uint32(code)) => ReleaseNameReply::from_code(*code),
            _ => Err(Error::InvalidMessage("ReleaseName did not return a result code".into())),
        }
    }
}

/// The broker's reply to `org.freedesktop.DBus.RequestName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

impl RequestNameReply {
    fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(RequestNameReply::PrimaryOwner),
            2 => Ok(RequestNameReply::InQueue),
            3 => Ok(RequestNameReply::Exists),
            4 => Ok(RequestNameReply::AlreadyOwner),
            other => Err(Error::InvalidMessage(format!(
                "unknown RequestName reply code: {other}"
            ))),
        }
    }
}

/// The broker's reply to `org.freedesktop.DBus.ReleaseName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseNameReply {
    Released,
    NonExistent,
    NotOwner,
}

impl ReleaseNameReply {
    fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(ReleaseNameReply::Released),
            2 => Ok(ReleaseNameReply::NonExistent),
            3 => Ok(ReleaseNameReply::NotOwner),
            other => Err(Error::InvalidMessage(format!(
                "unknown ReleaseName reply code: {other}"
            ))),
        }
    }
}
