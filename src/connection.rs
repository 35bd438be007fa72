//! Connection handle, events and response futures.
//!
//! A [`Connection`] is a thin handle: every operation is forwarded to the
//! [`Reactor`](crate::Reactor) that owns the connection's state, so the
//! handle can be cloned freely and used from any task.
//!
//! # Example
//!
//! ```ignore
//! let conn = Connection::to_addr(&reactor, "tcp://127.0.0.1:7000".parse()?);
//! let mut events = conn.events()?;
//! conn.start()?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ConnectionEvent::Connected = event {
//!         let reply = conn.request(1, &"ping").with_timeout(Duration::from_secs(1)).await?;
//!         println!("{}", reply.decode::<String>()?);
//!         break;
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::codec::MsgPackCodec;
use crate::discovery::{Discovery, ServiceRecord};
use crate::error::{Result, WirelinkError};
use crate::protocol::{
    is_allocated_tag, Frame, Header, RESERVED_TAG, TAG_SEED,
};
use crate::reactor::{Op, Reactor, Target};
use crate::transport::{PeerAddr, TransportStream};
use crate::writer::OutboundFrame;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection lifecycle state. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Resolving = 1,
    Connecting = 2,
    Connected = 3,
    Disconnected = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Resolving,
            2 => ConnectionState::Connecting,
            3 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Disconnected
    }
}

/// Who a connection talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerIdentity {
    /// Known address.
    Host(PeerAddr),
    /// Named service, resolved at start.
    Service(ServiceRecord),
    /// Stream accepted by a listener; carries the peer label.
    Accepted(String),
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerIdentity::Host(addr) => write!(f, "{}", addr),
            PeerIdentity::Service(record) => write!(f, "service {}", record),
            PeerIdentity::Accepted(peer) => write!(f, "accepted {}", peer),
        }
    }
}

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: u32,
    pub tag: u32,
    pub message_type: u16,
    pub body: Bytes,
}

impl Message {
    /// Decode the MsgPack body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.body)
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Self {
            command: frame.header.command,
            tag: frame.header.tag,
            message_type: frame.header.message_type,
            body: frame.body,
        }
    }
}

/// Events emitted by a connection, in the order they happen.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    /// A frame that did not answer one of our requests.
    Received(Message),
    /// The frame with this tag has been written to the transport.
    Sent { tag: u32 },
    /// Always followed by `Disconnected` when the error is fatal.
    Failed(WirelinkError),
}

/// Receives connection events on the reactor task.
///
/// Implementations must not block; use the handle's methods (which only
/// queue work) to react.
pub trait ConnectionListener: Send + Sync + 'static {
    fn on_event(&self, connection: &Connection, event: &ConnectionEvent);
}

impl<F> ConnectionListener for F
where
    F: Fn(&Connection, &ConnectionEvent) + Send + Sync + 'static,
{
    fn on_event(&self, connection: &Connection, event: &ConnectionEvent) {
        self(connection, event)
    }
}

/// Event stream returned by [`Connection::events`].
pub type EventStream = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Single-shot response callback.
pub(crate) type ResponseCallback = Box<dyn FnOnce(Result<Message>) + Send>;

struct Shared {
    id: ConnectionId,
    identity: PeerIdentity,
    state: AtomicU8,
    next_tag: AtomicU32,
    max_body_size: u32,
    ops: mpsc::UnboundedSender<Op>,
}

/// Shared by the handles given out by the constructors. Dropping the last
/// one releases the connection if it was never started and has no set.
struct HandleGuard {
    id: ConnectionId,
    ops: mpsc::UnboundedSender<Op>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let _ = self.ops.send(Op::Release(self.id));
    }
}

/// Handle to one peer link.
///
/// A connection that is never started and never added to a set is
/// cancelled once every handle returned by its constructor is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
    guard: Option<Arc<HandleGuard>>,
}

impl Connection {
    /// Reactor-side handle. Holding it does not keep an idle connection
    /// registered.
    pub(crate) fn new(
        ops: mpsc::UnboundedSender<Op>,
        identity: PeerIdentity,
        max_body_size: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                id: ConnectionId::next(),
                identity,
                state: AtomicU8::new(ConnectionState::Idle as u8),
                next_tag: AtomicU32::new(TAG_SEED),
                max_body_size,
                ops,
            }),
            guard: None,
        }
    }

    fn create(reactor: &Reactor, identity: PeerIdentity, target: Target) -> Self {
        let mut conn = Self::new(reactor.sender(), identity, reactor.config().max_body_size);
        let registered = reactor.submit(Op::Register {
            conn: conn.clone(),
            target,
        });
        if registered.is_err() {
            conn.mirror_state(ConnectionState::Disconnected);
        }
        conn.guard = Some(Arc::new(HandleGuard {
            id: conn.id(),
            ops: reactor.sender(),
        }));
        conn
    }

    /// Connection to a known address.
    pub fn to_addr(reactor: &Reactor, addr: PeerAddr) -> Self {
        Self::create(reactor, PeerIdentity::Host(addr.clone()), Target::Addr(addr))
    }

    /// Connection to a named service, resolved through `discovery` at start.
    pub fn to_service(
        reactor: &Reactor,
        record: ServiceRecord,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        Self::create(
            reactor,
            PeerIdentity::Service(record.clone()),
            Target::Service(record, discovery),
        )
    }

    /// Connection over an already established stream.
    pub fn from_stream(reactor: &Reactor, stream: TransportStream) -> Self {
        Self::create(
            reactor,
            PeerIdentity::Accepted(stream.peer().to_string()),
            Target::Stream(stream),
        )
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    #[inline]
    pub fn identity(&self) -> &PeerIdentity {
        &self.inner.identity
    }

    /// Current state as last published by the reactor.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub(crate) fn mirror_state(&self, state: ConnectionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn submit(&self, op: Op) -> Result<()> {
        self.inner
            .ops
            .send(op)
            .map_err(|_| WirelinkError::ReactorClosed)
    }

    /// Begin resolving/connecting. Only the first call has an effect.
    pub fn start(&self) -> Result<()> {
        self.submit(Op::Start(self.id()))
    }

    /// Tear the connection down. Idempotent.
    pub fn cancel(&self) {
        let _ = self.submit(Op::Cancel(self.id()));
    }

    /// Register a listener. Listeners run in registration order.
    pub fn subscribe<L: ConnectionListener>(&self, listener: L) -> Result<()> {
        self.submit(Op::Subscribe {
            id: self.id(),
            listener: Arc::new(listener),
        })
    }

    /// Stream of this connection's events. The stream ends after
    /// `Disconnected`.
    pub fn events(&self) -> Result<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |_: &Connection, event: &ConnectionEvent| {
            let _ = tx.send(event.clone());
        })?;
        Ok(rx)
    }

    /// Fire-and-forget send with an application tag below the allocated
    /// range.
    pub fn send<T: Serialize>(&self, command: u32, tag: u32, value: &T) -> Result<()> {
        self.send_raw(command, tag, MsgPackCodec::encode_body(value)?)
    }

    /// Fire-and-forget send of an already encoded body.
    pub fn send_raw(&self, command: u32, tag: u32, body: Bytes) -> Result<()> {
        if tag == RESERVED_TAG || is_allocated_tag(tag) {
            return Err(WirelinkError::ReservedTag(tag));
        }
        self.write(command, tag, body, None)
    }

    /// Send an object with command 0 and tag 0.
    pub fn send_object<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send(0, 0, value)
    }

    /// Reply to an inbound message, reusing its tag.
    pub fn respond<T: Serialize>(&self, tag: u32, command: u32, value: &T) -> Result<()> {
        self.respond_raw(tag, command, MsgPackCodec::encode_body(value)?)
    }

    pub fn respond_raw(&self, tag: u32, command: u32, body: Bytes) -> Result<()> {
        if tag == RESERVED_TAG {
            return Err(WirelinkError::ReservedTag(tag));
        }
        self.write(command, tag, body, None)
    }

    /// Send and register `on_response` for the reply.
    ///
    /// Returns the allocated tag. `on_response` runs exactly once if the
    /// reply arrives or the connection ends first. If the peer never
    /// answers and the connection stays up it never runs; pair it with a
    /// timeout (see [`request`](Self::request)).
    pub fn send_with_response<T, F>(&self, command: u32, value: &T, on_response: F) -> Result<u32>
    where
        T: Serialize,
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        self.send_raw_with_response(command, MsgPackCodec::encode_body(value)?, on_response)
    }

    pub fn send_raw_with_response<F>(&self, command: u32, body: Bytes, on_response: F) -> Result<u32>
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        let tag = self.allocate_tag();
        self.write(command, tag, body, Some(Box::new(on_response)))?;
        Ok(tag)
    }

    /// Send and await the reply as a future.
    pub fn request<T: Serialize>(&self, command: u32, value: &T) -> PendingResponse {
        match MsgPackCodec::encode_body(value) {
            Ok(body) => self.request_raw(command, body),
            Err(e) => PendingResponse::failed(e),
        }
    }

    pub fn request_raw(&self, command: u32, body: Bytes) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        match self.send_raw_with_response(command, body, move |result| {
            let _ = tx.send(result);
        }) {
            Ok(tag) => PendingResponse { tag: Some(tag), rx },
            Err(e) => PendingResponse::failed(e),
        }
    }

    fn write(
        &self,
        command: u32,
        tag: u32,
        body: Bytes,
        reply: Option<ResponseCallback>,
    ) -> Result<()> {
        let length = u32::try_from(body.len()).map_err(|_| {
            WirelinkError::MalformedHeader(format!("body of {} bytes is too large", body.len()))
        })?;
        let header = Header::object(command, tag, length);
        header.validate(self.inner.max_body_size)?;

        if !self.is_connected() {
            return Err(WirelinkError::NotConnected);
        }

        self.submit(Op::Send {
            id: self.id(),
            frame: OutboundFrame::new(&header, body),
            reply,
        })
    }

    /// Next correlation tag: starts at `TAG_SEED`, skips `RESERVED_TAG` and
    /// wraps back to `TAG_SEED`.
    ///
    /// Tags are not checked against the pending table here. After a wrap, a
    /// request whose tag is still awaiting its reply fails with
    /// `ReservedTag` instead of moving on to a free tag.
    fn allocate_tag(&self) -> u32 {
        let previous = self
            .inner
            .next_tag
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |tag| {
                if tag >= RESERVED_TAG - 1 {
                    Some(TAG_SEED)
                } else {
                    Some(tag + 1)
                }
            });
        previous.unwrap_or_else(|tag| tag)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("identity", self.identity())
            .field("state", &self.state())
            .finish()
    }
}

/// Future resolving to the reply of a [`Connection::request`].
///
/// Dropping it does not unregister the tag; a late reply is discarded.
pub struct PendingResponse {
    tag: Option<u32>,
    rx: oneshot::Receiver<Result<Message>>,
}

impl PendingResponse {
    fn failed(error: WirelinkError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { tag: None, rx }
    }

    /// The allocated tag, or `None` if the request was never sent.
    pub fn tag(&self) -> Option<u32> {
        self.tag
    }

    /// Await the reply for at most `limit`.
    pub async fn with_timeout(self, limit: Duration) -> Result<Message> {
        match tokio::time::timeout(limit, self).await {
            Ok(result) => result,
            Err(_) => Err(WirelinkError::Timeout),
        }
    }
}

impl Future for PendingResponse {
    type Output = Result<Message>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(WirelinkError::Cancelled)))
    }
}
