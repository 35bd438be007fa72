//! Connection sets: the membership and fan-out shared by servers and clients.
//!
//! A set owns its members. Every member's events are forwarded to the set
//! listener together with the originating [`Connection`], and a member
//! leaves the set exactly once, when it disconnects. Dropping the last
//! handle to a set cancels its members.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::client::ServiceListener;
use crate::codec::MsgPackCodec;
use crate::connection::{Connection, ConnectionListener};
use crate::discovery::Discovery;
use crate::error::{Result, WirelinkError};
use crate::protocol::Header;
use crate::reactor::{Op, Reactor};

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type SetId = u64;

/// Behavior switches for a set, fixed at creation.
pub(crate) struct SetOptions {
    pub listener: Option<Arc<dyn ConnectionListener>>,
    /// Cancel a member after its first completed send.
    pub one_shot: bool,
    /// Follow a discovery browse (client role).
    pub discovery: Option<Arc<dyn Discovery>>,
    pub auto_connect: bool,
    pub service_listener: Option<Arc<dyn ServiceListener>>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            listener: None,
            one_shot: false,
            discovery: None,
            auto_connect: true,
            service_listener: None,
        }
    }
}

struct SetInner {
    id: SetId,
    max_body_size: u32,
    ops: mpsc::UnboundedSender<Op>,
}

impl Drop for SetInner {
    fn drop(&mut self) {
        let _ = self.ops.send(Op::DropSet(self.id));
    }
}

/// Handle to a collection of connections.
#[derive(Clone)]
pub struct ConnectionSet {
    inner: Arc<SetInner>,
}

impl ConnectionSet {
    /// New empty set whose members' events go to `listener`.
    pub fn new<L: ConnectionListener>(reactor: &Reactor, listener: L) -> Self {
        Self::with_options(
            reactor,
            SetOptions {
                listener: Some(Arc::new(listener)),
                ..SetOptions::default()
            },
        )
    }

    pub(crate) fn with_options(reactor: &Reactor, options: SetOptions) -> Self {
        let id = NEXT_SET_ID.fetch_add(1, Ordering::Relaxed);
        let set = Self {
            inner: Arc::new(SetInner {
                id,
                max_body_size: reactor.config().max_body_size,
                ops: reactor.sender(),
            }),
        };
        if reactor.submit(Op::CreateSet { set: id, options }).is_err() {
            tracing::debug!("Created set on a stopped reactor");
        }
        set
    }

    pub(crate) fn id(&self) -> SetId {
        self.inner.id
    }

    pub(crate) fn submit(&self, op: Op) -> Result<()> {
        self.inner
            .ops
            .send(op)
            .map_err(|_| WirelinkError::ReactorClosed)
    }

    /// Add a connection. Ignored if it already ended, or if the set holds a
    /// live connection to the same peer.
    pub fn add(&self, connection: &Connection) -> Result<()> {
        self.submit(Op::AddMember {
            set: self.id(),
            id: connection.id(),
        })
    }

    /// Remove a connection without cancelling it. No-op if absent.
    pub fn remove(&self, connection: &Connection) -> Result<()> {
        self.submit(Op::RemoveMember {
            set: self.id(),
            id: connection.id(),
        })
    }

    /// Send to every connected member with tag 0.
    ///
    /// Members that are not connected report `Failed(NotConnected)` through
    /// the set listener; the others still receive the message.
    pub fn broadcast<T: Serialize>(&self, command: u32, value: &T) -> Result<()> {
        self.broadcast_raw(command, MsgPackCodec::encode_body(value)?)
    }

    pub fn broadcast_raw(&self, command: u32, body: Bytes) -> Result<()> {
        let length = u32::try_from(body.len()).map_err(|_| {
            WirelinkError::MalformedHeader(format!("body of {} bytes is too large", body.len()))
        })?;
        Header::object(command, 0, length).validate(self.inner.max_body_size)?;

        self.submit(Op::Broadcast {
            set: self.id(),
            command,
            tag: 0,
            body,
        })
    }

    /// Broadcast an object with command 0.
    pub fn broadcast_object<T: Serialize>(&self, value: &T) -> Result<()> {
        self.broadcast(0, value)
    }

    /// Cancel every member and empty the set.
    pub fn stop_all(&self) -> Result<()> {
        self.submit(Op::StopAll(self.id()))
    }

    /// Snapshot of the current members, in the order they were added.
    pub async fn members(&self) -> Result<Vec<Connection>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Op::Members {
            set: self.id(),
            reply,
        })?;
        rx.await.map_err(|_| WirelinkError::ReactorClosed)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.members().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

impl std::fmt::Debug for ConnectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSet")
            .field("id", &self.inner.id)
            .finish()
    }
}
