//! The execution context.
//!
//! One tokio task owns every connection's state, its pending-response table
//! and every connection set. Public handles and I/O tasks never touch that
//! state; they send an [`Op`] and the loop applies ops one at a time, in the
//! order they were queued.
//!
//! ```text
//! Connection / ConnectionSet handles ──┐
//! reader tasks (Inbound, ReaderClosed) ─┼─► mpsc<Op> ─► Core (single task)
//! writer tasks (Written, IoFailed) ─────┤                    │
//! connect / resolve tasks ──────────────┘              listeners, callbacks
//! ```
//!
//! Listeners and response callbacks run on the loop task, so they see state
//! changes in order and must not block.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::client::ServiceListener;
use crate::config::NetworkConfig;
use crate::connection::{
    Connection, ConnectionEvent, ConnectionId, ConnectionListener, ConnectionState, Message,
    PeerIdentity, ResponseCallback,
};
use crate::connection_set::{SetId, SetOptions};
use crate::discovery::{Discovery, ServiceRecord};
use crate::error::{Result, WirelinkError};
use crate::protocol::{Frame, FrameBuffer, Header};
use crate::transport::{self, BoxedReader, PeerAddr, TransportStream};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterEvent, WriterHandle};

/// How a connection reaches its peer. Consumed by `start`.
pub(crate) enum Target {
    Addr(PeerAddr),
    Service(ServiceRecord, Arc<dyn Discovery>),
    Stream(TransportStream),
}

/// Work item for the loop.
pub(crate) enum Op {
    Register {
        conn: Connection,
        target: Target,
    },
    Subscribe {
        id: ConnectionId,
        listener: Arc<dyn ConnectionListener>,
    },
    Start(ConnectionId),
    Cancel(ConnectionId),
    /// Every constructor-issued handle was dropped.
    Release(ConnectionId),
    Send {
        id: ConnectionId,
        frame: OutboundFrame,
        reply: Option<ResponseCallback>,
    },
    Resolved {
        id: ConnectionId,
        result: Result<PeerAddr>,
    },
    Connected {
        id: ConnectionId,
        result: Result<TransportStream>,
    },
    Inbound {
        id: ConnectionId,
        frames: Vec<Frame>,
    },
    Written {
        id: ConnectionId,
        tag: u32,
    },
    IoFailed {
        id: ConnectionId,
        error: WirelinkError,
    },
    ReaderClosed(ConnectionId),
    CreateSet {
        set: SetId,
        options: SetOptions,
    },
    DropSet(SetId),
    AddMember {
        set: SetId,
        id: ConnectionId,
    },
    RemoveMember {
        set: SetId,
        id: ConnectionId,
    },
    Broadcast {
        set: SetId,
        command: u32,
        tag: u32,
        body: Bytes,
    },
    StopAll(SetId),
    Members {
        set: SetId,
        reply: oneshot::Sender<Vec<Connection>>,
    },
    ServiceFound {
        set: SetId,
        record: ServiceRecord,
        more_coming: bool,
    },
    ServiceLost {
        set: SetId,
        record: ServiceRecord,
        more_coming: bool,
    },
    ConnectService {
        set: SetId,
        record: ServiceRecord,
    },
    Services {
        set: SetId,
        reply: oneshot::Sender<Vec<ServiceRecord>>,
    },
    Shutdown,
}

impl Op {
    /// Settle an op that will never be processed.
    fn abandon(self) {
        match self {
            Op::Send {
                reply: Some(callback),
                ..
            } => callback(Err(WirelinkError::ReactorClosed)),
            Op::Register { conn, .. } => conn.mirror_state(ConnectionState::Disconnected),
            _ => {}
        }
    }
}

struct ReactorInner {
    ops: mpsc::UnboundedSender<Op>,
    config: NetworkConfig,
}

impl Drop for ReactorInner {
    fn drop(&mut self) {
        let _ = self.ops.send(Op::Shutdown);
    }
}

/// Handle to a running execution context.
///
/// The loop runs until [`shutdown`](Self::shutdown) is called or the last
/// `Reactor` clone is dropped. Connection and set handles do not keep it
/// alive; once it stops their operations fail with `ReactorClosed`.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

impl Reactor {
    /// Validate `config` and spawn the loop on the current tokio runtime.
    pub fn spawn(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::launch(config))
    }

    /// Spawn with [`NetworkConfig::default`].
    pub fn spawn_default() -> Self {
        Self::launch(NetworkConfig::default())
    }

    fn launch(config: NetworkConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Core {
            ops: tx.clone(),
            config: config.clone(),
            conns: HashMap::new(),
            sets: HashMap::new(),
        };
        tokio::spawn(run(core, rx));
        Self {
            inner: Arc::new(ReactorInner { ops: tx, config }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Cancel every connection and stop the loop.
    pub fn shutdown(&self) {
        let _ = self.inner.ops.send(Op::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.ops.is_closed()
    }

    /// Wait until the loop has stopped.
    pub async fn closed(&self) {
        self.inner.ops.closed().await
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Op> {
        self.inner.ops.clone()
    }

    pub(crate) fn submit(&self, op: Op) -> Result<()> {
        self.inner
            .ops
            .send(op)
            .map_err(|_| WirelinkError::ReactorClosed)
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run(mut core: Core, mut rx: mpsc::UnboundedReceiver<Op>) {
    tracing::debug!("Reactor started");
    while let Some(op) = rx.recv().await {
        if !core.handle(op) {
            break;
        }
    }

    rx.close();
    while let Ok(op) = rx.try_recv() {
        op.abandon();
    }
    tracing::debug!("Reactor stopped");
}

struct ConnState {
    conn: Connection,
    target: Option<Target>,
    state: ConnectionState,
    pending: HashMap<u32, ResponseCallback>,
    writer: Option<WriterHandle>,
    tasks: Vec<AbortHandle>,
    listeners: Vec<Arc<dyn ConnectionListener>>,
    owner: Option<SetId>,
    /// No application handle is left.
    released: bool,
}

impl ConnState {
    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.conn.mirror_state(state);
    }

    /// Unreachable: never started, owned by no set, no handle left.
    fn is_abandoned(&self) -> bool {
        self.released && self.owner.is_none() && self.state == ConnectionState::Idle
    }
}

struct SetState {
    listener: Option<Arc<dyn ConnectionListener>>,
    members: Vec<ConnectionId>,
    one_shot: bool,
    binding: Option<Binding>,
}

/// Discovery side of a client set.
struct Binding {
    discovery: Arc<dyn Discovery>,
    auto_connect: bool,
    service_listener: Option<Arc<dyn ServiceListener>>,
    services: Vec<ServiceRecord>,
}

/// Run the connection's listeners, then its owning set's listener.
fn emit(sets: &HashMap<SetId, SetState>, entry: &ConnState, event: ConnectionEvent) {
    for listener in &entry.listeners {
        listener.on_event(&entry.conn, &event);
    }
    if let Some(listener) = entry
        .owner
        .and_then(|set| sets.get(&set))
        .and_then(|set| set.listener.as_ref())
    {
        listener.on_event(&entry.conn, &event);
    }
}

struct Core {
    ops: mpsc::UnboundedSender<Op>,
    config: NetworkConfig,
    conns: HashMap<ConnectionId, ConnState>,
    sets: HashMap<SetId, SetState>,
}

impl Core {
    /// Apply one op. Returns `false` once the loop should stop.
    fn handle(&mut self, op: Op) -> bool {
        match op {
            Op::Register { conn, target } => self.register(conn, target),
            Op::Subscribe { id, listener } => {
                if let Some(entry) = self.conns.get_mut(&id) {
                    entry.listeners.push(listener);
                }
            }
            Op::Start(id) => self.start(id),
            Op::Cancel(id) => self.disconnect(id, None),
            Op::Release(id) => self.release(id),
            Op::Send { id, frame, reply } => self.send(id, frame, reply),
            Op::Resolved { id, result } => self.resolved(id, result),
            Op::Connected { id, result } => self.connected(id, result),
            Op::Inbound { id, frames } => self.inbound(id, frames),
            Op::Written { id, tag } => self.written(id, tag),
            Op::IoFailed { id, error } => self.disconnect(id, Some(error)),
            Op::ReaderClosed(id) => {
                tracing::debug!("Connection {} closed by peer", id);
                self.disconnect(id, None)
            }
            Op::CreateSet { set, options } => self.create_set(set, options),
            Op::DropSet(set) => {
                self.stop_all(set);
                self.sets.remove(&set);
            }
            Op::AddMember { set, id } => self.add_member(set, id),
            Op::RemoveMember { set, id } => self.remove_member(set, id),
            Op::Broadcast {
                set,
                command,
                tag,
                body,
            } => self.broadcast(set, command, tag, body),
            Op::StopAll(set) => self.stop_all(set),
            Op::Members { set, reply } => {
                let members = self
                    .sets
                    .get(&set)
                    .map(|s| {
                        s.members
                            .iter()
                            .filter_map(|id| self.conns.get(id).map(|e| e.conn.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
            Op::ServiceFound {
                set,
                record,
                more_coming,
            } => self.service_found(set, record, more_coming),
            Op::ServiceLost {
                set,
                record,
                more_coming,
            } => self.service_lost(set, record, more_coming),
            Op::ConnectService { set, record } => self.connect_service(set, record),
            Op::Services { set, reply } => {
                let services = self
                    .sets
                    .get(&set)
                    .and_then(|s| s.binding.as_ref())
                    .map(|b| b.services.clone())
                    .unwrap_or_default();
                let _ = reply.send(services);
            }
            Op::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn register(&mut self, conn: Connection, target: Target) {
        let id = conn.id();
        self.conns.insert(
            id,
            ConnState {
                conn,
                target: Some(target),
                state: ConnectionState::Idle,
                pending: HashMap::new(),
                writer: None,
                tasks: Vec::new(),
                listeners: Vec::new(),
                owner: None,
                released: false,
            },
        );
    }

    fn release(&mut self, id: ConnectionId) {
        let abandoned = match self.conns.get_mut(&id) {
            Some(entry) => {
                entry.released = true;
                entry.is_abandoned()
            }
            None => false,
        };
        if abandoned {
            tracing::debug!("Releasing idle connection {}", id);
            self.disconnect(id, None);
        }
    }

    fn start(&mut self, id: ConnectionId) {
        let target = match self.conns.get_mut(&id) {
            Some(entry) if entry.state == ConnectionState::Idle => entry.target.take(),
            Some(entry) => {
                tracing::debug!("Ignoring start of connection {} in state {:?}", id, entry.state);
                return;
            }
            None => return,
        };

        match target {
            Some(Target::Addr(addr)) => self.begin_connect(id, addr),
            Some(Target::Service(record, discovery)) => self.begin_resolve(id, record, discovery),
            Some(Target::Stream(stream)) => {
                if let Some(entry) = self.conns.get_mut(&id) {
                    entry.set_state(ConnectionState::Connecting);
                }
                self.attach(id, stream);
            }
            None => {}
        }
    }

    fn begin_resolve(
        &mut self,
        id: ConnectionId,
        record: ServiceRecord,
        discovery: Arc<dyn Discovery>,
    ) {
        let Some(entry) = self.conns.get_mut(&id) else {
            return;
        };
        entry.set_state(ConnectionState::Resolving);
        tracing::debug!("Connection {} resolving {}", id, record);

        let ops = self.ops.clone();
        let limit = self.config.resolve_timeout;
        let task = tokio::spawn(async move {
            let result = resolve_with_timeout(discovery.as_ref(), &record, limit).await;
            let _ = ops.send(Op::Resolved { id, result });
        });
        entry.tasks.push(task.abort_handle());
    }

    fn begin_connect(&mut self, id: ConnectionId, addr: PeerAddr) {
        let Some(entry) = self.conns.get_mut(&id) else {
            return;
        };
        entry.set_state(ConnectionState::Connecting);
        tracing::debug!("Connection {} connecting to {}", id, addr);

        let ops = self.ops.clone();
        let limit = self.config.connect_timeout;
        let task = tokio::spawn(async move {
            let result = connect_with_timeout(&addr, limit).await;
            let _ = ops.send(Op::Connected { id, result });
        });
        entry.tasks.push(task.abort_handle());
    }

    fn resolved(&mut self, id: ConnectionId, result: Result<PeerAddr>) {
        match self.conns.get(&id) {
            Some(entry) if entry.state == ConnectionState::Resolving => {}
            _ => return,
        }
        match result {
            Ok(addr) => self.begin_connect(id, addr),
            Err(e) => self.disconnect(id, Some(e)),
        }
    }

    fn connected(&mut self, id: ConnectionId, result: Result<TransportStream>) {
        match self.conns.get(&id) {
            Some(entry) if entry.state == ConnectionState::Connecting => {}
            _ => return,
        }
        match result {
            Ok(stream) => self.attach(id, stream),
            Err(e) => self.disconnect(id, Some(e)),
        }
    }

    /// Spawn the reader and writer for an established stream.
    fn attach(&mut self, id: ConnectionId, stream: TransportStream) {
        let Some(entry) = self.conns.get_mut(&id) else {
            return;
        };
        let peer = stream.peer().to_string();
        let (reader, writer) = stream.into_split();

        let ops = self.ops.clone();
        let (handle, writer_task) = spawn_writer_task(writer, move |event| {
            let op = match event {
                WriterEvent::Written(tag) => Op::Written { id, tag },
                WriterEvent::Failed(error) => Op::IoFailed { id, error },
            };
            let _ = ops.send(op);
        });
        let reader_task = tokio::spawn(read_loop(
            id,
            reader,
            self.config.max_body_size,
            self.config.read_buffer_size,
            self.ops.clone(),
        ));

        entry.writer = Some(handle);
        entry.tasks.push(writer_task.abort_handle());
        entry.tasks.push(reader_task.abort_handle());
        entry.set_state(ConnectionState::Connected);
        tracing::debug!("Connection {} connected ({})", id, peer);

        emit(&self.sets, entry, ConnectionEvent::Connected);
    }

    fn send(&mut self, id: ConnectionId, frame: OutboundFrame, reply: Option<ResponseCallback>) {
        let Some(entry) = self.conns.get_mut(&id) else {
            if let Some(callback) = reply {
                callback(Err(WirelinkError::NotConnected));
            }
            return;
        };

        let writer = match (&entry.writer, entry.state) {
            (Some(writer), ConnectionState::Connected) => writer.clone(),
            _ => {
                match reply {
                    Some(callback) => callback(Err(WirelinkError::NotConnected)),
                    None => emit(
                        &self.sets,
                        entry,
                        ConnectionEvent::Failed(WirelinkError::NotConnected),
                    ),
                }
                return;
            }
        };

        let tag = frame.tag;
        if let Some(callback) = reply {
            if entry.pending.contains_key(&tag) {
                callback(Err(WirelinkError::ReservedTag(tag)));
                return;
            }
            entry.pending.insert(tag, callback);
        }

        if writer.send(frame).is_err() {
            // The writer reports its own failure; it is already queued.
            tracing::debug!("Connection {} dropped frame {} after writer stopped", id, tag);
        }
    }

    fn inbound(&mut self, id: ConnectionId, frames: Vec<Frame>) {
        let Some(entry) = self.conns.get_mut(&id) else {
            return;
        };
        if entry.state != ConnectionState::Connected {
            return;
        }

        for frame in frames {
            let message = Message::from(frame);
            match entry.pending.remove(&message.tag) {
                Some(callback) => callback(Ok(message)),
                None => emit(&self.sets, entry, ConnectionEvent::Received(message)),
            }
        }
    }

    fn written(&mut self, id: ConnectionId, tag: u32) {
        let Some(entry) = self.conns.get(&id) else {
            return;
        };
        emit(&self.sets, entry, ConnectionEvent::Sent { tag });

        let one_shot = entry
            .owner
            .and_then(|set| self.sets.get(&set))
            .map_or(false, |set| set.one_shot);
        if one_shot {
            tracing::debug!("Closing one-shot connection {} after first send", id);
            self.disconnect(id, None);
        }
    }

    /// Move a connection to `Disconnected`.
    ///
    /// `failure` is emitted as `Failed` first and settles every pending
    /// callback; without it they get `Cancelled`. Runs at most once per
    /// connection since the entry is removed here.
    fn disconnect(&mut self, id: ConnectionId, failure: Option<WirelinkError>) {
        let Some(mut entry) = self.conns.remove(&id) else {
            return;
        };
        for task in entry.tasks.drain(..) {
            task.abort();
        }
        entry.writer = None;
        entry.target = None;
        entry.set_state(ConnectionState::Disconnected);

        if let Some(error) = &failure {
            if error.is_fatal() {
                tracing::error!("Connection {} failed: {}", id, error);
            } else {
                tracing::warn!("Connection {} closed: {}", id, error);
            }
            emit(&self.sets, &entry, ConnectionEvent::Failed(error.clone()));
        }

        let drained = failure.unwrap_or(WirelinkError::Cancelled);
        let mut pending: Vec<_> = entry.pending.drain().collect();
        pending.sort_by_key(|(tag, _)| *tag);
        if !pending.is_empty() {
            tracing::debug!(
                "Connection {} settling {} pending responses with: {}",
                id,
                pending.len(),
                drained
            );
        }
        for (_, callback) in pending {
            callback(Err(drained.clone()));
        }

        tracing::debug!("Connection {} disconnected", id);
        emit(&self.sets, &entry, ConnectionEvent::Disconnected);

        if let Some(set) = entry.owner.and_then(|set| self.sets.get_mut(&set)) {
            set.members.retain(|member| *member != id);
        }
    }

    fn create_set(&mut self, set: SetId, options: SetOptions) {
        let binding = options.discovery.map(|discovery| Binding {
            discovery,
            auto_connect: options.auto_connect,
            service_listener: options.service_listener,
            services: Vec::new(),
        });
        self.sets.insert(
            set,
            SetState {
                listener: options.listener,
                members: Vec::new(),
                one_shot: options.one_shot,
                binding,
            },
        );
    }

    fn add_member(&mut self, set: SetId, id: ConnectionId) {
        let Some(state) = self.sets.get(&set) else {
            tracing::warn!("Ignoring add of connection {} to unknown set", id);
            return;
        };
        let Some(entry) = self.conns.get(&id) else {
            tracing::debug!("Ignoring add of terminated connection {}", id);
            return;
        };
        if entry.owner == Some(set) {
            return;
        }

        let identity = entry.conn.identity();
        if !matches!(identity, PeerIdentity::Accepted(_)) {
            let duplicate = state.members.iter().any(|member| {
                self.conns
                    .get(member)
                    .map_or(false, |other| other.conn.identity() == identity)
            });
            if duplicate {
                tracing::warn!("Set already holds a live connection to {}", identity);
                return;
            }
        }

        if let Some(previous) = entry.owner.and_then(|previous| self.sets.get_mut(&previous)) {
            previous.members.retain(|member| *member != id);
        }
        if let Some(entry) = self.conns.get_mut(&id) {
            entry.owner = Some(set);
        }
        if let Some(state) = self.sets.get_mut(&set) {
            state.members.push(id);
        }
    }

    fn remove_member(&mut self, set: SetId, id: ConnectionId) {
        if let Some(state) = self.sets.get_mut(&set) {
            state.members.retain(|member| *member != id);
        }
        let abandoned = match self.conns.get_mut(&id) {
            Some(entry) if entry.owner == Some(set) => {
                entry.owner = None;
                entry.is_abandoned()
            }
            _ => false,
        };
        if abandoned {
            tracing::debug!("Releasing idle connection {} removed from its set", id);
            self.disconnect(id, None);
        }
    }

    fn broadcast(&mut self, set: SetId, command: u32, tag: u32, body: Bytes) {
        let Some(state) = self.sets.get(&set) else {
            return;
        };
        let header = Header::object(command, tag, body.len() as u32);

        for id in &state.members {
            let Some(entry) = self.conns.get(id) else {
                continue;
            };
            match (&entry.writer, entry.state) {
                (Some(writer), ConnectionState::Connected) => {
                    if writer.send(OutboundFrame::new(&header, body.clone())).is_err() {
                        tracing::debug!("Connection {} dropped broadcast after writer stopped", id);
                    }
                }
                _ => emit(
                    &self.sets,
                    entry,
                    ConnectionEvent::Failed(WirelinkError::NotConnected),
                ),
            }
        }
    }

    fn stop_all(&mut self, set: SetId) {
        let members = match self.sets.get_mut(&set) {
            Some(state) => std::mem::take(&mut state.members),
            None => return,
        };
        for id in members {
            self.disconnect(id, None);
        }
    }

    fn service_found(&mut self, set: SetId, record: ServiceRecord, more_coming: bool) {
        let Some(binding) = self.sets.get_mut(&set).and_then(|s| s.binding.as_mut()) else {
            return;
        };
        tracing::debug!("Found service {} (more coming: {})", record, more_coming);
        if !binding.services.contains(&record) {
            binding.services.push(record.clone());
        }

        let wanted = binding
            .service_listener
            .as_ref()
            .map_or(false, |listener| listener.found(&record, more_coming));
        if binding.auto_connect || wanted {
            self.connect_service(set, record);
        }
    }

    fn service_lost(&mut self, set: SetId, record: ServiceRecord, more_coming: bool) {
        let Some(state) = self.sets.get_mut(&set) else {
            return;
        };
        let Some(binding) = state.binding.as_mut() else {
            return;
        };
        tracing::debug!("Lost service {} (more coming: {})", record, more_coming);
        binding.services.retain(|known| *known != record);
        if let Some(listener) = &binding.service_listener {
            listener.lost(&record, more_coming);
        }

        let identity = PeerIdentity::Service(record);
        let lost: Vec<ConnectionId> = state
            .members
            .iter()
            .copied()
            .filter(|id| {
                self.conns
                    .get(id)
                    .map_or(false, |entry| *entry.conn.identity() == identity)
            })
            .collect();
        for id in lost {
            self.disconnect(id, None);
        }
    }

    /// Create, add and start a connection to `record` unless the set
    /// already has a live one.
    fn connect_service(&mut self, set: SetId, record: ServiceRecord) {
        let Some(state) = self.sets.get(&set) else {
            return;
        };
        let Some(discovery) = state.binding.as_ref().map(|b| b.discovery.clone()) else {
            tracing::warn!("Set has no discovery binding; cannot connect to {}", record);
            return;
        };

        let identity = PeerIdentity::Service(record.clone());
        let exists = state.members.iter().any(|id| {
            self.conns
                .get(id)
                .map_or(false, |entry| *entry.conn.identity() == identity)
        });
        if exists {
            tracing::debug!("Already connected to {}", record);
            return;
        }

        let conn = Connection::new(self.ops.clone(), identity, self.config.max_body_size);
        let id = conn.id();
        self.register(conn, Target::Service(record, discovery));
        self.add_member(set, id);
        self.start(id);
    }

    fn shutdown(&mut self) {
        let ids: Vec<ConnectionId> = self.conns.keys().copied().collect();
        for id in ids {
            self.disconnect(id, None);
        }
        self.sets.clear();
    }
}

/// Socket read loop: reassemble frames and hand them to the reactor.
async fn read_loop(
    id: ConnectionId,
    mut reader: BoxedReader,
    max_body_size: u32,
    buffer_size: usize,
    ops: mpsc::UnboundedSender<Op>,
) {
    let mut frame_buffer = FrameBuffer::with_max_body(max_body_size);
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = ops.send(Op::ReaderClosed(id));
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = ops.send(Op::IoFailed {
                    id,
                    error: e.into(),
                });
                return;
            }
        };

        match frame_buffer.push(&buf[..n]) {
            Ok(frames) if frames.is_empty() => {}
            Ok(frames) => {
                if ops.send(Op::Inbound { id, frames }).is_err() {
                    return;
                }
            }
            Err(error) => {
                tracing::warn!("Connection {} sent a bad frame: {}", id, error);
                let _ = ops.send(Op::IoFailed { id, error });
                return;
            }
        }
    }
}

async fn connect_with_timeout(
    addr: &PeerAddr,
    limit: Option<Duration>,
) -> Result<TransportStream> {
    let attempt = transport::connect(addr);
    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                return Err(WirelinkError::Connect(format!(
                    "{}: timed out after {:?}",
                    addr, limit
                )))
            }
        },
        None => attempt.await,
    };
    result.map_err(|e| WirelinkError::Connect(format!("{}: {}", addr, e)))
}

async fn resolve_with_timeout(
    discovery: &dyn Discovery,
    record: &ServiceRecord,
    limit: Option<Duration>,
) -> Result<PeerAddr> {
    let attempt = discovery.resolve(record);
    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                return Err(WirelinkError::Resolution(format!(
                    "{}: timed out after {:?}",
                    record, limit
                )))
            }
        },
        None => attempt.await,
    };
    result.map_err(|e| match e {
        WirelinkError::Resolution(_) => e,
        other => WirelinkError::Resolution(format!("{}: {}", record, other)),
    })
}
