//! Server role: accept connections into a set and optionally advertise the
//! listening endpoint through discovery.
//!
//! Accepted streams are wrapped in a [`Connection`], added to the server's
//! [`ConnectionSet`] and started right away. In one-shot mode each accepted
//! connection is cancelled after its first completed send.
//!
//! # Example
//!
//! ```ignore
//! use wirelink::{Connection, ConnectionEvent, Server};
//!
//! let server = Server::builder()
//!     .bind("tcp://127.0.0.1:0".parse()?)
//!     .listener(|conn: &Connection, event: &ConnectionEvent| {
//!         if let ConnectionEvent::Received(msg) = event {
//!             let _ = conn.respond(msg.tag, msg.command, &"pong");
//!         }
//!     })
//!     .start()
//!     .await?;
//! println!("listening on {}", server.local_addr());
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::NetworkConfig;
use crate::connection::{Connection, ConnectionListener};
use crate::connection_set::{ConnectionSet, SetOptions};
use crate::discovery::{Discovery, Publication, ServiceRecord};
use crate::error::Result;
use crate::reactor::Reactor;
use crate::transport::{PeerAddr, TransportListener};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Builder for a [`Server`].
pub struct ServerBuilder {
    bind: PeerAddr,
    publish: Option<(ServiceRecord, Arc<dyn Discovery>)>,
    one_shot: bool,
    listener: Option<Arc<dyn ConnectionListener>>,
    reactor: Option<Reactor>,
    config: NetworkConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            bind: PeerAddr::tcp("0.0.0.0", 0),
            publish: None,
            one_shot: false,
            listener: None,
            reactor: None,
            config: NetworkConfig::default(),
        }
    }

    /// Listening endpoint: TCP or Unix domain socket.
    ///
    /// Default: `tcp://0.0.0.0:0` (any interface, free port)
    pub fn bind(mut self, addr: PeerAddr) -> Self {
        self.bind = addr;
        self
    }

    /// Advertise the bound endpoint as `record` once listening.
    pub fn publish(mut self, record: ServiceRecord, discovery: Arc<dyn Discovery>) -> Self {
        self.publish = Some((record, discovery));
        self
    }

    /// Cancel each connection after its first completed send. Default: off.
    pub fn one_shot(mut self, enabled: bool) -> Self {
        self.one_shot = enabled;
        self
    }

    /// Receives every connection's events.
    pub fn listener<L: ConnectionListener>(mut self, listener: L) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Run on an existing reactor instead of spawning one.
    pub fn reactor(mut self, reactor: &Reactor) -> Self {
        self.reactor = Some(reactor.clone());
        self
    }

    /// Configuration for the reactor spawned by `start`. Ignored when
    /// [`reactor`](Self::reactor) is set.
    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind, publish and start accepting.
    pub async fn start(self) -> Result<Server> {
        let reactor = match self.reactor {
            Some(reactor) => reactor,
            None => Reactor::spawn(self.config)?,
        };

        let listener = TransportListener::bind(&self.bind).await?;
        let local_addr = listener.local_addr().clone();
        tracing::debug!("Listening on {}", local_addr);

        let publication = match self.publish {
            Some((record, discovery)) => {
                Some(discovery.publish(record, advertised_addr(&local_addr))?)
            }
            None => None,
        };

        let set = ConnectionSet::with_options(
            &reactor,
            SetOptions {
                listener: self.listener,
                one_shot: self.one_shot,
                ..SetOptions::default()
            },
        );
        let accept_task = tokio::spawn(accept_loop(listener, reactor.clone(), set.clone()));

        Ok(Server {
            reactor,
            set,
            local_addr,
            accept_task,
            publication,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Address peers should use for a bound endpoint: wildcard hosts become
/// loopback.
fn advertised_addr(local: &PeerAddr) -> PeerAddr {
    match local {
        PeerAddr::Tcp { host, port } if host == "0.0.0.0" => PeerAddr::tcp("127.0.0.1", *port),
        PeerAddr::Tcp { host, port } if host == "::" => PeerAddr::tcp("::1", *port),
        other => other.clone(),
    }
}

async fn accept_loop(listener: TransportListener, reactor: Reactor, set: ConnectionSet) {
    loop {
        match listener.accept().await {
            Ok(stream) => {
                tracing::debug!("Accepted connection from {}", stream.peer());
                let conn = Connection::from_stream(&reactor, stream);
                if set.add(&conn).and_then(|_| conn.start()).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
    tracing::debug!("Accept loop ended");
}

/// A running server.
pub struct Server {
    reactor: Reactor,
    set: ConnectionSet,
    local_addr: PeerAddr,
    accept_task: JoinHandle<()>,
    publication: Option<Publication>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// The bound endpoint (with the chosen port when bound to port 0).
    pub fn local_addr(&self) -> &PeerAddr {
        &self.local_addr
    }

    /// The advertised service, if any.
    pub fn published(&self) -> Option<&ServiceRecord> {
        self.publication.as_ref().map(|p| p.record())
    }

    /// Accepted connections.
    pub fn connections(&self) -> &ConnectionSet {
        &self.set
    }

    /// Broadcast to every connected client.
    pub fn broadcast<T: Serialize>(&self, command: u32, value: &T) -> Result<()> {
        self.set.broadcast(command, value)
    }

    pub fn send_object<T: Serialize>(&self, value: &T) -> Result<()> {
        self.set.broadcast_object(value)
    }

    /// Stop accepting, withdraw the advertisement and cancel every
    /// connection.
    pub fn stop(mut self) {
        self.accept_task.abort();
        self.publication = None;
        let _ = self.set.stop_all();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
