//! Client role: follow a discovery browse and hold one connection per
//! discovered server.
//!
//! "found" results are handed to the reactor, which connects to the record
//! when auto-connect is on (the default) or when the [`ServiceListener`]
//! asks for it. "lost" results cancel the matching connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wirelink::{Client, Connection, ConnectionEvent, LocalDiscovery};
//!
//! let discovery = Arc::new(LocalDiscovery::new());
//! let client = Client::builder()
//!     .discovery(discovery)
//!     .listener(|conn: &Connection, event: &ConnectionEvent| {
//!         if let ConnectionEvent::Connected = event {
//!             let _ = conn.send_object(&"hello");
//!         }
//!     })
//!     .start()
//!     .await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::NetworkConfig;
use crate::connection::ConnectionListener;
use crate::connection_set::{ConnectionSet, SetOptions};
use crate::discovery::{
    Discovery, DiscoveryEvent, DiscoveryEvents, ServiceRecord, DEFAULT_SERVICE_DOMAIN,
    DEFAULT_SERVICE_TYPE,
};
use crate::error::{Result, WirelinkError};
use crate::reactor::{Op, Reactor};

/// Browse results, delivered on the reactor task.
pub trait ServiceListener: Send + Sync + 'static {
    /// Return `true` to connect to `record` even when auto-connect is off.
    fn found(&self, record: &ServiceRecord, more_coming: bool) -> bool {
        let _ = (record, more_coming);
        false
    }

    fn lost(&self, record: &ServiceRecord, more_coming: bool) {
        let _ = (record, more_coming);
    }
}

/// Builder for a [`Client`].
pub struct ClientBuilder {
    service_type: String,
    domain: String,
    auto_connect: bool,
    discovery: Option<Arc<dyn Discovery>>,
    listener: Option<Arc<dyn ConnectionListener>>,
    service_listener: Option<Arc<dyn ServiceListener>>,
    reactor: Option<Reactor>,
    config: NetworkConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            domain: DEFAULT_SERVICE_DOMAIN.to_string(),
            auto_connect: true,
            discovery: None,
            listener: None,
            service_listener: None,
            reactor: None,
            config: NetworkConfig::default(),
        }
    }

    /// Service type to browse for.
    ///
    /// Default: `_wirelink._tcp.`
    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// Default: `local.`
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Connect to every found service. Default: on.
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Discovery collaborator to browse with. Required.
    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Receives every connection's events.
    pub fn listener<L: ConnectionListener>(mut self, listener: L) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn service_listener<S: ServiceListener>(mut self, listener: S) -> Self {
        self.service_listener = Some(Arc::new(listener));
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

    /// Start browsing.
    pub async fn start(self) -> Result<Client> {
        let discovery = self.discovery.ok_or_else(|| {
            WirelinkError::Config("a client needs a discovery collaborator".to_string())
        })?;
        let reactor = match self.reactor {
            Some(reactor) => reactor,
            None => Reactor::spawn(self.config)?,
        };

        let set = ConnectionSet::with_options(
            &reactor,
            SetOptions {
                listener: self.listener,
                one_shot: false,
                discovery: Some(discovery.clone()),
                auto_connect: self.auto_connect,
                service_listener: self.service_listener,
            },
        );

        let events = discovery.browse(&self.service_type, &self.domain)?;
        tracing::debug!("Browsing for {} in {}", self.service_type, self.domain);
        let browse_task = tokio::spawn(browse_loop(events, set.clone()));

        Ok(Client {
            reactor,
            set,
            browse_task,
            service_type: self.service_type,
            domain: self.domain,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward browse results to the reactor until either side goes away.
async fn browse_loop(mut events: DiscoveryEvents, set: ConnectionSet) {
    while let Some(event) = events.recv().await {
        let op = match event {
            DiscoveryEvent::Found {
                record,
                more_coming,
            } => Op::ServiceFound {
                set: set.id(),
                record,
                more_coming,
            },
            DiscoveryEvent::Lost {
                record,
                more_coming,
            } => Op::ServiceLost {
                set: set.id(),
                record,
                more_coming,
            },
        };
        if set.submit(op).is_err() {
            break;
        }
    }
    tracing::debug!("Browse ended");
}

/// A running client.
pub struct Client {
    reactor: Reactor,
    set: ConnectionSet,
    browse_task: JoinHandle<()>,
    service_type: String,
    domain: String,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// The client's connections.
    pub fn connections(&self) -> &ConnectionSet {
        &self.set
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Connect to `record` unless a live connection to it exists.
    pub fn connect_to_service(&self, record: ServiceRecord) -> Result<()> {
        self.set.submit(Op::ConnectService {
            set: self.set.id(),
            record,
        })
    }

    /// Services currently known from the browse.
    pub async fn services(&self) -> Result<Vec<ServiceRecord>> {
        let (reply, rx) = oneshot::channel();
        self.set.submit(Op::Services {
            set: self.set.id(),
            reply,
        })?;
        rx.await.map_err(|_| WirelinkError::ReactorClosed)
    }

    /// Broadcast to every connected server.
    pub fn broadcast<T: Serialize>(&self, command: u32, value: &T) -> Result<()> {
        self.set.broadcast(command, value)
    }

    pub fn send_object<T: Serialize>(&self, value: &T) -> Result<()> {
        self.set.broadcast_object(value)
    }

    /// Stop browsing and cancel every connection.
    pub fn stop(self) {
        self.browse_task.abort();
        let _ = self.set.stop_all();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.browse_task.abort();
    }
}
