//! One-shot request: connect, send one message, await its reply, close.
//!
//! # Example
//!
//! ```ignore
//! let reply = Request::to_addr("tcp://127.0.0.1:7000".parse()?)
//!     .command(1)
//!     .timeout(Duration::from_secs(2))
//!     .fire(&reactor, &"ping")
//!     .await?;
//! let text: String = reply.decode()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::connection::{Connection, ConnectionEvent, Message};
use crate::discovery::{Discovery, ServiceRecord};
use crate::error::{Result, WirelinkError};
use crate::reactor::Reactor;
use crate::transport::PeerAddr;

/// Default bound on the whole exchange, connect included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

enum RequestTarget {
    Addr(PeerAddr),
    Service(ServiceRecord, Arc<dyn Discovery>),
}

/// A single request/response exchange over a dedicated connection.
pub struct Request {
    target: RequestTarget,
    command: u32,
    timeout: Duration,
}

impl Request {
    pub fn to_addr(addr: PeerAddr) -> Self {
        Self::new(RequestTarget::Addr(addr))
    }

    pub fn to_service(record: ServiceRecord, discovery: Arc<dyn Discovery>) -> Self {
        Self::new(RequestTarget::Service(record, discovery))
    }

    fn new(target: RequestTarget) -> Self {
        Self {
            target,
            command: 0,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Default: 0
    pub fn command(mut self, command: u32) -> Self {
        self.command = command;
        self
    }

    /// Default: 10 seconds
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the exchange. The connection is cancelled whatever the outcome.
    pub async fn fire<T: Serialize>(&self, reactor: &Reactor, body: &T) -> Result<Message> {
        let body = MsgPackCodec::encode_body(body)?;

        let conn = match &self.target {
            RequestTarget::Addr(addr) => Connection::to_addr(reactor, addr.clone()),
            RequestTarget::Service(record, discovery) => {
                Connection::to_service(reactor, record.clone(), discovery.clone())
            }
        };

        let result = match tokio::time::timeout(self.timeout, exchange(&conn, self.command, body))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(WirelinkError::Timeout),
        };
        conn.cancel();
        result
    }
}

async fn exchange(conn: &Connection, command: u32, body: Bytes) -> Result<Message> {
    let mut events = conn.events()?;
    conn.start()?;

    loop {
        match events.recv().await {
            Some(ConnectionEvent::Connected) => break,
            Some(ConnectionEvent::Failed(error)) => return Err(error),
            Some(ConnectionEvent::Disconnected) | None => return Err(WirelinkError::NotConnected),
            Some(_) => {}
        }
    }

    conn.request_raw(command, body).await
}
