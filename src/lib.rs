//! # wirelink
//!
//! Tagged request/response messaging over persistent stream connections.
//!
//! Every message is a 14-byte header (`message_type`, `command`, `tag`,
//! `body_length`, big-endian) followed by the body. A connection can send
//! fire-and-forget messages with application tags, or send a request under an
//! auto-allocated tag and get exactly one callback for it: the reply, or an
//! error if the connection ends first.
//!
//! ## Architecture
//!
//! - **Reactor**: one task owns all connection and set state; handles send it ops
//! - **Connection**: per-peer state machine (`Idle → Resolving → Connecting →
//!   Connected → Disconnected`) with its pending-response table
//! - **ConnectionSet**: membership, broadcast and event fan-in for a role
//! - **Server / Client**: accept into a set, or follow a discovery browse
//!
//! ## Example
//!
//! ```ignore
//! use wirelink::{Connection, ConnectionEvent, Reactor, Request, Server};
//!
//! #[tokio::main]
//! async fn main() -> wirelink::Result<()> {
//!     let server = Server::builder()
//!         .bind("tcp://127.0.0.1:0".parse()?)
//!         .listener(|conn: &Connection, event: &ConnectionEvent| {
//!             if let ConnectionEvent::Received(msg) = event {
//!                 let _ = conn.respond(msg.tag, msg.command, &"pong");
//!             }
//!         })
//!         .start()
//!         .await?;
//!
//!     let reactor = Reactor::spawn_default();
//!     let reply = Request::to_addr(server.local_addr().clone())
//!         .command(1)
//!         .fire(&reactor, &"ping")
//!         .await?;
//!     assert_eq!(reply.decode::<String>()?, "pong");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod transport;

mod client;
mod connection;
mod connection_set;
mod reactor;
mod request;
mod server;
mod writer;

pub use client::{Client, ClientBuilder, ServiceListener};
pub use config::NetworkConfig;
pub use connection::{
    Connection, ConnectionEvent, ConnectionId, ConnectionListener, ConnectionState, EventStream,
    Message, PeerIdentity, PendingResponse,
};
pub use connection_set::ConnectionSet;
pub use discovery::{Discovery, LocalDiscovery, ServiceRecord};
pub use error::{Result, WirelinkError};
pub use reactor::Reactor;
pub use request::{Request, DEFAULT_REQUEST_TIMEOUT};
pub use server::{Server, ServerBuilder};
