//! Transport module - the byte-stream collaborator.
//!
//! Provides:
//! - TCP streams and listeners
//! - Unix Domain Sockets (Unix platforms)
//! - Wrapping of arbitrary async streams (in-memory pipes for tests)

mod stream;

pub use stream::{
    connect, BoxedReader, BoxedWriter, PeerAddr, TransportListener, TransportStream,
};
