//! One-shot echo over a Unix domain socket.
//!
//! The server runs in one-shot mode: every accepted connection is closed
//! after its reply is written. Each [`Request`] opens its own connection.
//!
//! ```sh
//! cargo run --example echo_unix
//! ```

use wirelink::transport::PeerAddr;
use wirelink::{Connection, ConnectionEvent, Reactor, Request, Server};

#[cfg(unix)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let path = std::env::temp_dir().join("wirelink-echo.sock");
    let server = Server::builder()
        .bind(PeerAddr::unix(&path))
        .one_shot(true)
        .listener(|conn: &Connection, event: &ConnectionEvent| {
            if let ConnectionEvent::Received(msg) = event {
                // Echo the body back untouched.
                if let Err(e) = conn.respond_raw(msg.tag, msg.command, msg.body.clone()) {
                    tracing::warn!("echo failed: {}", e);
                }
            }
        })
        .start()
        .await?;
    println!("echo server on {}", server.local_addr());

    let reactor = Reactor::spawn_default();
    for text in ["hello", "over", "unix"] {
        let reply = Request::to_addr(server.local_addr().clone())
            .fire(&reactor, &text)
            .await?;
        println!("{} -> {}", text, reply.decode::<String>()?);
    }

    server.stop();
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("Unix domain sockets are not available on this platform");
}
