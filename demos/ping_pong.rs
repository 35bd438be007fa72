//! Ping/pong over discovery.
//!
//! This example demonstrates:
//! - Publishing a server under a service name
//! - A client that browses, auto-connects and sends requests
//! - Replying under the inbound tag so the request is correlated
//!
//! ```sh
//! RUST_LOG=debug cargo run --example ping_pong
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wirelink::transport::PeerAddr;
use wirelink::{
    Client, Connection, ConnectionEvent, LocalDiscovery, Server, ServiceRecord,
};

const PING: u32 = 1;

#[derive(Serialize, Deserialize, Debug)]
struct Ping {
    seq: u32,
}

#[derive(Serialize, Deserialize, Debug)]
struct Pong {
    seq: u32,
    from: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let discovery = Arc::new(LocalDiscovery::new());

    let server = Server::builder()
        .bind(PeerAddr::tcp("127.0.0.1", 0))
        .publish(ServiceRecord::named("ponger"), discovery.clone())
        .listener(|conn: &Connection, event: &ConnectionEvent| match event {
            ConnectionEvent::Received(msg) if msg.command == PING => {
                let result = msg.decode::<Ping>().and_then(|ping| {
                    conn.respond(
                        msg.tag,
                        PING,
                        &Pong {
                            seq: ping.seq,
                            from: "ponger".to_string(),
                        },
                    )
                });
                if let Err(e) = result {
                    tracing::warn!("{} could not answer: {}", conn.id(), e);
                }
            }
            other => tracing::info!("server {}: {:?}", conn.id(), other),
        })
        .start()
        .await?;
    println!("server listening on {}", server.local_addr());

    let (connected_tx, mut connected_rx) = tokio::sync::mpsc::unbounded_channel();
    let client = Client::builder()
        .discovery(discovery)
        .listener(move |conn: &Connection, event: &ConnectionEvent| {
            if matches!(event, ConnectionEvent::Connected) {
                let _ = connected_tx.send(conn.clone());
            }
        })
        .start()
        .await?;

    let conn = connected_rx.recv().await.ok_or("client stopped")?;
    println!("client connected to {}", conn.identity());

    for seq in 0..3 {
        let reply = conn
            .request(PING, &Ping { seq })
            .with_timeout(Duration::from_secs(2))
            .await?;
        let pong: Pong = reply.decode()?;
        println!("ping {} -> {:?} (tag {})", seq, pong, reply.tag);
    }

    client.stop();
    server.stop();
    Ok(())
}
