//! End-to-end scenarios over real sockets: servers, discovery-driven
//! clients and the one-shot request helper.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use wirelink::codec::MsgPackCodec;
use wirelink::protocol::{Header, HEADER_SIZE};
use wirelink::transport::PeerAddr;
use wirelink::{
    Client, Connection, ConnectionEvent, ConnectionState, LocalDiscovery, PeerIdentity, Reactor,
    Request, Server, ServiceListener, ServiceRecord, WirelinkError,
};

const WAIT: Duration = Duration::from_secs(5);

type Events = mpsc::UnboundedReceiver<(Connection, ConnectionEvent)>;

fn event_channel() -> (
    impl Fn(&Connection, &ConnectionEvent) + Send + Sync + 'static,
    Events,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = move |conn: &Connection, event: &ConnectionEvent| {
        let _ = tx.send((conn.clone(), event.clone()));
    };
    (listener, rx)
}

/// Wait for the first event matching `pred`, skipping the others.
async fn wait_for<F>(events: &mut Events, pred: F) -> (Connection, ConnectionEvent)
where
    F: Fn(&ConnectionEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let (conn, event) = events.recv().await.expect("listener dropped");
            if pred(&event) {
                return (conn, event);
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `check` until it returns true.
async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true")
}

/// Server answering every message with "pong" under the inbound tag.
async fn pong_server(
    bind: PeerAddr,
    publish: Option<(ServiceRecord, Arc<LocalDiscovery>)>,
    one_shot: bool,
) -> (Server, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut builder = Server::builder()
        .bind(bind)
        .one_shot(one_shot)
        .listener(move |conn: &Connection, event: &ConnectionEvent| {
            if let ConnectionEvent::Received(message) = event {
                let _ = conn.respond(message.tag, message.command, &"pong");
            }
            let _ = tx.send((conn.clone(), event.clone()));
        });
    if let Some((record, discovery)) = publish {
        builder = builder.publish(record, discovery);
    }
    (builder.start().await.unwrap(), rx)
}

fn loopback() -> PeerAddr {
    PeerAddr::tcp("127.0.0.1", 0)
}

fn socket_addr(server: &Server) -> String {
    format!("127.0.0.1:{}", server.local_addr().port())
}

#[tokio::test]
async fn scenario_a_client_discovers_and_connects() {
    let discovery = Arc::new(LocalDiscovery::new());
    let (server, mut server_events) = pong_server(
        loopback(),
        Some((ServiceRecord::named("scenario-a"), discovery.clone())),
        false,
    )
    .await;

    let (listener, mut client_events) = event_channel();
    let client = Client::builder()
        .discovery(discovery.clone())
        .listener(listener)
        .start()
        .await
        .unwrap();

    let (client_conn, _) =
        wait_for(&mut client_events, |e| matches!(e, ConnectionEvent::Connected)).await;
    wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Connected)).await;

    assert_eq!(
        client_conn.identity(),
        &PeerIdentity::Service(ServiceRecord::named("scenario-a"))
    );
    let members = client.connections().members().await.unwrap();
    assert_eq!(members, vec![client_conn]);
    assert_eq!(server.connections().len().await.unwrap(), 1);
    assert_eq!(
        client.services().await.unwrap(),
        vec![ServiceRecord::named("scenario-a")]
    );
}

#[tokio::test]
async fn scenario_b_request_gets_correlated_reply() {
    let discovery = Arc::new(LocalDiscovery::new());
    let (_server, mut server_events) = pong_server(
        loopback(),
        Some((ServiceRecord::named("scenario-b"), discovery.clone())),
        false,
    )
    .await;

    let (listener, mut client_events) = event_channel();
    let _client = Client::builder()
        .discovery(discovery)
        .listener(listener)
        .start()
        .await
        .unwrap();
    let (conn, _) =
        wait_for(&mut client_events, |e| matches!(e, ConnectionEvent::Connected)).await;

    let reply = conn.request(1, &"ping").with_timeout(WAIT).await.unwrap();
    assert_eq!(reply.command, 1);
    assert_eq!(reply.decode::<String>().unwrap(), "pong");

    let (_, event) =
        wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Received(_))).await;
    match event {
        ConnectionEvent::Received(message) => {
            assert_eq!(message.tag, reply.tag);
            assert_eq!(message.decode::<String>().unwrap(), "ping");
        }
        _ => unreachable!(),
    }

    // The reply was consumed by the callback, not surfaced as an event.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok((_, event)) = client_events.try_recv() {
        assert!(!matches!(event, ConnectionEvent::Received(_)));
    }
}

#[tokio::test]
#[allow(deprecated)]
async fn scenario_c_reset_peer_fails_and_leaves_set() {
    let (server, mut server_events) = pong_server(loopback(), None, false).await;

    let socket = TcpStream::connect(socket_addr(&server)).await.unwrap();
    let (accepted, _) =
        wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Connected)).await;

    // Close with RST instead of FIN.
    socket.set_linger(Some(Duration::ZERO)).unwrap();
    drop(socket);
    let _ = server.broadcast(1, &vec![0u8; 256 * 1024]);

    let mut failed_first = false;
    let mut disconnects = 0;
    timeout(WAIT, async {
        while disconnects == 0 {
            let (conn, event) = server_events.recv().await.unwrap();
            assert_eq!(conn, accepted);
            match event {
                ConnectionEvent::Failed(WirelinkError::Io(_)) => failed_first = true,
                ConnectionEvent::Disconnected => disconnects += 1,
                ConnectionEvent::Sent { .. } => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
    })
    .await
    .unwrap();

    assert!(failed_first);
    assert_eq!(accepted.state(), ConnectionState::Disconnected);
    assert!(server.connections().is_empty().await.unwrap());
}

#[tokio::test]
async fn scenario_c_malformed_header_fails_connection() {
    let config = wirelink::NetworkConfig::default().with_max_body_size(1024);
    let (tx, mut server_events) = mpsc::unbounded_channel();
    let server = Server::builder()
        .bind(loopback())
        .config(config)
        .listener(move |conn: &Connection, event: &ConnectionEvent| {
            let _ = tx.send((conn.clone(), event.clone()));
        })
        .start()
        .await
        .unwrap();

    let mut socket = TcpStream::connect(socket_addr(&server)).await.unwrap();
    wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Connected)).await;

    socket
        .write_all(&Header::object(1, 1, 4096).encode())
        .await
        .unwrap();

    let (_, event) = wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Failed(_))).await;
    assert!(matches!(
        event,
        ConnectionEvent::Failed(WirelinkError::MalformedHeader(_))
    ));
    wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Disconnected)).await;

    // The server closed its end.
    let mut buf = [0u8; 1];
    assert_eq!(timeout(WAIT, socket.read(&mut buf)).await.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn scenario_d_broadcast_with_one_unconnected_member() {
    let (server, mut server_events) = pong_server(loopback(), None, false).await;
    let mut first = TcpStream::connect(socket_addr(&server)).await.unwrap();
    let mut second = TcpStream::connect(socket_addr(&server)).await.unwrap();
    wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Connected)).await;
    wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Connected)).await;

    let idle = Connection::to_addr(server.reactor(), PeerAddr::tcp("127.0.0.1", 9));
    server.connections().add(&idle).unwrap();
    assert_eq!(server.connections().len().await.unwrap(), 3);

    server.broadcast(7, &"to everyone").unwrap();

    for socket in [&mut first, &mut second] {
        let mut buf = [0u8; HEADER_SIZE];
        timeout(WAIT, socket.read_exact(&mut buf)).await.unwrap().unwrap();
        let header = Header::decode(&buf).unwrap();
        assert_eq!(header.command, 7);

        assert_eq!(header.tag, 0);

        let mut body = vec![0u8; header.body_length as usize];
        socket.read_exact(&mut body).await.unwrap();
        assert_eq!(
            MsgPackCodec::decode::<String>(&body).unwrap(),
            "to everyone"
        );
    }

    let (conn, event) =
        wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Failed(_))).await;
    assert_eq!(conn, idle);
    assert!(matches!(
        event,
        ConnectionEvent::Failed(WirelinkError::NotConnected)
    ));
}

struct RecordingServices {
    wanted: &'static str,
    lost: mpsc::UnboundedSender<ServiceRecord>,
}

impl ServiceListener for RecordingServices {
    fn found(&self, record: &ServiceRecord, _more_coming: bool) -> bool {
        record.name == self.wanted
    }

    fn lost(&self, record: &ServiceRecord, _more_coming: bool) {
        let _ = self.lost.send(record.clone());
    }
}

#[tokio::test]
async fn found_listener_selects_services_when_auto_connect_is_off() {
    let discovery = Arc::new(LocalDiscovery::new());
    let (_wanted, _) = pong_server(
        loopback(),
        Some((ServiceRecord::named("wanted"), discovery.clone())),
        false,
    )
    .await;
    let (_ignored, _) = pong_server(
        loopback(),
        Some((ServiceRecord::named("ignored"), discovery.clone())),
        false,
    )
    .await;

    let (lost_tx, _lost_rx) = mpsc::unbounded_channel();
    let (listener, mut client_events) = event_channel();
    let client = Client::builder()
        .discovery(discovery)
        .auto_connect(false)
        .listener(listener)
        .service_listener(RecordingServices {
            wanted: "wanted",
            lost: lost_tx,
        })
        .start()
        .await
        .unwrap();

    let (conn, _) =
        wait_for(&mut client_events, |e| matches!(e, ConnectionEvent::Connected)).await;
    assert_eq!(
        conn.identity(),
        &PeerIdentity::Service(ServiceRecord::named("wanted"))
    );

    eventually(|| async { client.services().await.unwrap().len() == 2 }).await;
    assert_eq!(client.connections().len().await.unwrap(), 1);
}

#[tokio::test]
async fn manual_connect_to_service() {
    let discovery = Arc::new(LocalDiscovery::new());
    let record = ServiceRecord::named("manual");
    let (_server, _) = pong_server(loopback(), Some((record.clone(), discovery.clone())), false).await;

    let (listener, mut client_events) = event_channel();
    let client = Client::builder()
        .discovery(discovery)
        .auto_connect(false)
        .listener(listener)
        .start()
        .await
        .unwrap();

    eventually(|| async { !client.services().await.unwrap().is_empty() }).await;
    assert!(client.connections().is_empty().await.unwrap());

    client.connect_to_service(record.clone()).unwrap();
    client.connect_to_service(record).unwrap();
    wait_for(&mut client_events, |e| matches!(e, ConnectionEvent::Connected)).await;
    assert_eq!(client.connections().len().await.unwrap(), 1);
}

#[tokio::test]
async fn lost_service_cancels_its_connection() {
    let discovery = Arc::new(LocalDiscovery::new());
    let (server, _) = pong_server(
        loopback(),
        Some((ServiceRecord::named("leaving"), discovery.clone())),
        false,
    )
    .await;

    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
    let (listener, mut client_events) = event_channel();
    let client = Client::builder()
        .discovery(discovery.clone())
        .listener(listener)
        .service_listener(RecordingServices {
            wanted: "",
            lost: lost_tx,
        })
        .start()
        .await
        .unwrap();
    wait_for(&mut client_events, |e| matches!(e, ConnectionEvent::Connected)).await;

    server.stop();

    let lost = timeout(WAIT, lost_rx.recv()).await.unwrap().unwrap();
    assert_eq!(lost, ServiceRecord::named("leaving"));
    wait_for(&mut client_events, |e| matches!(e, ConnectionEvent::Disconnected)).await;

    assert!(client.services().await.unwrap().is_empty());
    eventually(|| async { client.connections().is_empty().await.unwrap() }).await;
    assert!(discovery.is_empty());
}

#[tokio::test]
async fn one_shot_server_closes_after_reply() {
    let (server, mut server_events) = pong_server(loopback(), None, true).await;
    let reactor = Reactor::spawn_default();

    let reply = Request::to_addr(server.local_addr().clone())
        .command(2)
        .timeout(WAIT)
        .fire(&reactor, &"ping")
        .await
        .unwrap();
    assert_eq!(reply.decode::<String>().unwrap(), "pong");

    wait_for(&mut server_events, |e| matches!(e, ConnectionEvent::Disconnected)).await;
    assert!(server.connections().is_empty().await.unwrap());
}

#[tokio::test]
async fn request_helper_resolves_named_service() {
    let discovery = Arc::new(LocalDiscovery::new());
    let record = ServiceRecord::named("request-target");
    let (_server, _) = pong_server(loopback(), Some((record.clone(), discovery.clone())), false).await;

    let reactor = Reactor::spawn_default();
    let reply = Request::to_service(record, discovery)
        .command(3)
        .fire(&reactor, &"ping")
        .await
        .unwrap();
    assert_eq!(reply.command, 3);
    assert_eq!(reply.decode::<String>().unwrap(), "pong");
}

#[tokio::test]
async fn request_helper_unknown_service_fails_resolution() {
    let discovery = Arc::new(LocalDiscovery::new());
    let reactor = Reactor::spawn_default();

    let result = Request::to_service(ServiceRecord::named("nobody"), discovery)
        .fire(&reactor, &"ping")
        .await;
    assert!(matches!(result, Err(WirelinkError::Resolution(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_round_trip() {
    let path = std::env::temp_dir().join(format!("wirelink-scenario-{}.sock", std::process::id()));
    let (server, _) = pong_server(PeerAddr::unix(&path), None, false).await;
    assert_eq!(server.local_addr(), &PeerAddr::unix(&path));

    let reactor = Reactor::spawn_default();
    let reply = Request::to_addr(PeerAddr::unix(&path))
        .fire(&reactor, &"ping")
        .await
        .unwrap();
    assert_eq!(reply.decode::<String>().unwrap(), "pong");

    server.stop();
}
