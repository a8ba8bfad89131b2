//! Integration tests for end-to-end WebSocket synchronization.
//!
//! These tests run real sessions, a real server and real clients, and check
//! that the histories on both ends converge.

use futures_util::StreamExt;
use paint_collab::{
    ClientConfig, ConnectionState, HistorySnapshot, Package, PackageType, ServerConfig, Session,
    SessionConfig, SessionEvent, SessionHandle, SyncClient, SyncServer,
};
use paint_core::{CommandKind, CommandMemento, Pen, Point};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server for `session` on a free port, return the server and port.
async fn start_test_server(session: &SessionHandle) -> (Arc<SyncServer>, u16) {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_peers: 8,
    };
    let server = Arc::new(SyncServer::new(config, session));
    let running = server.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, port)
}

fn rect(x: i32) -> CommandMemento {
    CommandMemento::shape(
        CommandKind::Rectangle,
        Pen::new([200, 10, 10, 255], 2),
        Point::new(x, x),
        Point::new(x + 20, x + 10),
    )
}

/// Poll both sessions until their applied histories match at `len` commands.
async fn wait_converged(a: &SessionHandle, b: &SessionHandle, len: usize) -> HistorySnapshot {
    let result = timeout(Duration::from_secs(5), async {
        loop {
            let sa = a.snapshot().await.unwrap();
            let sb = b.snapshot().await.unwrap();
            if sa.commands.len() == len && sa.commands == sb.commands && sa.total_hash == sb.total_hash {
                return sa;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    result.expect("sessions did not converge")
}

async fn wait_for(events: &mut mpsc::Receiver<SessionEvent>, matches: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let session = Session::spawn(SessionConfig::default());
    let (server, port) = start_test_server(&session.handle()).await;
    let url = format!("ws://127.0.0.1:{port}");

    // Connect raw WebSocket
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.stats().total_connections, 1);
    assert_eq!(server.stats().active_connections, 1);
}

#[tokio::test]
async fn test_server_sends_hash_first() {
    let session = Session::spawn(SessionConfig::default());
    let handle = session.handle();
    handle.add(rect(1)).await.unwrap();
    let (_server, port) = start_test_server(&handle).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
        .await
        .unwrap();

    let frame = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("no frame from server")
        .unwrap()
        .unwrap();
    let Message::Binary(data) = frame else {
        panic!("Expected binary frame, got {frame:?}");
    };
    let package = Package::decode(&data).unwrap();
    assert_eq!(package.package_type, PackageType::HistoryHashUpdate);
    assert_eq!(package.total_hash().unwrap(), handle.snapshot().await.unwrap().total_hash);
}

#[tokio::test]
async fn test_client_connects() {
    let server_session = Session::spawn(SessionConfig::default());
    let (_server, port) = start_test_server(&server_session.handle()).await;

    let mut client_session = Session::spawn(SessionConfig::default());
    let mut events = client_session.take_event_rx().unwrap();
    let config = ClientConfig {
        url: format!("ws://127.0.0.1:{port}"),
    };
    let mut client = SyncClient::new(config, &client_session.handle());

    client.connect().await.unwrap();
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
    wait_for(&mut events, |e| matches!(e, SessionEvent::PeerConnected(_))).await;
}

#[tokio::test]
async fn test_joining_peer_receives_existing_history() {
    let server_session = Session::spawn(SessionConfig::default());
    let server_handle = server_session.handle();
    for x in 0..3 {
        server_handle.add(rect(x * 10)).await.unwrap();
    }
    let (_server, port) = start_test_server(&server_handle).await;

    let mut client_session = Session::spawn(SessionConfig::default());
    let mut events = client_session.take_event_rx().unwrap();
    let client_handle = client_session.handle();
    let mut client = SyncClient::new(
        ClientConfig {
            url: format!("ws://127.0.0.1:{port}"),
        },
        &client_handle,
    );
    client.connect().await.unwrap();

    let snapshot = wait_converged(&server_handle, &client_handle, 3).await;
    assert_eq!(snapshot.commands[2], rect(20));

    match wait_for(&mut events, |e| matches!(e, SessionEvent::Reconciled(_))).await {
        SessionEvent::Reconciled(report) => {
            assert_eq!(report.from_position, 0);
            assert_eq!(report.applied, 3);
        }
        other => panic!("Expected Reconciled, got {other:?}"),
    }
}

#[tokio::test]
async fn test_edits_flow_both_ways() {
    let mut server_session = Session::spawn(SessionConfig::default());
    let mut server_events = server_session.take_event_rx().unwrap();
    let server_handle = server_session.handle();
    let (_server, port) = start_test_server(&server_handle).await;

    let mut client_session = Session::spawn(SessionConfig::default());
    let mut client_events = client_session.take_event_rx().unwrap();
    let client_handle = client_session.handle();
    let mut client = SyncClient::new(
        ClientConfig {
            url: format!("ws://127.0.0.1:{port}"),
        },
        &client_handle,
    );
    client.connect().await.unwrap();

    wait_for(&mut server_events, |e| matches!(e, SessionEvent::PeerConnected(_))).await;
    wait_for(&mut client_events, |e| matches!(e, SessionEvent::PeerConnected(_))).await;
    // Let the server's initial hash settle before anyone draws
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Client draws, server follows
    client_handle.add(rect(1)).await.unwrap();
    wait_converged(&server_handle, &client_handle, 1).await;

    // Server draws, client follows
    server_handle.add(rect(2)).await.unwrap();
    wait_converged(&server_handle, &client_handle, 2).await;

    // Undo on the client shortens the server's history too
    assert!(client_handle.undo().await.unwrap());
    wait_converged(&server_handle, &client_handle, 1).await;
}

#[tokio::test]
async fn test_peer_disconnect_is_reported() {
    let mut server_session = Session::spawn(SessionConfig::default());
    let mut events = server_session.take_event_rx().unwrap();
    let (server, port) = start_test_server(&server_session.handle()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::PeerConnected(_))).await;

    ws.close(None).await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::PeerDisconnected(_))).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.stats().active_connections, 0);
}

#[tokio::test]
async fn test_garbage_frame_is_dropped() {
    let server_session = Session::spawn(SessionConfig::default());
    let server_handle = server_session.handle();
    server_handle.add(rect(5)).await.unwrap();
    let (_server, port) = start_test_server(&server_handle).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
        .await
        .unwrap();
    use futures_util::SinkExt;
    ws.send(Message::Binary(vec![0xFF, 0xFE, 0xFD].into())).await.unwrap();

    // Connection stays usable: a hashes request is still answered
    let request = Package::hashes_request().encode().unwrap();
    ws.send(Message::Binary(request.into())).await.unwrap();

    let answered = timeout(Duration::from_secs(2), async {
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Binary(data) = frame {
                let package = Package::decode(&data).unwrap();
                if package.package_type == PackageType::CommandHashesResponse {
                    return package.command_hashes().unwrap();
                }
            }
        }
        panic!("connection closed");
    })
    .await
    .unwrap();
    assert_eq!(answered.len(), 1);
}
