//! Peer I/O tests over loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use replicast_protocol::PlayerId;
use replicast_session::{Frame, Peer, PeerEvent, PeerTable, SessionError};
use replicast_transport::{Connection, TcpConnection, TcpTransport, Transport};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

/// A connected pair: (server side, client side).
async fn pair() -> (TcpConnection, TcpConnection) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut transport = TcpTransport::bind(addr, 16).unwrap();
    let addr = transport.local_addr().unwrap();
    let (server, client) = tokio::join!(transport.accept(), TcpConnection::connect(addr));
    (server.unwrap(), client.unwrap())
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for peer event")
        .expect("event channel closed")
}

async fn read_exact(conn: &TcpConnection, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        let chunk = tokio::time::timeout(Duration::from_secs(5), conn.recv())
            .await
            .expect("timed out reading")
            .unwrap()
            .expect("closed early");
        out.extend_from_slice(&chunk);
    }
    out
}

fn frame(text: &str) -> Frame {
    Arc::from(text.as_bytes())
}

// =========================================================================
// Peer
// =========================================================================

#[tokio::test]
async fn test_peer_reports_received_bytes_and_assembles_lines() {
    let (server, client) = pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut peer = Peer::spawn(PlayerId(0), server, tx);

    client.send(b"M|0|fire|1\nM|0|").await.unwrap();
    client.send(b"jump|\n").await.unwrap();

    let mut lines = Vec::new();
    while lines.len() < 2 {
        match next_event(&mut rx).await {
            PeerEvent::Received { peer: id, bytes, .. } => {
                assert_eq!(id, PlayerId(0));
                lines.extend(peer.receive(&bytes));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(lines, vec!["M|0|fire|1", "M|0|jump|"]);
}

#[tokio::test]
async fn test_peer_sends_frames_in_order() {
    let (server, client) = pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let peer = Peer::spawn(PlayerId(3), server, tx);

    peer.send(frame("P|3\n")).unwrap();
    peer.send(frame("C|0|-1|3|0.00|0.00|0.00|0.00|0.00|0.00|1.00\n"))
        .unwrap();

    let expected = "P|3\nC|0|-1|3|0.00|0.00|0.00|0.00|0.00|0.00|1.00\n";
    let got = read_exact(&client, expected.len()).await;
    assert_eq!(String::from_utf8(got).unwrap(), expected);
}

#[tokio::test]
async fn test_peer_confirms_only_frames_sent_while_disconnecting() {
    let (server, client) = pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut peer = Peer::spawn(PlayerId::WORLD, server, tx);

    peer.send(frame("U|0|hp|9\n")).unwrap();
    read_exact(&client, "U|0|hp|9\n".len()).await;
    assert!(rx.try_recv().is_err());

    peer.begin_disconnect();
    assert!(peer.is_disconnecting());
    assert!(!peer.is_confirmed());
    peer.send(frame("X|-1\n")).unwrap();

    match next_event(&mut rx).await {
        PeerEvent::Sent { peer: id, conn } => {
            assert_eq!(id, PlayerId::WORLD);
            assert_eq!(conn, peer.conn_id());
        }
        other => panic!("expected Sent, got {other:?}"),
    }
    peer.confirm_sent();
    assert!(peer.is_confirmed());
}

#[tokio::test]
async fn test_confirm_sent_ignored_before_disconnecting() {
    let (server, _client) = pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = Peer::spawn(PlayerId(0), server, tx);

    peer.confirm_sent();
    assert!(!peer.is_confirmed());
}

#[tokio::test]
async fn test_peer_reports_remote_close() {
    let (server, client) = pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let peer = Peer::spawn(PlayerId(1), server, tx);

    client.close().await.unwrap();
    drop(client);

    match next_event(&mut rx).await {
        PeerEvent::Closed { peer: id, conn, .. } => {
            assert_eq!(id, PlayerId(1));
            assert_eq!(conn, peer.conn_id());
        }
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dropping_peer_flushes_then_closes() {
    let (server, client) = pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let peer = Peer::spawn(PlayerId(0), server, tx);

    peer.send(frame("X|-1\n")).unwrap();
    drop(peer);

    let got = read_exact(&client, 5).await;
    assert_eq!(got, b"X|-1\n");
    let end = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(end.is_none());
}

// =========================================================================
// PeerTable
// =========================================================================

#[test]
fn test_allocate_id_is_sequential_and_survives_reset() {
    let mut table = PeerTable::new(4);
    assert_eq!(table.allocate_id(), PlayerId(0));
    assert_eq!(table.allocate_id(), PlayerId(1));
    assert_eq!(table.allocate_id(), PlayerId(2));

    table.reset();
    assert_eq!(table.allocate_id(), PlayerId(3));
}

#[test]
fn test_schedule_eviction_dedupes_and_keeps_order() {
    let mut table = PeerTable::new(4);
    table.schedule_eviction(PlayerId(2));
    table.schedule_eviction(PlayerId(0));
    table.schedule_eviction(PlayerId(2));

    assert_eq!(table.take_evictions(), vec![PlayerId(2), PlayerId(0)]);
    assert!(table.take_evictions().is_empty());
}

#[test]
fn test_send_to_unknown_peer_fails() {
    let table = PeerTable::new(4);
    let err = table.send_to(PlayerId(9), frame("P|9\n")).unwrap_err();
    assert!(matches!(err, SessionError::PeerNotFound(PlayerId(9))));
}

#[tokio::test]
async fn test_table_capacity_and_lookup() {
    let mut table = PeerTable::new(2);
    let (tx, _rx) = mpsc::unbounded_channel();

    let (a, _ca) = pair().await;
    let (b, _cb) = pair().await;
    let id_a = table.allocate_id();
    table.insert(Peer::spawn(id_a, a, tx.clone()));
    assert!(!table.is_full());
    let id_b = table.allocate_id();
    table.insert(Peer::spawn(id_b, b, tx));
    assert!(table.is_full());

    assert_eq!(table.len(), 2);
    assert_eq!(table.ids(), vec![PlayerId(0), PlayerId(1)]);
    assert!(table.contains(PlayerId(1)));

    assert!(table.remove(PlayerId(0)).is_some());
    assert!(!table.is_full());
    assert!(!table.contains(PlayerId(0)));
}

#[tokio::test]
async fn test_broadcast_reaches_every_peer() {
    let mut table = PeerTable::new(4);
    let (tx, _rx) = mpsc::unbounded_channel();

    let (a, ca) = pair().await;
    let (b, cb) = pair().await;
    let id = table.allocate_id();
    table.insert(Peer::spawn(id, a, tx.clone()));
    let id = table.allocate_id();
    table.insert(Peer::spawn(id, b, tx));

    let sent = table.broadcast(&frame("D|4\n"));
    assert_eq!(sent, 2);
    assert!(table.take_evictions().is_empty());

    assert_eq!(read_exact(&ca, 4).await, b"D|4\n");
    assert_eq!(read_exact(&cb, 4).await, b"D|4\n");
}

#[tokio::test]
async fn test_for_event_ignores_stale_connection() {
    let mut table = PeerTable::new(4);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (old, old_client) = pair().await;
    table.insert(Peer::spawn(PlayerId(0), old, tx.clone()));
    old_client.send(b"M|0|a|\n").await.unwrap();
    let stale = next_event(&mut rx).await;

    // Same player id, new connection.
    table.remove(PlayerId(0));
    let (new, _new_client) = pair().await;
    table.insert(Peer::spawn(PlayerId(0), new, tx));

    assert!(table.for_event(&stale).is_none());
}

#[tokio::test]
async fn test_drain_empties_table_in_id_order() {
    let mut table = PeerTable::new(4);
    let (tx, _rx) = mpsc::unbounded_channel();
    for _ in 0..3 {
        let (conn, _client) = pair().await;
        let id = table.allocate_id();
        table.insert(Peer::spawn(id, conn, tx.clone()));
    }

    let drained: Vec<PlayerId> = table.drain().iter().map(Peer::id).collect();
    assert_eq!(drained, vec![PlayerId(0), PlayerId(1), PlayerId(2)]);
    assert!(table.is_empty());
}
