//! Peer connections and the connection table.
//!
//! Each [`Peer`] runs two small I/O tasks over its transport connection:
//!
//! - a **reader** that forwards every received chunk to the session as a
//!   [`PeerEvent`], and reports when the socket closes;
//! - a **writer** that drains the peer's outgoing queue in order, and
//!   closes the connection once the queue is dropped and empty.
//!
//! The tasks never touch session state. Everything they learn travels back
//! as a [`PeerEvent`] and is applied by the session actor, which owns the
//! [`PeerTable`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use replicast_protocol::{LineAssembler, PlayerId};
use replicast_transport::{Connection, ConnectionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::SessionError;

/// Encoded bytes, shared between every peer a batch goes to.
pub type Frame = Arc<[u8]>;

/// What the I/O tasks report back to the session.
///
/// Every event names the connection it came from, so events from a peer
/// that has already been replaced can be told apart and ignored.
#[derive(Debug)]
pub enum PeerEvent {
    /// A chunk of bytes arrived.
    Received {
        peer: PlayerId,
        conn: ConnectionId,
        bytes: Vec<u8>,
    },
    /// The remote closed the connection, or receiving failed.
    Closed {
        peer: PlayerId,
        conn: ConnectionId,
        error: Option<String>,
    },
    /// A frame queued while disconnecting was fully written.
    Sent { peer: PlayerId, conn: ConnectionId },
    /// Writing failed. The writer stops after this.
    SendFailed {
        peer: PlayerId,
        conn: ConnectionId,
        error: String,
    },
}

impl PeerEvent {
    pub fn peer(&self) -> PlayerId {
        match self {
            PeerEvent::Received { peer, .. }
            | PeerEvent::Closed { peer, .. }
            | PeerEvent::Sent { peer, .. }
            | PeerEvent::SendFailed { peer, .. } => *peer,
        }
    }

    pub fn conn(&self) -> ConnectionId {
        match self {
            PeerEvent::Received { conn, .. }
            | PeerEvent::Closed { conn, .. }
            | PeerEvent::Sent { conn, .. }
            | PeerEvent::SendFailed { conn, .. } => *conn,
        }
    }
}

struct Outgoing {
    bytes: Frame,
    /// Report [`PeerEvent::Sent`] once written.
    confirm: bool,
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// One remote peer: a server's client, or a client's server.
///
/// Dropping a `Peer` stops its reader at once; the writer finishes the
/// frames already queued and then closes the connection.
pub struct Peer {
    id: PlayerId,
    conn: ConnectionId,
    addr: SocketAddr,
    assembler: LineAssembler,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    reader: JoinHandle<()>,
    disconnecting: bool,
    confirmed: bool,
}

impl Peer {
    /// Takes ownership of `connection` and starts its I/O tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<C: Connection>(
        id: PlayerId,
        connection: C,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        let conn = connection.id();
        let addr = connection.peer_addr();
        let connection = Arc::new(connection);

        let reader = tokio::spawn(read_loop(
            id,
            Arc::clone(&connection),
            events.clone(),
        ));

        let (outgoing, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(id, connection, queue, events));

        debug!(peer = %id, %conn, %addr, "peer I/O started");
        Self {
            id,
            conn,
            addr,
            assembler: LineAssembler::new(),
            outgoing,
            reader,
            disconnecting: false,
            confirmed: false,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues `bytes` for sending. Fails only if the writer has stopped.
    pub fn send(&self, bytes: Frame) -> Result<(), SessionError> {
        self.outgoing
            .send(Outgoing {
                bytes,
                confirm: self.disconnecting,
            })
            .map_err(|_| SessionError::NotConnected)
    }

    /// Feeds received bytes through the line assembler.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<String> {
        self.assembler.push(bytes)
    }

    /// Marks the peer as disconnecting. Frames sent from now on are
    /// confirmed through [`PeerEvent::Sent`].
    pub fn begin_disconnect(&mut self) {
        self.disconnecting = true;
    }

    /// Records a [`PeerEvent::Sent`]. Only counts while disconnecting.
    pub fn confirm_sent(&mut self) {
        if self.disconnecting {
            self.confirmed = true;
        }
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    /// Whether a frame sent while disconnecting has been fully written.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<C: Connection>(
    peer: PlayerId,
    connection: Arc<C>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let conn = connection.id();
    let error = loop {
        match connection.recv().await {
            Ok(Some(bytes)) => {
                trace!(%peer, bytes = bytes.len(), "received");
                let event = PeerEvent::Received { peer, conn, bytes };
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(None) => break None,
            Err(e) => break Some(e.to_string()),
        }
    };
    let _ = events.send(PeerEvent::Closed { peer, conn, error });
}

async fn write_loop<C: Connection>(
    peer: PlayerId,
    connection: Arc<C>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let conn = connection.id();
    while let Some(frame) = queue.recv().await {
        match connection.send(&frame.bytes).await {
            Ok(()) => {
                trace!(%peer, bytes = frame.bytes.len(), "sent");
                if frame.confirm {
                    let _ = events.send(PeerEvent::Sent { peer, conn });
                }
            }
            Err(e) => {
                let _ = events.send(PeerEvent::SendFailed {
                    peer,
                    conn,
                    error: e.to_string(),
                });
                return;
            }
        }
    }
    if let Err(e) = connection.close().await {
        debug!(%peer, error = %e, "close after last frame failed");
    }
}

// ---------------------------------------------------------------------------
// PeerTable
// ---------------------------------------------------------------------------

/// The session's connections, keyed by player id.
///
/// Server ids are handed out sequentially from 0 by
/// [`allocate_id`](Self::allocate_id). Evictions requested while iterating
/// are collected with [`schedule_eviction`](Self::schedule_eviction) and
/// applied afterwards from [`take_evictions`](Self::take_evictions).
pub struct PeerTable {
    peers: BTreeMap<PlayerId, Peer>,
    next_id: i32,
    capacity: usize,
    evictions: Vec<PlayerId>,
}

impl PeerTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: BTreeMap::new(),
            next_id: 0,
            capacity,
            evictions: Vec::new(),
        }
    }

    /// The next sequential player id.
    pub fn allocate_id(&mut self) -> PlayerId {
        let id = PlayerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, peer: Peer) {
        self.peers.insert(peer.id(), peer);
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.capacity
    }

    pub fn get(&self, id: PlayerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Looks up the peer an event came from. `None` if the event belongs
    /// to a connection that is no longer in the table.
    pub fn for_event(&mut self, event: &PeerEvent) -> Option<&mut Peer> {
        self.peers
            .get_mut(&event.peer())
            .filter(|peer| peer.conn_id() == event.conn())
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    /// Queues `bytes` for one peer.
    pub fn send_to(&self, id: PlayerId, bytes: Frame) -> Result<(), SessionError> {
        self.peers
            .get(&id)
            .ok_or(SessionError::PeerNotFound(id))?
            .send(bytes)
    }

    /// Queues `bytes` for every peer. Peers whose writer has stopped are
    /// scheduled for eviction. Returns how many peers it was queued for.
    pub fn broadcast(&mut self, bytes: &Frame) -> usize {
        let mut sent = 0;
        for (id, peer) in &self.peers {
            match peer.send(Arc::clone(bytes)) {
                Ok(()) => sent += 1,
                Err(_) => {
                    if !self.evictions.contains(id) {
                        self.evictions.push(*id);
                    }
                }
            }
        }
        sent
    }

    /// Marks `id` for eviction once the current pass is over.
    pub fn schedule_eviction(&mut self, id: PlayerId) {
        if !self.evictions.contains(&id) {
            self.evictions.push(id);
        }
    }

    /// Takes the ids scheduled for eviction, in scheduling order.
    pub fn take_evictions(&mut self) -> Vec<PlayerId> {
        std::mem::take(&mut self.evictions)
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    /// Removes every peer, in id order.
    pub fn drain(&mut self) -> Vec<Peer> {
        std::mem::take(&mut self.peers).into_values().collect()
    }

    /// Empties the table. Player ids keep counting, so an id is never
    /// handed out twice.
    pub fn reset(&mut self) {
        self.peers.clear();
        self.evictions.clear();
    }
}
