//! Session actor: a single Tokio task that owns the registry, the peer
//! table and the tick clock.
//!
//! Nothing else mutates session state. [`NetworkSession`] handles talk to
//! the actor through [`SessionCommand`]s, and peer I/O tasks report through
//! [`PeerEvent`]s, so received bytes are only ever turned into registry
//! changes here, one event at a time.
//!
//! [`NetworkSession`]: crate::NetworkSession

use std::future::pending;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use replicast_protocol::{
    ContractId, Directive, Message, NetId, PlayerId, Role, Transform, decode,
    encode,
};
use replicast_registry::{ContractTable, ObjectInfo, Registry};
use replicast_session::{
    Frame, Peer, PeerEvent, PeerTable, SessionConfig, SessionError,
    SessionState,
};
use replicast_tick::{TickClock, TickInfo};
use replicast_transport::{
    Connection, TcpConnection, TcpTransport, Transport, TransportError,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::session::SessionSlot;
use crate::{ReplicastError, SessionEvent, SessionStatus};

/// On a client, the server is the only peer and always has this id.
pub(crate) const SERVER_PEER: PlayerId = PlayerId(0);

/// Pause before accepting again after an accept error.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ReplicastError>>;

/// Commands sent to the session actor through its channel.
pub(crate) enum SessionCommand {
    StartServer {
        reply: Reply<SocketAddr>,
    },
    StartClient {
        addr: SocketAddr,
        reply: Reply<()>,
    },
    /// Answered once the session is idle again.
    Leave {
        reply: Reply<()>,
    },
    StopListening {
        reply: oneshot::Sender<bool>,
    },
    Spawn {
        contract: ContractId,
        owner: PlayerId,
        transform: Transform,
        reply: Reply<NetId>,
    },
    Destroy {
        net_id: NetId,
        reply: oneshot::Sender<bool>,
    },
    /// Component traffic from outside a behavior. Only queued if the
    /// session currently has role `role`.
    Send {
        role: Role,
        net_id: NetId,
        command: String,
        payload: Vec<String>,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Objects {
        reply: oneshot::Sender<Vec<ObjectInfo>>,
    },
    /// Leave gracefully, release the session slot and stop the actor.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// An outbound connect in flight.
struct Connecting {
    addr: SocketAddr,
    task: JoinHandle<Result<TcpConnection, TransportError>>,
    reply: Reply<()>,
}

pub(crate) struct SessionActor {
    config: SessionConfig,
    state: SessionState,
    role: Role,
    local_player: PlayerId,
    registry: Registry,
    peers: PeerTable,
    clock: TickClock,
    listener: Option<TcpTransport>,
    listen_addr: Option<SocketAddr>,
    /// Set after an accept error; no accept is attempted before it.
    accept_resume: Option<Instant>,
    connecting: Option<Connecting>,
    leave_deadline: Option<Instant>,
    leave_waiters: Vec<Reply<()>>,
    commands: mpsc::Receiver<SessionCommand>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    events: broadcast::Sender<SessionEvent>,
    slot: Option<SessionSlot>,
}

impl SessionActor {
    pub(crate) fn new(
        config: SessionConfig,
        contracts: Arc<ContractTable>,
        commands: mpsc::Receiver<SessionCommand>,
        events: broadcast::Sender<SessionEvent>,
        slot: Option<SessionSlot>,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Self {
            clock: TickClock::new(config.tick_config()),
            peers: PeerTable::new(config.max_connections),
            config,
            state: SessionState::Idle,
            role: Role::Inactive,
            local_player: PlayerId::UNASSIGNED,
            registry: Registry::new(contracts),
            listener: None,
            listen_addr: None,
            accept_resume: None,
            connecting: None,
            leave_deadline: None,
            leave_waiters: Vec::new(),
            commands,
            peer_tx,
            peer_rx,
            events,
            slot,
        }
    }

    /// Runs until a shutdown command arrives or every handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!("session actor started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let reply = match command {
                        Some(command) => match self.handle_command(command) {
                            ControlFlow::Continue(()) => continue,
                            ControlFlow::Break(reply) => Some(reply),
                        },
                        None => None,
                    };
                    self.shutdown().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    return;
                }
                Some(event) = self.peer_rx.recv() => {
                    self.handle_peer_event(event);
                }
                accepted = accept(&mut self.listener, self.accept_resume) => {
                    self.handle_accept(accepted);
                }
                connected = connect_result(&mut self.connecting) => {
                    self.handle_connected(connected);
                }
                info = self.clock.wait_for_tick() => {
                    self.handle_tick(info);
                }
                () = deadline(self.leave_deadline) => {
                    self.handle_leave_timeout();
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn handle_command(
        &mut self,
        command: SessionCommand,
    ) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            SessionCommand::StartServer { reply } => {
                let _ = reply.send(self.start_server());
            }
            SessionCommand::StartClient { addr, reply } => {
                self.start_client(addr, reply);
            }
            SessionCommand::Leave { reply } => self.leave(Some(reply)),
            SessionCommand::StopListening { reply } => {
                let _ = reply.send(self.stop_listening());
            }
            SessionCommand::Spawn {
                contract,
                owner,
                transform,
                reply,
            } => {
                let result = self
                    .registry
                    .spawn(contract, owner, transform)
                    .map_err(ReplicastError::from);
                let _ = reply.send(result);
            }
            SessionCommand::Destroy { net_id, reply } => {
                // Clients only lose objects through the server's Delete.
                let removed =
                    self.registry.is_authority() && self.registry.destroy(net_id);
                let _ = reply.send(removed);
            }
            SessionCommand::Send {
                role,
                net_id,
                command,
                payload,
                reply,
            } => {
                let queued = self.role == role
                    && self.state == SessionState::Connected
                    && self.registry.enqueue_outgoing(net_id, &command, &payload);
                let _ = reply.send(queued);
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SessionCommand::Objects { reply } => {
                let _ = reply.send(self.registry.objects());
            }
            SessionCommand::Shutdown { reply } => {
                return ControlFlow::Break(reply);
            }
        }
        ControlFlow::Continue(())
    }

    fn start_server(&mut self) -> Result<SocketAddr, ReplicastError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyActive.into());
        }

        let transport =
            TcpTransport::bind(self.config.socket_addr(), self.config.backlog())?;
        let addr = transport.local_addr()?;

        self.role = Role::Server;
        self.local_player = PlayerId::WORLD;
        self.registry.set_role(Role::Server);
        self.registry.set_local_player(PlayerId::WORLD);
        self.state.transition(SessionState::Connected)?;

        for contract in self.config.bootstrap_objects.clone() {
            if let Err(e) =
                self.registry
                    .spawn(contract, PlayerId::WORLD, Transform::default())
            {
                self.teardown();
                return Err(e.into());
            }
        }

        self.listener = Some(transport);
        self.listen_addr = Some(addr);
        self.clock.start();
        info!(%addr, objects = self.registry.len(), "server listening");
        self.emit(SessionEvent::Connected(Role::Server));
        Ok(addr)
    }

    fn start_client(&mut self, addr: SocketAddr, reply: Reply<()>) {
        if self.state != SessionState::Idle {
            let _ = reply.send(Err(SessionError::AlreadyActive.into()));
            return;
        }
        if let Err(e) = self.state.transition(SessionState::Connecting) {
            let _ = reply.send(Err(e.into()));
            return;
        }

        self.role = Role::Client;
        info!(%addr, "connecting to server");
        self.connecting = Some(Connecting {
            addr,
            task: tokio::spawn(TcpConnection::connect(addr)),
            reply,
        });
    }

    fn stop_listening(&mut self) -> bool {
        let stopped = self.listener.take().is_some();
        if let Some(addr) = self.listen_addr.take() {
            info!(%addr, "stopped accepting clients");
        }
        stopped
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            role: self.role,
            state: self.state,
            local_player: self.local_player,
            connection_count: self.peers.len(),
            object_count: self.registry.len(),
            listening: self.listen_addr,
            tick: self.clock.tick_count(),
        }
    }

    // -----------------------------------------------------------------------
    // Connect / accept
    // -----------------------------------------------------------------------

    fn handle_connected(
        &mut self,
        result: Result<TcpConnection, TransportError>,
    ) {
        let Some(Connecting { addr, reply, .. }) = self.connecting.take() else {
            return;
        };

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                warn!(%addr, error = %e, "connect failed");
                self.teardown();
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        if let Err(e) = self.state.transition(SessionState::Connected) {
            self.teardown();
            let _ = reply.send(Err(e.into()));
            return;
        }
        self.local_player = PlayerId::UNASSIGNED;
        self.registry.set_role(Role::Client);
        self.registry.set_local_player(PlayerId::UNASSIGNED);
        self.peers
            .insert(Peer::spawn(SERVER_PEER, conn, self.peer_tx.clone()));
        self.registry.set_connection_count(self.peers.len());
        self.clock.start();

        info!(%addr, "connected to server");
        self.emit(SessionEvent::Connected(Role::Client));
        let _ = reply.send(Ok(()));
    }

    fn handle_accept(&mut self, accepted: Result<TcpConnection, TransportError>) {
        let conn = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    error = %e,
                    retry_ms = ACCEPT_BACKOFF.as_millis() as u64,
                    "accept failed"
                );
                self.accept_resume = Some(Instant::now() + ACCEPT_BACKOFF);
                return;
            }
        };
        self.accept_resume = None;
        if self.peers.is_full() {
            warn!(
                addr = %conn.peer_addr(),
                max_connections = self.config.max_connections,
                "connection limit reached, refusing client"
            );
            return;
        }

        let id = self.peers.allocate_id();
        let peer = Peer::spawn(id, conn, self.peer_tx.clone());
        let addr = peer.addr();

        // Identity first, then every live object, straight to this peer.
        match encode(&Message::player_id(id)) {
            Ok(mut greeting) => {
                greeting.push_str(&self.registry.replay_creates());
                if let Err(e) = peer.send(frame(greeting)) {
                    warn!(player = %id, error = %e, "cannot greet client");
                    self.peers.schedule_eviction(id);
                }
            }
            Err(e) => warn!(player = %id, error = %e, "cannot encode player id"),
        }
        self.peers.insert(peer);
        self.registry.set_connection_count(self.peers.len());

        // Its Create reaches everyone with the next batch.
        if let Err(e) =
            self.registry
                .spawn(ContractId::PLAYER, id, Transform::default())
        {
            warn!(player = %id, error = %e, "cannot spawn player object");
        }

        info!(player = %id, %addr, clients = self.peers.len(), "client connected");
        self.emit(SessionEvent::ClientConnected(id));
        self.apply_evictions();
    }

    // -----------------------------------------------------------------------
    // Peer events
    // -----------------------------------------------------------------------

    fn handle_peer_event(&mut self, event: PeerEvent) {
        let Some(peer) = self.peers.for_event(&event) else {
            trace!(
                peer = %event.peer(),
                conn = %event.conn(),
                "event from a departed connection ignored"
            );
            return;
        };

        match event {
            PeerEvent::Received { bytes, .. } => {
                let from = peer.id();
                let lines = peer.receive(&bytes);
                for line in lines {
                    self.dispatch(from, &line);
                    if !self.peers.contains(from) {
                        break;
                    }
                }
            }
            PeerEvent::Sent { .. } => {
                peer.confirm_sent();
                let confirmed = peer.is_confirmed();
                if confirmed && self.state == SessionState::Disconnecting {
                    info!(player = %self.local_player, "disconnect delivered, leaving");
                    self.end_session();
                }
            }
            PeerEvent::Closed { peer: id, error, .. } => {
                self.handle_peer_closed(id, error);
            }
            PeerEvent::SendFailed { peer: id, error, .. } => {
                warn!(peer = %id, %error, "send failed, evicting");
                self.peers.schedule_eviction(id);
            }
        }

        self.apply_evictions();
    }

    fn handle_peer_closed(&mut self, id: PlayerId, error: Option<String>) {
        if let Some(error) = &error {
            debug!(peer = %id, %error, "receive failed");
        }
        match self.role {
            Role::Server => self.evict(id, "connection closed"),
            _ if self.state == SessionState::Disconnecting => {
                info!("server closed the connection, leave complete");
                self.end_session();
            }
            _ => {
                warn!("lost connection to server");
                self.end_session();
            }
        }
    }

    /// Applies one received line.
    fn dispatch(&mut self, from: PlayerId, line: &str) {
        let directive =
            match decode(line).and_then(|message| Directive::try_from(&message)) {
                Ok(directive) => directive,
                Err(e) => {
                    debug!(peer = %from, error = %e, line, "malformed message dropped");
                    return;
                }
            };

        match (self.role, directive) {
            (Role::Client, Directive::AssignPlayer(id)) => {
                info!(player = %id, "assigned player id");
                self.local_player = id;
                self.registry.set_local_player(id);
            }
            (Role::Client, Directive::Create(create)) => {
                if let Err(e) = self.registry.insert_remote(&create) {
                    warn!(net_id = %create.net_id, error = %e, "cannot mirror object");
                }
            }
            (Role::Client, Directive::Delete(net_id)) => {
                self.registry.destroy(net_id);
            }
            (Role::Client, Directive::Update(message)) => {
                self.registry.route(&message, |_| true);
            }
            (Role::Client, Directive::Disconnect(_)) => {
                info!("server ended the session");
                self.end_session();
            }
            (Role::Server, Directive::Command(message)) => {
                let peers = &self.peers;
                self.registry.route(&message, |owner| peers.contains(owner));
            }
            (Role::Server, Directive::Disconnect(id)) => {
                self.evict(id, "client left");
            }
            (role, directive) => {
                debug!(%role, peer = %from, ?directive, "message not valid for this role, dropped");
            }
        }
    }

    /// Removes a client and everything it owns. Server only.
    fn evict(&mut self, id: PlayerId, reason: &str) {
        let Some(peer) = self.peers.remove(id) else {
            return;
        };
        let addr = peer.addr();
        drop(peer);

        let removed = self.registry.destroy_owned_by(id);
        self.registry.set_connection_count(self.peers.len());
        info!(
            player = %id,
            %addr,
            objects = removed.len(),
            reason,
            "client disconnected"
        );
        self.emit(SessionEvent::ClientDisconnected(id));
    }

    fn apply_evictions(&mut self) {
        for id in self.peers.take_evictions() {
            if self.role == Role::Server {
                self.evict(id, "send failed");
            } else if self.state.is_active() {
                warn!("cannot reach server, leaving");
                self.end_session();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tick / flush
    // -----------------------------------------------------------------------

    fn handle_tick(&mut self, info: TickInfo) {
        for tick in info.ticks() {
            self.registry.tick(tick, info.dt);
            self.emit(SessionEvent::Tick(tick));
        }
        self.flush();
        self.clock.record_tick_end();
    }

    /// Sends everything queued since the last flush to every peer as one
    /// batch.
    fn flush(&mut self) {
        let Some(batch) = self.registry.take_batch() else {
            return;
        };
        let bytes = batch.len();
        let sent = self.peers.broadcast(&frame(batch));
        trace!(bytes, peers = sent, "batch flushed");
        self.apply_evictions();
    }

    // -----------------------------------------------------------------------
    // Leave / teardown
    // -----------------------------------------------------------------------

    fn leave(&mut self, reply: Option<Reply<()>>) {
        match (self.state, self.role) {
            (SessionState::Idle, _) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                return;
            }
            (SessionState::Connecting, _) => {
                if let Some(connecting) = self.connecting.take() {
                    connecting.task.abort();
                    let _ = connecting
                        .reply
                        .send(Err(SessionError::NotConnected.into()));
                }
                info!("connect cancelled");
                self.teardown();
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                return;
            }
            (SessionState::Disconnecting, _) => {}
            (SessionState::Connected, Role::Server) => self.leave_server(),
            (SessionState::Connected, _) => self.leave_client(),
        }

        if let Some(reply) = reply {
            if self.state.is_active() {
                self.leave_waiters.push(reply);
            } else {
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Sends Disconnect to the server and waits for it to be written, up to
    /// the leave timeout.
    fn leave_client(&mut self) {
        let goodbye = match encode(&Message::disconnect(self.local_player)) {
            Ok(text) => frame(text),
            Err(e) => {
                warn!(error = %e, "cannot encode disconnect, closing");
                self.end_session();
                return;
            }
        };

        let queued = match self.peers.get_mut(SERVER_PEER) {
            Some(server) => {
                server.begin_disconnect();
                server.send(goodbye).is_ok()
            }
            None => false,
        };
        if !queued {
            self.end_session();
            return;
        }

        if let Err(e) = self.state.transition(SessionState::Disconnecting) {
            warn!(error = %e, "unexpected state while leaving");
        }
        self.clock.stop();
        self.leave_deadline = Some(Instant::now() + self.config.leave_timeout());
        info!(player = %self.local_player, "leaving game");
    }

    /// Tells every client the session is over, then evicts them all.
    fn leave_server(&mut self) {
        match encode(&Message::disconnect(PlayerId::WORLD)) {
            Ok(text) => {
                let goodbye = frame(text);
                for peer in self.peers.peers_mut() {
                    peer.begin_disconnect();
                    let _ = peer.send(Arc::clone(&goodbye));
                }
            }
            Err(e) => warn!(error = %e, "cannot encode disconnect"),
        }

        for id in self.peers.ids() {
            self.evict(id, "server leaving");
        }
        info!(objects = self.registry.len(), "server stopped");
        self.end_session();
    }

    fn handle_leave_timeout(&mut self) {
        self.leave_deadline = None;
        warn!(
            timeout_ms = self.config.leave_timeout_ms,
            "disconnect not confirmed in time, closing"
        );
        self.end_session();
    }

    /// Tears down and tells everyone the session is over.
    fn end_session(&mut self) {
        let was_active = self.state.is_active();
        self.teardown();
        if was_active {
            self.emit(SessionEvent::Disconnected);
        }
        for waiter in self.leave_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Drops every connection and object and returns to idle.
    fn teardown(&mut self) {
        if let Some(connecting) = self.connecting.take() {
            connecting.task.abort();
            let _ = connecting.reply.send(Err(SessionError::NotConnected.into()));
        }
        self.listener = None;
        self.listen_addr = None;
        self.accept_resume = None;
        self.peers.reset();
        self.registry.reset();
        self.clock.stop();
        self.leave_deadline = None;
        self.role = Role::Inactive;
        self.local_player = PlayerId::UNASSIGNED;
        if self.state.is_active() {
            if let Err(e) = self.state.transition(SessionState::Idle) {
                warn!(error = %e, "forcing session to idle");
                self.state = SessionState::Idle;
            }
        }
    }

    /// Leaves gracefully, then gives up the session slot.
    async fn shutdown(&mut self) {
        self.leave(None);
        while self.state == SessionState::Disconnecting {
            tokio::select! {
                Some(event) = self.peer_rx.recv() => self.handle_peer_event(event),
                () = deadline(self.leave_deadline) => self.handle_leave_timeout(),
            }
        }
        self.slot.take();
        info!("session shut down");
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn frame(text: String) -> Frame {
    Arc::from(text.into_bytes())
}

async fn accept(
    listener: &mut Option<TcpTransport>,
    resume_at: Option<Instant>,
) -> Result<TcpConnection, TransportError> {
    let Some(listener) = listener else {
        return pending().await;
    };
    if let Some(at) = resume_at {
        sleep_until(at).await;
    }
    listener.accept().await
}

async fn connect_result(
    connecting: &mut Option<Connecting>,
) -> Result<TcpConnection, TransportError> {
    match connecting {
        Some(connecting) => match (&mut connecting.task).await {
            Ok(result) => result,
            Err(e) => Err(TransportError::ConnectionClosed(e.to_string())),
        },
        None => pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
