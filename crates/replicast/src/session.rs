//! `NetworkSession` builder and handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use replicast_protocol::{ContractId, NetId, PlayerId, Role, Transform};
use replicast_registry::{ContractTable, ObjectInfo};
use replicast_session::{SessionConfig, SessionError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::actor::{SessionActor, SessionCommand};
use crate::{ReplicastError, SessionEvent, SessionStatus};

/// Capacity of the command channel between handles and the actor.
const COMMAND_CAPACITY: usize = 64;

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Proof that this session holds the process-wide session slot. Releases
/// the slot on drop.
pub(crate) struct SessionSlot(());

impl SessionSlot {
    fn claim() -> Result<Self, SessionError> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SessionSlot(()))
            .map_err(|_| SessionError::AlreadyActive)
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
        debug!("session slot released");
    }
}

/// Builder for a [`NetworkSession`].
///
/// # Example
///
/// ```rust,ignore
/// use replicast::prelude::*;
///
/// let contracts = ContractTable::new(|_: &SpawnInfo| Vec::new());
/// let session = NetworkSession::builder(contracts)
///     .config(SessionConfig::default())
///     .build()?;
/// let addr = session.start_server().await?;
/// ```
pub struct NetworkSessionBuilder {
    contracts: ContractTable,
    config: SessionConfig,
    exclusive: bool,
}

impl NetworkSessionBuilder {
    fn new(contracts: ContractTable) -> Self {
        Self {
            contracts,
            config: SessionConfig::default(),
            exclusive: true,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether the session claims the process-wide slot (default `true`).
    ///
    /// Turn this off to host a server and its clients in one process.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Validates the setup and starts the session task, idle.
    ///
    /// Fails if a bootstrap object names a contract the table cannot
    /// build, or if another exclusive session is still alive. Must be
    /// called from within a Tokio runtime.
    pub fn build(self) -> Result<NetworkSession, ReplicastError> {
        let config = self.config.validated();
        self.contracts
            .check_all(config.bootstrap_objects.iter().copied())?;

        let slot = if self.exclusive {
            Some(SessionSlot::claim()?)
        } else {
            None
        };

        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(config.event_capacity);
        let actor = SessionActor::new(
            config,
            Arc::new(self.contracts),
            receiver,
            events.clone(),
            slot,
        );
        tokio::spawn(actor.run());

        Ok(NetworkSession { commands, events })
    }
}

/// Handle to a running session.
///
/// Cheap to clone. The session task stops when [`shutdown`](Self::shutdown)
/// is called or the last handle is dropped; either way it first leaves the
/// game gracefully.
#[derive(Clone)]
pub struct NetworkSession {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl NetworkSession {
    pub fn builder(contracts: ContractTable) -> NetworkSessionBuilder {
        NetworkSessionBuilder::new(contracts)
    }

    /// Subscribes to session notifications from now on.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Binds, spawns the bootstrap objects and starts accepting clients.
    /// Returns the bound address.
    pub async fn start_server(&self) -> Result<SocketAddr, ReplicastError> {
        self.request(|reply| SessionCommand::StartServer { reply })
            .await?
    }

    /// Connects to a server. Resolves once connected; the player id
    /// arrives shortly after.
    pub async fn start_client(
        &self,
        addr: SocketAddr,
    ) -> Result<(), ReplicastError> {
        self.request(|reply| SessionCommand::StartClient { addr, reply })
            .await?
    }

    /// Leaves the game and resolves once the session is idle.
    ///
    /// A client tells the server first and waits up to the configured
    /// leave timeout for that to be written. A server tells every client
    /// and drops them. Idle sessions resolve at once.
    pub async fn leave_game(&self) -> Result<(), ReplicastError> {
        self.request(|reply| SessionCommand::Leave { reply }).await?
    }

    /// Stops accepting new clients without dropping current ones. Returns
    /// `false` if the session was not accepting.
    pub async fn stop_listening(&self) -> Result<bool, ReplicastError> {
        self.request(|reply| SessionCommand::StopListening { reply })
            .await
    }

    /// Spawns an object and returns its network id. Server only.
    pub async fn spawn(
        &self,
        contract: ContractId,
        owner: PlayerId,
        transform: Transform,
    ) -> Result<NetId, ReplicastError> {
        self.request(|reply| SessionCommand::Spawn {
            contract,
            owner,
            transform,
            reply,
        })
        .await?
    }

    /// Destroys an object and tells every client. Server only; returns
    /// whether an object was removed.
    pub async fn destroy(&self, net_id: NetId) -> Result<bool, ReplicastError> {
        self.request(|reply| SessionCommand::Destroy { net_id, reply })
            .await
    }

    /// Queues an Update for `net_id`'s behaviors on every client. Returns
    /// `false` unless this is a connected server and the object exists.
    pub async fn send_to_client(
        &self,
        net_id: NetId,
        command: &str,
        payload: &[String],
    ) -> Result<bool, ReplicastError> {
        self.send_as(Role::Server, net_id, command, payload).await
    }

    /// Queues a Command for `net_id`'s behaviors on the server. Returns
    /// `false` unless this is a connected client and the object exists.
    pub async fn send_to_server(
        &self,
        net_id: NetId,
        command: &str,
        payload: &[String],
    ) -> Result<bool, ReplicastError> {
        self.send_as(Role::Client, net_id, command, payload).await
    }

    pub async fn status(&self) -> Result<SessionStatus, ReplicastError> {
        self.request(|reply| SessionCommand::Status { reply }).await
    }

    /// Snapshot of every replicated object, in network id order.
    pub async fn objects(&self) -> Result<Vec<ObjectInfo>, ReplicastError> {
        self.request(|reply| SessionCommand::Objects { reply }).await
    }

    /// Leaves the game if needed and stops the session task. An exclusive
    /// session's slot is free once this returns.
    pub async fn shutdown(self) -> Result<(), ReplicastError> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    async fn send_as(
        &self,
        role: Role,
        net_id: NetId,
        command: &str,
        payload: &[String],
    ) -> Result<bool, ReplicastError> {
        let command = command.to_owned();
        let payload = payload.to_vec();
        self.request(|reply| SessionCommand::Send {
            role,
            net_id,
            command,
            payload,
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, ReplicastError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ReplicastError::Closed)?;
        response.await.map_err(|_| ReplicastError::Closed)
    }
}
