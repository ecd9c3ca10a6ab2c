//! The behavior contract gameplay code implements.
//!
//! A [`Behavior`] is attached to one replicated object. The registry calls
//! it when component traffic arrives for the object, once per tick, and
//! around spawn and despawn. Every call gets a [`BehaviorContext`] scoped to
//! the object, which is the only way a behavior talks back to the network:
//! it can queue outgoing traffic for its own object, move the object, and
//! ask for spawns or its own destruction.

use replicast_protocol::{
    ContractId, Message, NetId, PlayerId, Role, Transform, encode_into,
};
use replicast_tick::Wait;
use tracing::{debug, trace, warn};

/// Read-only snapshot of the session that behaviors and routine predicates
/// can inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub role: Role,
    /// The server's local player is [`PlayerId::WORLD`]; a client's is the
    /// id the server assigned, or [`PlayerId::UNASSIGNED`] before that.
    pub local_player: PlayerId,
    pub connection_count: usize,
    pub object_count: usize,
    /// Number of the tick being processed (0 outside the tick loop).
    pub tick: u64,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            role: Role::Inactive,
            local_player: PlayerId::UNASSIGNED,
            connection_count: 0,
            object_count: 0,
            tick: 0,
        }
    }
}

/// Gameplay logic attached to a replicated object.
///
/// Only [`handle_message`](Self::handle_message) is required.
pub trait Behavior: Send + 'static {
    /// Component traffic for this object: an Update on a client, a Command
    /// on the server.
    fn handle_message(
        &mut self,
        ctx: &mut BehaviorContext<'_>,
        command: &str,
        payload: &[String],
    );

    /// Called once after the object is registered.
    fn on_spawn(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    /// Called on every tick while the session is connected.
    fn on_tick(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    /// The behavior's routine. Runs on the first tick after spawn, then
    /// whenever the returned [`Wait`] elapses. The default finishes at once.
    fn update(&mut self, _ctx: &mut BehaviorContext<'_>) -> Wait<SessionView> {
        Wait::Done
    }

    /// Called when the object is destroyed locally.
    fn on_despawn(&mut self, _ctx: &mut BehaviorContext<'_>) {}
}

/// A change a behavior asked for, applied after the current callback pass.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Request {
    Spawn {
        contract: ContractId,
        owner: PlayerId,
        transform: Transform,
    },
    Destroy(NetId),
}

/// A behavior's handle on its object and the session.
pub struct BehaviorContext<'a> {
    pub(crate) net_id: NetId,
    pub(crate) contract: ContractId,
    pub(crate) owner: PlayerId,
    pub(crate) view: &'a SessionView,
    pub(crate) transform: &'a mut Transform,
    pub(crate) outbox: &'a mut String,
    pub(crate) requests: &'a mut Vec<Request>,
}

impl BehaviorContext<'_> {
    pub fn net_id(&self) -> NetId {
        self.net_id
    }

    pub fn contract(&self) -> ContractId {
        self.contract
    }

    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    pub fn view(&self) -> &SessionView {
        self.view
    }

    pub fn role(&self) -> Role {
        self.view.role
    }

    pub fn is_server(&self) -> bool {
        self.view.role == Role::Server
    }

    pub fn is_client(&self) -> bool {
        self.view.role == Role::Client
    }

    /// `true` when this session controls the object: a client's own player
    /// object, or a world object on the server.
    pub fn is_local_player(&self) -> bool {
        self.view.local_player == self.owner
    }

    pub fn transform(&self) -> &Transform {
        &*self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        *self.transform = transform;
    }

    /// Queues a Command for this object. Ignored unless this is a client.
    pub fn send_to_server(&mut self, command: &str, payload: &[String]) {
        if !self.is_client() {
            trace!(net_id = %self.net_id, command, "send_to_server ignored, not a client");
            return;
        }
        self.queue(Message::command(self.net_id, command, payload));
    }

    /// Queues an Update for this object. Ignored unless this is the server.
    pub fn send_to_client(&mut self, command: &str, payload: &[String]) {
        if !self.is_server() {
            trace!(net_id = %self.net_id, command, "send_to_client ignored, not the server");
            return;
        }
        self.queue(Message::update(self.net_id, command, payload));
    }

    fn queue(&mut self, message: Message) {
        if let Err(e) = encode_into(&message, &mut *self.outbox) {
            warn!(net_id = %self.net_id, error = %e, "dropping unencodable component message");
        }
    }

    /// Asks for a new object once the current pass is over. Server only.
    pub fn spawn(&mut self, contract: ContractId, owner: PlayerId, transform: Transform) {
        if !self.is_server() {
            debug!(net_id = %self.net_id, %contract, "spawn request ignored, not the server");
            return;
        }
        self.requests.push(Request::Spawn {
            contract,
            owner,
            transform,
        });
    }

    /// Asks for this object to be destroyed once the current pass is over.
    /// Server only; clients learn about it through Delete.
    pub fn destroy_self(&mut self) {
        if !self.is_server() {
            debug!(net_id = %self.net_id, "destroy request ignored, not the server");
            return;
        }
        self.requests.push(Request::Destroy(self.net_id));
    }
}
