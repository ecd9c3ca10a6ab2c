//! The object registry: the server's authoritative table of replicated
//! objects, or a client's mirror of it.
//!
//! The registry owns every object's behaviors, its pending outgoing text and
//! the control text (Create/Delete) produced by spawns and destroys. The
//! session drains all of it once per tick with [`Registry::take_batch`].
//!
//! Behavior callbacks never mutate the table directly. Spawn and destroy
//! requests made from inside a callback are queued and applied after the
//! pass over the table has finished.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use replicast_protocol::{
    ComponentMessage, ContractId, CreateObject, Message, NetId, PlayerId, Role,
    Transform, encode_into,
};
use replicast_tick::RoutineScheduler;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::behavior::Request;
use crate::{
    Behavior, BehaviorContext, ContractTable, RegistryError, SessionView,
    SpawnInfo, Template,
};

/// Bound on how many rounds of follow-up requests one pass may trigger.
const MAX_REQUEST_ROUNDS: usize = 16;

// ---------------------------------------------------------------------------
// ReplicatedObject
// ---------------------------------------------------------------------------

/// One replicated object and the behaviors attached to it.
pub struct ReplicatedObject {
    net_id: NetId,
    contract: ContractId,
    owner: PlayerId,
    transform: Transform,
    /// Encoded Command/Update text waiting for the next flush.
    outbox: String,
    behaviors: Vec<Box<dyn Behavior>>,
}

impl ReplicatedObject {
    pub fn net_id(&self) -> NetId {
        self.net_id
    }

    pub fn contract(&self) -> ContractId {
        self.contract
    }

    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Outgoing text not yet flushed.
    pub fn pending(&self) -> &str {
        &self.outbox
    }

    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    pub fn info(&self) -> ObjectInfo {
        ObjectInfo {
            net_id: self.net_id,
            contract: self.contract,
            owner: self.owner,
            transform: self.transform,
        }
    }

    /// Runs `f` on every behavior. Returns `true` if outgoing text was
    /// queued.
    fn each(
        &mut self,
        view: &SessionView,
        requests: &mut Vec<Request>,
        mut f: impl FnMut(&mut dyn Behavior, &mut BehaviorContext<'_>),
    ) -> bool {
        let before = self.outbox.len();
        for behavior in &mut self.behaviors {
            let mut ctx = BehaviorContext {
                net_id: self.net_id,
                contract: self.contract,
                owner: self.owner,
                view,
                transform: &mut self.transform,
                outbox: &mut self.outbox,
                requests: &mut *requests,
            };
            f(behavior.as_mut(), &mut ctx);
        }
        self.outbox.len() != before
    }

    /// Runs `f` on the behavior at `index`, if it exists.
    fn one<R>(
        &mut self,
        index: usize,
        view: &SessionView,
        requests: &mut Vec<Request>,
        f: impl FnOnce(&mut dyn Behavior, &mut BehaviorContext<'_>) -> R,
    ) -> Option<R> {
        let behavior = self.behaviors.get_mut(index)?;
        let mut ctx = BehaviorContext {
            net_id: self.net_id,
            contract: self.contract,
            owner: self.owner,
            view,
            transform: &mut self.transform,
            outbox: &mut self.outbox,
            requests,
        };
        Some(f(behavior.as_mut(), &mut ctx))
    }
}

impl fmt::Debug for ReplicatedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedObject")
            .field("net_id", &self.net_id)
            .field("contract", &self.contract)
            .field("owner", &self.owner)
            .field("transform", &self.transform)
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}

/// Plain-data snapshot of an object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInfo {
    pub net_id: NetId,
    pub contract: ContractId,
    pub owner: PlayerId,
    pub transform: Transform,
}

/// What happened to routed component traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Handed to every behavior of the object.
    Delivered,
    /// No object with that id; dropped.
    Unknown,
    /// The object's owner has no live connection, so the server destroyed
    /// the object instead of delivering.
    Reclaimed,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The replicated object table.
pub struct Registry {
    contracts: Arc<ContractTable>,
    view: SessionView,
    /// Keyed by net id, so iteration follows creation order.
    objects: BTreeMap<NetId, ReplicatedObject>,
    next_net_id: u32,
    /// Encoded Create/Delete text waiting for the next flush.
    control: String,
    pending: bool,
    requests: Vec<Request>,
    routines: RoutineScheduler<(NetId, usize), SessionView>,
}

impl Registry {
    pub fn new(contracts: Arc<ContractTable>) -> Self {
        Self {
            contracts,
            view: SessionView::default(),
            objects: BTreeMap::new(),
            next_net_id: 0,
            control: String::new(),
            pending: false,
            requests: Vec::new(),
            routines: RoutineScheduler::new(),
        }
    }

    pub fn contracts(&self) -> &Arc<ContractTable> {
        &self.contracts
    }

    // ----- Session view -----

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn role(&self) -> Role {
        self.view.role
    }

    pub fn is_authority(&self) -> bool {
        self.view.role.is_authority()
    }

    pub fn set_role(&mut self, role: Role) {
        self.view.role = role;
    }

    pub fn set_local_player(&mut self, player: PlayerId) {
        self.view.local_player = player;
    }

    pub fn set_connection_count(&mut self, count: usize) {
        self.view.connection_count = count;
    }

    // ----- Queries -----

    pub fn get(&self, net_id: NetId) -> Option<&ReplicatedObject> {
        self.objects.get(&net_id)
    }

    pub fn contains(&self, net_id: NetId) -> bool {
        self.objects.contains_key(&net_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Snapshot of every object, in net id order.
    pub fn objects(&self) -> Vec<ObjectInfo> {
        self.objects.values().map(ReplicatedObject::info).collect()
    }

    /// The id the next spawn will get.
    pub fn next_net_id(&self) -> NetId {
        NetId(self.next_net_id)
    }

    // ----- Spawn / destroy -----

    /// Creates an object, queues its Create and returns its id. Server
    /// only.
    pub fn spawn(
        &mut self,
        contract: ContractId,
        owner: PlayerId,
        transform: Transform,
    ) -> Result<NetId, RegistryError> {
        let net_id = self.spawn_inner(contract, owner, transform)?;
        self.apply_requests();
        Ok(net_id)
    }

    fn spawn_inner(
        &mut self,
        contract: ContractId,
        owner: PlayerId,
        transform: Transform,
    ) -> Result<NetId, RegistryError> {
        if !self.is_authority() {
            return Err(RegistryError::NotAuthoritative);
        }
        let template = self
            .contracts
            .template(contract)
            .cloned()
            .ok_or(RegistryError::UnknownContract(contract))?;

        let net_id = NetId(self.next_net_id);
        self.next_net_id += 1;

        self.push_control(&Message::create(contract, owner, net_id, &transform));
        self.register(
            SpawnInfo {
                net_id,
                contract,
                owner,
                transform,
            },
            template.as_ref(),
        );
        info!(%net_id, %contract, %owner, "object spawned");
        Ok(net_id)
    }

    /// Mirrors a Create received from the server. Returns `false` if the
    /// object already exists; the Create is then ignored.
    pub fn insert_remote(
        &mut self,
        create: &CreateObject,
    ) -> Result<bool, RegistryError> {
        if self.objects.contains_key(&create.net_id) {
            debug!(net_id = %create.net_id, "duplicate Create ignored");
            return Ok(false);
        }
        let template = self
            .contracts
            .template(create.contract)
            .cloned()
            .ok_or(RegistryError::UnknownContract(create.contract))?;

        self.register(
            SpawnInfo {
                net_id: create.net_id,
                contract: create.contract,
                owner: create.owner,
                transform: create.transform,
            },
            template.as_ref(),
        );
        debug!(
            net_id = %create.net_id,
            contract = %create.contract,
            owner = %create.owner,
            "object created from server"
        );
        self.apply_requests();
        Ok(true)
    }

    fn register(&mut self, info: SpawnInfo, template: &dyn Template) {
        let behaviors = template.instantiate(&info);
        let net_id = info.net_id;
        for index in 0..behaviors.len() {
            self.routines.start((net_id, index));
        }
        self.objects.insert(
            net_id,
            ReplicatedObject {
                net_id,
                contract: info.contract,
                owner: info.owner,
                transform: info.transform,
                outbox: String::new(),
                behaviors,
            },
        );
        self.view.object_count = self.objects.len();

        if let Some(object) = self.objects.get_mut(&net_id) {
            self.pending |=
                object.each(&self.view, &mut self.requests, |b, ctx| b.on_spawn(ctx));
        }
    }

    /// Removes an object. On the server a Delete is queued even when the id
    /// is unknown locally, so peers still hear about it. Returns whether an
    /// object was removed.
    pub fn destroy(&mut self, net_id: NetId) -> bool {
        let removed = self.destroy_inner(net_id);
        self.apply_requests();
        removed
    }

    fn destroy_inner(&mut self, net_id: NetId) -> bool {
        let removed = self.remove_local(net_id);
        if self.is_authority() {
            self.push_control(&Message::delete(net_id));
        }
        if removed {
            debug!(%net_id, "object destroyed");
        }
        removed
    }

    /// Destroys every object owned by `owner`. Returns the removed ids.
    pub fn destroy_owned_by(&mut self, owner: PlayerId) -> Vec<NetId> {
        let owned: Vec<NetId> = self
            .objects
            .values()
            .filter(|object| object.owner == owner)
            .map(|object| object.net_id)
            .collect();
        for net_id in &owned {
            self.destroy_inner(*net_id);
        }
        if !owned.is_empty() {
            info!(%owner, count = owned.len(), "destroyed objects of departed player");
        }
        self.apply_requests();
        owned
    }

    /// Drops the entry and runs `on_despawn`. Queues no control text.
    fn remove_local(&mut self, net_id: NetId) -> bool {
        let Some(mut object) = self.objects.remove(&net_id) else {
            return false;
        };
        self.view.object_count = self.objects.len();
        self.routines.cancel_where(|(id, _)| *id == net_id);
        object.each(&self.view, &mut self.requests, |b, ctx| b.on_despawn(ctx));
        true
    }

    /// Destroys every object locally without queuing Deletes and resets the
    /// table for a new session. Net ids keep counting from where they were,
    /// so an id handed out once is never reused.
    pub fn reset(&mut self) {
        let ids: Vec<NetId> = self.objects.keys().copied().collect();
        for net_id in ids {
            self.remove_local(net_id);
        }
        self.requests.clear();
        self.routines.clear();
        self.control.clear();
        self.pending = false;
        self.view = SessionView::default();
    }

    // ----- Component traffic -----

    /// Delivers component traffic to the addressed object.
    ///
    /// On the server, an object whose owner is neither the world nor a live
    /// connection (`is_live`) is destroyed instead.
    pub fn route(
        &mut self,
        message: &ComponentMessage,
        is_live: impl Fn(PlayerId) -> bool,
    ) -> Routed {
        let net_id = message.net_id;
        let Some(object) = self.objects.get_mut(&net_id) else {
            debug!(%net_id, command = %message.command, "message for unknown object dropped");
            return Routed::Unknown;
        };

        if self.view.role.is_authority()
            && !object.owner.is_world()
            && !is_live(object.owner)
        {
            let owner = object.owner;
            debug!(%net_id, %owner, "owner gone, reclaiming object");
            self.destroy(net_id);
            return Routed::Reclaimed;
        }

        self.pending |= object.each(&self.view, &mut self.requests, |b, ctx| {
            b.handle_message(ctx, &message.command, &message.payload)
        });
        self.apply_requests();
        Routed::Delivered
    }

    /// Queues component traffic for `net_id` as if its behaviors had sent
    /// it: an Update on the server, a Command on a client. Returns `false`
    /// if the object is unknown, the session is inactive or the text cannot
    /// be encoded.
    pub fn enqueue_outgoing(
        &mut self,
        net_id: NetId,
        command: &str,
        payload: &[String],
    ) -> bool {
        let message = match self.view.role {
            Role::Server => Message::update(net_id, command, payload),
            Role::Client => Message::command(net_id, command, payload),
            Role::Inactive => return false,
        };
        let Some(object) = self.objects.get_mut(&net_id) else {
            debug!(%net_id, command, "outgoing message for unknown object dropped");
            return false;
        };
        if let Err(e) = encode_into(&message, &mut object.outbox) {
            warn!(%net_id, error = %e, "dropping unencodable component message");
            return false;
        }
        self.pending = true;
        true
    }

    // ----- Ticks -----

    /// Runs one tick: `on_tick` for every behavior, then the routines that
    /// are due. `dt` is the step length, used for time-based waits.
    pub fn tick(&mut self, tick: u64, dt: Duration) {
        self.view.tick = tick;

        for object in self.objects.values_mut() {
            self.pending |=
                object.each(&self.view, &mut self.requests, |b, ctx| b.on_tick(ctx));
        }

        for (net_id, index) in self.routines.due(tick, &self.view) {
            let Some(object) = self.objects.get_mut(&net_id) else {
                continue;
            };
            let before = object.outbox.len();
            let Some(wait) =
                object.one(index, &self.view, &mut self.requests, |b, ctx| b.update(ctx))
            else {
                continue;
            };
            self.pending |= object.outbox.len() != before;
            self.routines.suspend((net_id, index), wait, tick, dt);
        }

        self.apply_requests();
    }

    // ----- Flush -----

    /// Whether anything is waiting to be flushed.
    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Takes everything queued since the last flush: control text first,
    /// then each object's outgoing text in net id order. Clears every
    /// queue. `None` when nothing is pending.
    pub fn take_batch(&mut self) -> Option<String> {
        if !self.pending {
            return None;
        }
        self.pending = false;

        let mut batch = std::mem::take(&mut self.control);
        for object in self.objects.values_mut() {
            batch.push_str(&object.outbox);
            object.outbox.clear();
        }
        (!batch.is_empty()).then_some(batch)
    }

    /// A Create for every live object, for a newly connected peer.
    pub fn replay_creates(&self) -> String {
        let mut out = String::new();
        for object in self.objects.values() {
            let create = Message::create(
                object.contract,
                object.owner,
                object.net_id,
                &object.transform,
            );
            if let Err(e) = encode_into(&create, &mut out) {
                warn!(net_id = %object.net_id, error = %e, "cannot replay object");
            }
        }
        out
    }

    fn push_control(&mut self, message: &Message) {
        match encode_into(message, &mut self.control) {
            Ok(()) => self.pending = true,
            Err(e) => warn!(kind = %message.kind, error = %e, "dropping control message"),
        }
    }

    fn apply_requests(&mut self) {
        for _ in 0..MAX_REQUEST_ROUNDS {
            if self.requests.is_empty() {
                return;
            }
            for request in std::mem::take(&mut self.requests) {
                match request {
                    Request::Spawn {
                        contract,
                        owner,
                        transform,
                    } => {
                        if let Err(e) = self.spawn_inner(contract, owner, transform) {
                            warn!(%contract, error = %e, "requested spawn failed");
                        }
                    }
                    Request::Destroy(net_id) => {
                        self.destroy_inner(net_id);
                    }
                }
            }
        }
        if !self.requests.is_empty() {
            warn!(
                dropped = self.requests.len(),
                "behavior requests kept spawning more requests, dropping the rest"
            );
            self.requests.clear();
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("view", &self.view)
            .field("objects", &self.objects.len())
            .field("next_net_id", &self.next_net_id)
            .field("pending", &self.pending)
            .finish()
    }
}
