//! Tests for the object registry driven through its public API, with
//! recording behaviors standing in for gameplay code.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use replicast_protocol::{
    ComponentMessage, ContractId, CreateObject, Message, MessageKind, NetId,
    PlayerId, Role, decode_all,
};
use replicast_registry::{
    Behavior, BehaviorContext, ContractTable, Registry, RegistryError, Routed,
    SessionView, SpawnInfo, Transform, Vec3, Wait,
};

const DT: Duration = Duration::from_millis(20);

// =========================================================================
// Helpers
// =========================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// Records every callback as "<net id>:<event>".
struct Recorder {
    log: Log,
}

impl Behavior for Recorder {
    fn handle_message(
        &mut self,
        ctx: &mut BehaviorContext<'_>,
        command: &str,
        payload: &[String],
    ) {
        self.log.lock().unwrap().push(format!(
            "{}:msg:{command}:{}",
            ctx.net_id().0,
            payload.join(",")
        ));
    }

    fn on_spawn(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.log.lock().unwrap().push(format!("{}:spawn", ctx.net_id().0));
    }

    fn on_despawn(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.log.lock().unwrap().push(format!("{}:despawn", ctx.net_id().0));
    }
}

/// Answers every Command "ping" with an Update "pong", and every tick with
/// an Update "t".
struct Echo;

impl Behavior for Echo {
    fn handle_message(
        &mut self,
        ctx: &mut BehaviorContext<'_>,
        command: &str,
        _payload: &[String],
    ) {
        if command == "ping" {
            ctx.send_to_client("pong", &[]);
        }
        if command == "die" {
            ctx.destroy_self();
        }
        if command == "split" {
            let t = *ctx.transform();
            ctx.spawn(ContractId(1), ctx.owner(), t);
        }
    }

    fn on_tick(&mut self, ctx: &mut BehaviorContext<'_>) {
        ctx.send_to_client("t", &[ctx.view().tick.to_string()]);
    }
}

/// A routine that waits for a connection, then counts up every 2 ticks.
struct Counter {
    log: Log,
    runs: u32,
}

impl Behavior for Counter {
    fn handle_message(&mut self, _: &mut BehaviorContext<'_>, _: &str, _: &[String]) {}

    fn update(&mut self, ctx: &mut BehaviorContext<'_>) -> Wait<SessionView> {
        self.runs += 1;
        self.log
            .lock()
            .unwrap()
            .push(format!("run{}@{}", self.runs, ctx.view().tick));
        match self.runs {
            1 => Wait::until(|v: &SessionView| v.connection_count > 0),
            2 | 3 => Wait::Ticks(2),
            _ => Wait::Done,
        }
    }
}

fn table(log: &Log) -> Arc<ContractTable> {
    let player_log = Arc::clone(log);
    let crate_log = Arc::clone(log);
    let counter_log = Arc::clone(log);
    let table = ContractTable::new(move |_: &SpawnInfo| -> Vec<Box<dyn Behavior>> {
        vec![Box::new(Recorder {
            log: Arc::clone(&player_log),
        })]
    })
    .with_contract(ContractId(1), "crate", move |_: &SpawnInfo| -> Vec<Box<dyn Behavior>> {
        vec![
            Box::new(Recorder {
                log: Arc::clone(&crate_log),
            }),
            Box::new(Echo),
        ]
    })
    .unwrap()
    .with_contract(ContractId(2), "counter", move |_: &SpawnInfo| -> Vec<Box<dyn Behavior>> {
        vec![Box::new(Counter {
            log: Arc::clone(&counter_log),
            runs: 0,
        })]
    })
    .unwrap()
    .with_contract(ContractId(3), "static", |_: &SpawnInfo| -> Vec<Box<dyn Behavior>> {
        Vec::new()
    })
    .unwrap();
    Arc::new(table)
}

fn registry(role: Role) -> (Registry, Log) {
    let log: Log = Arc::default();
    let mut registry = Registry::new(table(&log));
    registry.set_role(role);
    registry.set_local_player(if role == Role::Server {
        PlayerId::WORLD
    } else {
        PlayerId(0)
    });
    (registry, log)
}

fn at(x: f32, y: f32, z: f32) -> Transform {
    Transform::at(Vec3::new(x, y, z))
}

fn batch(registry: &mut Registry) -> Vec<Message> {
    registry
        .take_batch()
        .map(|text| decode_all(&text).unwrap())
        .unwrap_or_default()
}

fn component(net_id: u32, command: &str, payload: &[&str]) -> ComponentMessage {
    ComponentMessage {
        net_id: NetId(net_id),
        command: command.into(),
        payload: payload.iter().map(|s| s.to_string()).collect(),
    }
}

// =========================================================================
// spawn
// =========================================================================

#[test]
fn test_spawn_ids_strictly_increase_and_are_never_reused() {
    let (mut reg, _) = registry(Role::Server);
    let a = reg.spawn(ContractId(3), PlayerId::WORLD, at(0.0, 0.0, 0.0)).unwrap();
    let b = reg.spawn(ContractId(3), PlayerId::WORLD, at(0.0, 0.0, 0.0)).unwrap();
    reg.destroy(b);
    reg.destroy(a);
    let c = reg.spawn(ContractId(3), PlayerId::WORLD, at(0.0, 0.0, 0.0)).unwrap();

    assert_eq!((a, b, c), (NetId(0), NetId(1), NetId(2)));
}

#[test]
fn test_spawn_queues_create_with_fixed_decimals() {
    let (mut reg, _) = registry(Role::Server);
    reg.spawn(ContractId(3), PlayerId::WORLD, at(1.0, 2.0, 3.0)).unwrap();

    let text = reg.take_batch().unwrap();
    assert_eq!(text, "C|3|-1|0|1.00|2.00|3.00|0.00|0.00|0.00|1.00\n");
    assert!(reg.take_batch().is_none(), "batch is cleared once taken");
}

#[test]
fn test_spawn_on_client_is_rejected() {
    let (mut reg, _) = registry(Role::Client);
    let result = reg.spawn(ContractId(3), PlayerId::WORLD, Transform::default());
    assert!(matches!(result, Err(RegistryError::NotAuthoritative)));
    assert!(reg.is_empty());
    assert!(!reg.has_pending());
}

#[test]
fn test_spawn_unknown_contract_is_error() {
    let (mut reg, _) = registry(Role::Server);
    let result = reg.spawn(ContractId(42), PlayerId::WORLD, Transform::default());
    assert!(matches!(result, Err(RegistryError::UnknownContract(ContractId(42)))));
    assert_eq!(reg.next_net_id(), NetId(0), "no id is burned on failure");
}

#[test]
fn test_spawn_runs_on_spawn_for_player_template() {
    let (mut reg, log) = registry(Role::Server);
    reg.spawn(ContractId::PLAYER, PlayerId(4), Transform::default()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["0:spawn"]);
    assert_eq!(reg.get(NetId(0)).unwrap().owner(), PlayerId(4));
}

// =========================================================================
// destroy
// =========================================================================

#[test]
fn test_destroy_queues_delete_and_runs_on_despawn() {
    let (mut reg, log) = registry(Role::Server);
    let id = reg.spawn(ContractId::PLAYER, PlayerId(0), Transform::default()).unwrap();
    reg.take_batch();

    assert!(reg.destroy(id));
    assert_eq!(batch(&mut reg), vec![Message::delete(id)]);
    assert!(log.lock().unwrap().contains(&"0:despawn".to_string()));
}

#[test]
fn test_destroy_unknown_id_still_queues_delete_on_server() {
    let (mut reg, _) = registry(Role::Server);
    assert!(!reg.destroy(NetId(77)));
    assert_eq!(batch(&mut reg), vec![Message::delete(NetId(77))]);
}

#[test]
fn test_destroy_on_client_queues_nothing() {
    let (mut reg, _) = registry(Role::Client);
    let create = CreateObject {
        contract: ContractId(3),
        owner: PlayerId::WORLD,
        net_id: NetId(5),
        transform: Transform::default(),
    };
    reg.insert_remote(&create).unwrap();
    assert!(reg.destroy(NetId(5)));
    assert!(reg.take_batch().is_none());
}

#[test]
fn test_destroy_owned_by_cascades_only_owned_objects() {
    let (mut reg, _) = registry(Role::Server);
    let world = reg.spawn(ContractId(3), PlayerId::WORLD, Transform::default()).unwrap();
    let mine = reg.spawn(ContractId::PLAYER, PlayerId(1), Transform::default()).unwrap();
    let theirs = reg.spawn(ContractId::PLAYER, PlayerId(2), Transform::default()).unwrap();
    let mine_too = reg.spawn(ContractId(3), PlayerId(1), Transform::default()).unwrap();
    reg.take_batch();

    let removed = reg.destroy_owned_by(PlayerId(1));

    assert_eq!(removed, vec![mine, mine_too]);
    assert!(reg.contains(world));
    assert!(reg.contains(theirs));
    assert_eq!(
        batch(&mut reg),
        vec![Message::delete(mine), Message::delete(mine_too)]
    );
}

// =========================================================================
// route
// =========================================================================

#[test]
fn test_route_unknown_net_id_is_dropped_silently() {
    let (mut reg, log) = registry(Role::Server);
    let routed = reg.route(&component(5, "I", &["0.5", "-1"]), |_| true);
    assert_eq!(routed, Routed::Unknown);
    assert!(reg.take_batch().is_none());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_route_delivers_to_every_behavior_in_order() {
    let (mut reg, log) = registry(Role::Server);
    let id = reg.spawn(ContractId(1), PlayerId::WORLD, Transform::default()).unwrap();
    reg.take_batch();

    let routed = reg.route(&component(id.0, "ping", &["a", "b"]), |_| false);

    assert_eq!(routed, Routed::Delivered, "world objects are never reclaimed");
    assert!(log.lock().unwrap().contains(&"0:msg:ping:a,b".to_string()));
    assert_eq!(batch(&mut reg), vec![Message::update(id, "pong", &[])]);
}

#[test]
fn test_route_reclaims_object_of_departed_owner() {
    let (mut reg, log) = registry(Role::Server);
    let id = reg.spawn(ContractId(1), PlayerId(3), Transform::default()).unwrap();
    reg.take_batch();

    let routed = reg.route(&component(id.0, "ping", &[]), |player| player != PlayerId(3));

    assert_eq!(routed, Routed::Reclaimed);
    assert!(!reg.contains(id));
    assert_eq!(batch(&mut reg), vec![Message::delete(id)]);
    assert!(!log.lock().unwrap().iter().any(|e| e.contains("msg")));
}

#[test]
fn test_route_on_client_never_reclaims() {
    let (mut reg, _) = registry(Role::Client);
    let create = CreateObject {
        contract: ContractId(1),
        owner: PlayerId(9),
        net_id: NetId(2),
        transform: Transform::default(),
    };
    reg.insert_remote(&create).unwrap();
    assert_eq!(reg.route(&component(2, "P", &["1"]), |_| false), Routed::Delivered);
}

// =========================================================================
// Deferred requests
// =========================================================================

#[test]
fn test_destroy_self_is_applied_after_the_pass() {
    let (mut reg, log) = registry(Role::Server);
    let id = reg.spawn(ContractId(1), PlayerId::WORLD, Transform::default()).unwrap();
    reg.take_batch();

    reg.route(&component(id.0, "die", &[]), |_| true);

    assert!(!reg.contains(id));
    let log = log.lock().unwrap();
    let msg = log.iter().position(|e| e == "0:msg:die:").unwrap();
    let despawn = log.iter().position(|e| e == "0:despawn").unwrap();
    assert!(msg < despawn);
}

#[test]
fn test_requested_spawn_gets_next_id() {
    let (mut reg, _) = registry(Role::Server);
    let id = reg.spawn(ContractId(1), PlayerId(0), at(4.0, 0.0, 0.0)).unwrap();
    reg.take_batch();

    reg.route(&component(id.0, "split", &[]), |_| true);

    let child = reg.get(NetId(1)).expect("requested spawn applied");
    assert_eq!(child.owner(), PlayerId(0));
    assert_eq!(child.transform().position, Vec3::new(4.0, 0.0, 0.0));
}

// =========================================================================
// Outgoing queues and batching
// =========================================================================

#[test]
fn test_enqueue_outgoing_marks_pending() {
    let (mut reg, _) = registry(Role::Server);
    let id = reg.spawn(ContractId(3), PlayerId::WORLD, Transform::default()).unwrap();
    reg.take_batch();
    assert!(!reg.has_pending());

    assert!(reg.enqueue_outgoing(id, "H", &["80".into()]));
    assert!(reg.has_pending());
    assert!(!reg.enqueue_outgoing(NetId(99), "H", &[]));
}

#[test]
fn test_enqueue_outgoing_kind_follows_role() {
    let (mut client, _) = registry(Role::Client);
    client
        .insert_remote(&CreateObject {
            contract: ContractId(3),
            owner: PlayerId(0),
            net_id: NetId(1),
            transform: Transform::default(),
        })
        .unwrap();
    client.enqueue_outgoing(NetId(1), "I", &["1".into(), "0".into()]);
    let sent = batch(&mut client);
    assert_eq!(sent[0].kind, MessageKind::Command);
}

#[test]
fn test_take_batch_concatenates_objects_preserving_each_order() {
    let (mut reg, _) = registry(Role::Server);
    let a = reg.spawn(ContractId(3), PlayerId::WORLD, Transform::default()).unwrap();
    let b = reg.spawn(ContractId(3), PlayerId::WORLD, Transform::default()).unwrap();
    reg.take_batch();

    reg.enqueue_outgoing(b, "x", &["1".into()]);
    reg.enqueue_outgoing(a, "y", &["2".into()]);
    reg.enqueue_outgoing(b, "z", &["3".into()]);

    let messages = batch(&mut reg);
    assert_eq!(messages.len(), 3);
    let of_b: Vec<&str> = messages
        .iter()
        .filter(|m| m.arg(0) == Some("1"))
        .filter_map(|m| m.arg(1))
        .collect();
    assert_eq!(of_b, vec!["x", "z"]);
    assert!(messages.contains(&Message::update(a, "y", &["2".into()])));
}

#[test]
fn test_take_batch_puts_control_before_component_traffic() {
    let (mut reg, _) = registry(Role::Server);
    let a = reg.spawn(ContractId(3), PlayerId::WORLD, Transform::default()).unwrap();
    reg.enqueue_outgoing(a, "H", &["1".into()]);

    let messages = batch(&mut reg);
    assert_eq!(messages[0].kind, MessageKind::Create);
    assert_eq!(messages[1].kind, MessageKind::Update);
}

#[test]
fn test_replay_creates_lists_every_live_object_once() {
    let (mut reg, _) = registry(Role::Server);
    reg.spawn(ContractId(3), PlayerId::WORLD, at(1.0, 2.0, 3.0)).unwrap();
    let gone = reg.spawn(ContractId(3), PlayerId::WORLD, Transform::default()).unwrap();
    reg.spawn(ContractId::PLAYER, PlayerId(0), Transform::default()).unwrap();
    reg.destroy(gone);

    let replay = decode_all(&reg.replay_creates()).unwrap();
    let ids: Vec<&str> = replay.iter().filter_map(|m| m.arg(2)).collect();
    assert_eq!(ids, vec!["0", "2"]);
    assert!(replay.iter().all(|m| m.kind == MessageKind::Create));
}

// =========================================================================
// Client mirror
// =========================================================================

#[test]
fn test_insert_remote_is_idempotent() {
    let (mut reg, log) = registry(Role::Client);
    let create = CreateObject {
        contract: ContractId::PLAYER,
        owner: PlayerId(0),
        net_id: NetId(3),
        transform: at(1.0, 0.0, 0.0),
    };
    assert!(reg.insert_remote(&create).unwrap());
    assert!(!reg.insert_remote(&create).unwrap());
    assert_eq!(reg.len(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["3:spawn"]);
}

#[test]
fn test_insert_remote_unknown_contract_is_error() {
    let (mut reg, _) = registry(Role::Client);
    let create = CreateObject {
        contract: ContractId(50),
        owner: PlayerId::WORLD,
        net_id: NetId(0),
        transform: Transform::default(),
    };
    assert!(reg.insert_remote(&create).is_err());
    assert!(reg.is_empty());
}

#[test]
fn test_reset_despawns_everything_without_deletes() {
    let (mut reg, log) = registry(Role::Server);
    reg.spawn(ContractId::PLAYER, PlayerId(0), Transform::default()).unwrap();
    reg.spawn(ContractId::PLAYER, PlayerId(1), Transform::default()).unwrap();

    reg.reset();

    assert!(reg.is_empty());
    assert!(reg.take_batch().is_none());
    assert_eq!(reg.next_net_id(), NetId(2), "ids are not reused after reset");
    assert_eq!(reg.role(), Role::Inactive);
    assert_eq!(
        log.lock().unwrap().iter().filter(|e| e.ends_with("despawn")).count(),
        2
    );
}

// =========================================================================
// Ticks and routines
// =========================================================================

#[test]
fn test_tick_runs_on_tick_for_every_object() {
    let (mut reg, _) = registry(Role::Server);
    let a = reg.spawn(ContractId(1), PlayerId::WORLD, Transform::default()).unwrap();
    let b = reg.spawn(ContractId(1), PlayerId::WORLD, Transform::default()).unwrap();
    reg.take_batch();

    reg.tick(7, DT);

    let messages = batch(&mut reg);
    assert_eq!(
        messages,
        vec![
            Message::update(a, "t", &["7".into()]),
            Message::update(b, "t", &["7".into()]),
        ]
    );
}

#[test]
fn test_routine_waits_until_predicate_then_counts_ticks() {
    let (mut reg, log) = registry(Role::Server);
    reg.spawn(ContractId(2), PlayerId::WORLD, Transform::default()).unwrap();

    reg.tick(1, DT); // first run, then waits for a connection
    reg.tick(2, DT);
    reg.set_connection_count(1);
    reg.tick(3, DT); // predicate holds
    reg.tick(4, DT);
    reg.tick(5, DT); // two ticks later
    reg.tick(6, DT);
    reg.tick(7, DT); // two ticks later, then done
    reg.tick(8, DT);
    reg.tick(9, DT);

    assert_eq!(
        *log.lock().unwrap(),
        vec!["run1@1", "run2@3", "run3@5", "run4@7"]
    );
}

#[test]
fn test_routine_stops_when_object_is_destroyed() {
    let (mut reg, log) = registry(Role::Server);
    let id = reg.spawn(ContractId(2), PlayerId::WORLD, Transform::default()).unwrap();
    reg.set_connection_count(1);
    reg.tick(1, DT);
    reg.destroy(id);
    reg.tick(2, DT);
    reg.tick(3, DT);

    assert_eq!(*log.lock().unwrap(), vec!["run1@1"]);
}
