//! Tank arena gameplay: player tanks, wandering enemies and the spawner
//! that brings them in.
//!
//! Poses travel as an Update `"P"` with `x`, `z` and heading, trimmed to
//! two decimals. Tanks are driven by a Command `"I"` carrying throttle and
//! turn in `-1..=1`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use replicast::prelude::*;
use tracing::{debug, info};

/// Logical seconds per tick at the default 50 Hz.
pub const DT: f32 = 0.02;
/// The arena spans `-ARENA_HALF..=ARENA_HALF` on x and z.
pub const ARENA_HALF: f32 = 20.0;
pub const MAX_ENEMIES: u32 = 32;
pub const ENEMY_LIFETIME_TICKS: u64 = 400;

const TANK_SPEED: f32 = 6.0;
const TURN_RATE: f32 = 2.5;
const ENEMY_SPEED: f32 = 3.0;
const ENEMY_STEP_TICKS: u32 = 10;
const BOT_INPUT_EVERY: u64 = 25;
const SPAWN_INTERVAL: Duration = Duration::from_millis(500);

/// Templates by lookup key, for [`ContractTable::from_manifest`].
pub fn templates(enemy: ContractId) -> HashMap<String, Arc<dyn Template>> {
    let mut templates: HashMap<String, Arc<dyn Template>> = HashMap::new();
    templates.insert(
        "tank".into(),
        Arc::new(|_: &SpawnInfo| vec![Box::new(Tank::default()) as Box<dyn Behavior>]),
    );
    templates.insert(
        "enemy".into(),
        Arc::new(|_: &SpawnInfo| vec![Box::new(Enemy::default()) as Box<dyn Behavior>]),
    );
    templates.insert(
        "spawner".into(),
        Arc::new(move |_: &SpawnInfo| {
            vec![Box::new(Spawner::new(enemy)) as Box<dyn Behavior>]
        }),
    );
    templates
}

// ---------------------------------------------------------------------------
// Pose helpers
// ---------------------------------------------------------------------------

fn yaw(heading: f32) -> Quat {
    let half = heading / 2.0;
    Quat::new(0.0, half.sin(), 0.0, half.cos())
}

fn step(position: Vec3, heading: f32, distance: f32) -> Vec3 {
    Vec3::new(
        (position.x + heading.sin() * distance).clamp(-ARENA_HALF, ARENA_HALF),
        position.y,
        (position.z + heading.cos() * distance).clamp(-ARENA_HALF, ARENA_HALF),
    )
}

fn pose_payload(position: Vec3, heading: f32) -> Vec<String> {
    vec![
        format_compact(position.x),
        format_compact(position.z),
        format_compact(heading),
    ]
}

/// Moves the object to `position` facing `heading` and tells clients.
fn publish_pose(ctx: &mut BehaviorContext<'_>, position: Vec3, heading: f32) {
    ctx.set_transform(Transform {
        position,
        rotation: yaw(heading),
    });
    ctx.send_to_client("P", &pose_payload(position, heading));
}

/// Applies a `"P"` payload. Missing or malformed fields keep their value.
fn apply_pose(ctx: &mut BehaviorContext<'_>, heading: &mut f32, payload: &[String]) {
    let field = |index: usize, current: f32| {
        payload
            .get(index)
            .map_or(current, |text| parse_f32_or(text, current))
    };
    let mut transform = *ctx.transform();
    transform.position.x = field(0, transform.position.x);
    transform.position.z = field(1, transform.position.z);
    *heading = field(2, *heading);
    transform.rotation = yaw(*heading);
    ctx.set_transform(transform);
}

fn axis(payload: &[String], index: usize) -> f32 {
    payload
        .get(index)
        .map_or(0.0, |text| parse_f32_or(text, 0.0))
        .clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tank
// ---------------------------------------------------------------------------

/// A player's tank.
///
/// On the owning client a bot picks new input twice a second. The server
/// integrates the last input every tick and publishes the pose.
#[derive(Debug, Default)]
pub struct Tank {
    throttle: f32,
    turn: f32,
    heading: f32,
}

impl Behavior for Tank {
    fn handle_message(
        &mut self,
        ctx: &mut BehaviorContext<'_>,
        command: &str,
        payload: &[String],
    ) {
        match (ctx.role(), command) {
            (Role::Server, "I") => {
                self.throttle = axis(payload, 0);
                self.turn = axis(payload, 1);
            }
            (Role::Client, "P") => apply_pose(ctx, &mut self.heading, payload),
            (role, command) => {
                debug!(net_id = %ctx.net_id(), %role, command, "tank ignored message");
            }
        }
    }

    fn on_tick(&mut self, ctx: &mut BehaviorContext<'_>) {
        if ctx.is_server() {
            if self.throttle == 0.0 && self.turn == 0.0 {
                return;
            }
            self.heading += self.turn * TURN_RATE * DT;
            let position = step(
                ctx.transform().position,
                self.heading,
                self.throttle * TANK_SPEED * DT,
            );
            publish_pose(ctx, position, self.heading);
        } else if ctx.is_local_player() && ctx.view().tick % BOT_INPUT_EVERY == 0 {
            let mut rng = rand::rng();
            let throttle: f32 = rng.random_range(-0.2..=1.0);
            let turn: f32 = rng.random_range(-1.0..=1.0);
            ctx.send_to_server("I", &[format_compact(throttle), format_compact(turn)]);
        }
    }
}

// ---------------------------------------------------------------------------
// Enemy
// ---------------------------------------------------------------------------

/// A world-owned drone that wanders for a while and then expires.
#[derive(Debug, Default)]
pub struct Enemy {
    heading: f32,
    born: u64,
}

impl Behavior for Enemy {
    fn handle_message(
        &mut self,
        ctx: &mut BehaviorContext<'_>,
        command: &str,
        payload: &[String],
    ) {
        if ctx.is_client() && command == "P" {
            apply_pose(ctx, &mut self.heading, payload);
        }
    }

    fn on_spawn(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.born = ctx.view().tick;
        self.heading = rand::rng().random_range(-std::f32::consts::PI..=std::f32::consts::PI);
    }

    fn update(&mut self, ctx: &mut BehaviorContext<'_>) -> Wait<SessionView> {
        if !ctx.is_server() {
            return Wait::Done;
        }
        if ctx.view().tick.saturating_sub(self.born) >= ENEMY_LIFETIME_TICKS {
            debug!(net_id = %ctx.net_id(), "enemy expired");
            ctx.destroy_self();
            return Wait::Done;
        }

        self.heading += rand::rng().random_range(-0.5..=0.5);
        let distance = ENEMY_SPEED * DT * ENEMY_STEP_TICKS as f32;
        let position = step(ctx.transform().position, self.heading, distance);
        publish_pose(ctx, position, self.heading);
        Wait::Ticks(ENEMY_STEP_TICKS)
    }
}

// ---------------------------------------------------------------------------
// Spawner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitForPlayers,
    Spawning,
}

/// Waits until someone has joined, then drops an enemy at a random spot
/// every [`SPAWN_INTERVAL`] until [`MAX_ENEMIES`] have been spawned.
#[derive(Debug)]
pub struct Spawner {
    enemy: ContractId,
    phase: Phase,
    spawned: u32,
}

impl Spawner {
    pub fn new(enemy: ContractId) -> Self {
        Self {
            enemy,
            phase: Phase::WaitForPlayers,
            spawned: 0,
        }
    }
}

impl Behavior for Spawner {
    fn handle_message(&mut self, _: &mut BehaviorContext<'_>, _: &str, _: &[String]) {}

    fn update(&mut self, ctx: &mut BehaviorContext<'_>) -> Wait<SessionView> {
        if !ctx.is_server() {
            return Wait::Done;
        }
        match self.phase {
            Phase::WaitForPlayers => {
                self.phase = Phase::Spawning;
                Wait::until(|view: &SessionView| view.connection_count > 0)
            }
            Phase::Spawning if self.spawned >= MAX_ENEMIES => {
                info!(spawned = self.spawned, "spawner finished");
                Wait::Done
            }
            Phase::Spawning => {
                let mut rng = rand::rng();
                let at = Vec3::new(
                    rng.random_range(-ARENA_HALF..=ARENA_HALF),
                    0.0,
                    rng.random_range(-ARENA_HALF..=ARENA_HALF),
                );
                ctx.spawn(self.enemy, PlayerId::WORLD, Transform::at(at));
                self.spawned += 1;
                Wait::Elapsed(SPAWN_INTERVAL)
            }
        }
    }
}
