//! Per-actor movement state machine.
//!
//! A controller drives either a discrete step move (a named move from its
//! move set, paced by the move's cycle) or continuous physics motion toward
//! a direction, point, entity or path, never both. It also holds the actor's
//! side of the collision hierarchy; the cross-actor half lives in
//! [`crate::hierarchy`].

use std::collections::{BTreeSet, HashMap};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::codec::{self, CodecError};
use crate::collision::{CollisionProbe, WorldQuery};
use crate::components::ActorBody;
use crate::config::MovementConfig;
use crate::direction::Direction;
use crate::entity::EntityHandle;
use crate::events::{self, MovementEventBus};
use crate::geometry::{registered_tile_rect, TileRect};
use crate::moves::{MoveDef, MoveId, MoveSet};
use crate::pathfinding::{AgentId, PathManager, Waypoint};
use crate::physics_core::{self, PhysicsCounters, PhysicsSettings};
use crate::survey::{Survey, SurveyFlags};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepMotion {
    pub move_id: MoveId,
    pub direction: Direction,
    /// Tiles to travel before the move ends.
    pub end_distance: f32,
    /// Tiles travelled so far.
    pub distance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PhysicsMode {
    /// Coast to a stop.
    Idle,
    Direction { heading: Vec2 },
    Point { target: Vec2 },
    Entity { target: EntityHandle, offset: Vec2 },
    Path { agent: AgentId, goal: Vec2 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Motion {
    #[default]
    Idle,
    Step(StepMotion),
    Physics {
        mode: PhysicsMode,
        settings: PhysicsSettings,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct RequestFlags(pub u8);

impl RequestFlags {
    /// Select a move for this request at the next update-changes pass.
    pub const RESELECT: Self = Self(1 << 0);
    /// Never expires on failure; re-selects after every finished move.
    pub const PERSISTENT: Self = Self(1 << 1);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub direction: Direction,
    pub end_distance: f32,
    pub flags: RequestFlags,
}

/// Everything a controller reads or writes during the update pass besides
/// its own actor.
pub struct UpdateContext<'a, W: ?Sized> {
    pub world: &'a W,
    pub moves: Option<&'a MoveSet>,
    pub paths: &'a mut PathManager,
    pub events: &'a mut MovementEventBus,
    pub config: &'a MovementConfig,
    pub counters: &'a mut PhysicsCounters,
    /// Actor positions as of the start of the step.
    pub positions: &'a HashMap<EntityHandle, Vec2>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Total displacement applied this step, carry included.
    pub delta: Vec2,
    /// New registered tile rect, when it changed.
    pub rect_changed: Option<TileRect>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementController {
    entity: EntityHandle,
    move_set: String,
    motion: Motion,
    direction: Direction,
    request: Option<MoveRequest>,
    velocity: Vec2,
    speed: f32,
    footstep_tag: u8,
    survey: Option<Survey>,
    tile_rect: Option<TileRect>,
    pub(crate) carry: Vec2,
    last_delta: Vec2,
    pub(crate) collision_parent: Option<EntityHandle>,
    pub(crate) scheduled_parent: Option<Option<EntityHandle>>,
    pub(crate) collision_children: BTreeSet<EntityHandle>,
    pub(crate) collision_ancestor: EntityHandle,
    pub(crate) sort_weight: i32,
    pub(crate) reevaluate: bool,
}

impl MovementController {
    pub fn new(entity: EntityHandle, move_set: impl Into<String>) -> Self {
        Self {
            entity,
            move_set: move_set.into(),
            motion: Motion::Idle,
            direction: Direction::Down,
            request: None,
            velocity: Vec2::ZERO,
            speed: 0.0,
            footstep_tag: 0,
            survey: None,
            tile_rect: None,
            carry: Vec2::ZERO,
            last_delta: Vec2::ZERO,
            collision_parent: None,
            scheduled_parent: None,
            collision_children: BTreeSet::new(),
            collision_ancestor: entity,
            sort_weight: 0,
            reevaluate: true,
        }
    }

    pub fn entity(&self) -> EntityHandle {
        self.entity
    }

    pub fn move_set(&self) -> &str {
        &self.move_set
    }

    pub fn set_move_set(&mut self, name: impl Into<String>) {
        self.move_set = name.into();
    }

    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Tiles per second while stepping, world units per second in physics.
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Tiles travelled by the current step move, 0 otherwise.
    pub fn distance(&self) -> f32 {
        match self.motion {
            Motion::Step(step) => step.distance,
            _ => 0.0,
        }
    }

    pub fn end_distance(&self) -> f32 {
        match self.motion {
            Motion::Step(step) => step.end_distance,
            _ => 0.0,
        }
    }

    pub fn current_move(&self) -> Option<MoveId> {
        match self.motion {
            Motion::Step(step) => Some(step.move_id),
            _ => None,
        }
    }

    pub fn is_moving(&self) -> bool {
        !matches!(self.motion, Motion::Idle)
    }

    pub fn request(&self) -> Option<&MoveRequest> {
        self.request.as_ref()
    }

    pub fn footstep_tag(&self) -> u8 {
        self.footstep_tag
    }

    pub fn last_delta(&self) -> Vec2 {
        self.last_delta
    }

    pub fn tile_rect(&self) -> Option<TileRect> {
        self.tile_rect
    }

    pub(crate) fn set_tile_rect(&mut self, rect: TileRect) {
        self.tile_rect = Some(rect);
    }

    pub fn survey(&self) -> Option<&Survey> {
        self.survey.as_ref()
    }

    pub fn set_survey(&mut self, survey: Survey) {
        self.survey = Some(survey);
    }

    pub fn collision_parent(&self) -> Option<EntityHandle> {
        self.collision_parent
    }

    pub fn scheduled_collision_parent(&self) -> Option<Option<EntityHandle>> {
        self.scheduled_parent
    }

    pub fn collision_children(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        self.collision_children.iter().copied()
    }

    /// Root of this actor's parent chain; the actor itself when it has no
    /// parent.
    pub fn collision_ancestor(&self) -> EntityHandle {
        self.collision_ancestor
    }

    pub fn sort_weight(&self) -> i32 {
        self.sort_weight
    }

    pub fn needs_reevaluate(&self) -> bool {
        self.reevaluate
    }

    /// Probe for sweeps: carriers never block the actor they carry.
    pub fn sweep_probe(&self, body: &ActorBody) -> CollisionProbe {
        CollisionProbe {
            entity: self.entity,
            ignored: [self.collision_parent, Some(self.collision_ancestor)],
            passable: body.passable,
        }
    }

    /// Start the first move of `moves` matching `direction` under the
    /// current survey. `end_distance` is in tiles; 0 means one cycle of the
    /// selected move.
    pub fn start_new_movement(
        &mut self,
        direction: Direction,
        end_distance: f32,
        moves: &MoveSet,
        paths: &mut PathManager,
        events: &mut MovementEventBus,
    ) -> bool {
        if !valid_request(direction, end_distance) {
            return false;
        }
        if self
            .request
            .is_some_and(|r| r.flags.contains(RequestFlags::PERSISTENT))
        {
            return false;
        }
        self.try_start_movement(direction, end_distance, moves, paths, events)
    }

    fn try_start_movement(
        &mut self,
        direction: Direction,
        end_distance: f32,
        moves: &MoveSet,
        paths: &mut PathManager,
        events: &mut MovementEventBus,
    ) -> bool {
        if let Motion::Step(step) = self.motion {
            if !moves.is_interruptible(step.move_id, step.distance) {
                return false;
            }
        }
        let Some(move_id) = moves.lookup(direction, self.survey.as_ref()) else {
            return false;
        };
        let Some(def) = moves.get(move_id) else {
            return false;
        };
        let end_distance = if end_distance > 0.0 {
            end_distance
        } else {
            def.distance
        };

        self.end_motion(paths);
        self.motion = Motion::Step(StepMotion {
            move_id,
            direction,
            end_distance,
            distance: 0.0,
        });
        self.direction = direction;
        self.speed = def.speed();
        self.footstep_tag = 0;
        events.emit(
            events::MOVE_START,
            json!({
                "move": def.name,
                "direction": direction.label(),
                "end_distance": end_distance,
            }),
            Some(self.entity),
        );
        true
    }

    /// End whatever is running. Safe to call when already idle.
    pub fn stop_movement(&mut self, paths: &mut PathManager, events: &mut MovementEventBus) {
        match self.motion {
            Motion::Idle => return,
            Motion::Step(step) => events.emit(
                events::MOVE_END,
                json!({ "move_id": step.move_id.0, "distance": step.distance, "stopped": true }),
                Some(self.entity),
            ),
            Motion::Physics { .. } => {}
        }
        self.end_motion(paths);
    }

    fn end_motion(&mut self, paths: &mut PathManager) {
        if let Motion::Physics {
            mode: PhysicsMode::Path { agent, .. },
            ..
        } = self.motion
        {
            paths.release(agent);
        }
        self.go_idle();
    }

    fn go_idle(&mut self) {
        self.motion = Motion::Idle;
        self.velocity = Vec2::ZERO;
        self.speed = 0.0;
    }

    fn begin_physics(&mut self, mode: PhysicsMode, settings: PhysicsSettings, paths: &mut PathManager) {
        let velocity = match self.motion {
            Motion::Physics { .. } => self.velocity,
            _ => Vec2::ZERO,
        };
        self.end_motion(paths);
        self.velocity = velocity;
        self.motion = Motion::Physics { mode, settings };
    }

    /// Keep the current velocity and let damping bring it to rest.
    pub fn start_coasting(&mut self, settings: PhysicsSettings, paths: &mut PathManager) {
        self.begin_physics(PhysicsMode::Idle, settings, paths);
    }

    pub fn start_movement_in_direction(
        &mut self,
        heading: Vec2,
        settings: PhysicsSettings,
        paths: &mut PathManager,
    ) {
        let heading = heading.normalize_or_zero();
        self.begin_physics(PhysicsMode::Direction { heading }, settings, paths);
    }

    pub fn start_movement_to_position(
        &mut self,
        target: Vec2,
        settings: PhysicsSettings,
        paths: &mut PathManager,
    ) {
        self.begin_physics(PhysicsMode::Point { target }, settings, paths);
    }

    pub fn start_movement_to_entity(
        &mut self,
        target: EntityHandle,
        offset: Vec2,
        settings: PhysicsSettings,
        paths: &mut PathManager,
    ) -> bool {
        debug_assert_ne!(target, self.entity, "an entity cannot seek itself");
        if target == self.entity {
            return false;
        }
        self.begin_physics(PhysicsMode::Entity { target, offset }, settings, paths);
        true
    }

    /// Follow an agent already allocated in the path manager.
    pub fn start_path_movement(
        &mut self,
        agent: AgentId,
        goal: Vec2,
        settings: PhysicsSettings,
        paths: &mut PathManager,
    ) {
        self.begin_physics(PhysicsMode::Path { agent, goal }, settings, paths);
    }

    /// Called after the path manager dropped its agents. Returns whether the
    /// controller was following a path.
    pub fn handle_path_mgr_reset(&mut self, events: &mut MovementEventBus) -> bool {
        match self.motion {
            Motion::Physics {
                mode: PhysicsMode::Path { agent, .. },
                ..
            } => {
                self.lose_path(agent, events);
                true
            }
            _ => false,
        }
    }

    fn lose_path(&mut self, agent: AgentId, events: &mut MovementEventBus) {
        warn!(
            "[Axiom movement] Path agent {} lost for entity {}, going idle",
            agent,
            self.entity.to_bits()
        );
        self.go_idle();
        events.emit(events::PATH_LOST, json!({ "agent": agent }), Some(self.entity));
    }

    /// Queue a move for the next update-changes pass.
    pub fn request_movement(&mut self, direction: Direction, end_distance: f32, persistent: bool) {
        if !valid_request(direction, end_distance) {
            return;
        }
        let mut flags = RequestFlags::RESELECT;
        if persistent {
            flags.insert(RequestFlags::PERSISTENT);
        }
        self.request = Some(MoveRequest {
            direction,
            end_distance,
            flags,
        });
    }

    pub fn cancel_request(&mut self) {
        self.request = None;
    }

    /// Try the pending request. A one-shot request is consumed either way; a
    /// persistent one stays and retries until it starts.
    pub fn apply_request(
        &mut self,
        moves: &MoveSet,
        paths: &mut PathManager,
        events: &mut MovementEventBus,
    ) -> bool {
        let Some(mut request) = self.request else {
            return false;
        };
        if !request.flags.contains(RequestFlags::RESELECT) {
            return false;
        }
        let started =
            self.try_start_movement(request.direction, request.end_distance, moves, paths, events);
        if request.flags.contains(RequestFlags::PERSISTENT) {
            if started {
                request.flags.remove(RequestFlags::RESELECT);
            }
            self.request = Some(request);
        } else {
            self.request = None;
        }
        started
    }

    fn reselect_persistent(&mut self) {
        if let Some(request) = self.request.as_mut() {
            if request.flags.contains(RequestFlags::PERSISTENT) {
                request.flags.insert(RequestFlags::RESELECT);
            }
        }
    }

    /// Defer a parent change to the next update-changes pass. `None` detaches.
    pub fn set_collision_parent_entity_scheduled(&mut self, parent: Option<EntityHandle>) {
        debug_assert_ne!(
            parent,
            Some(self.entity),
            "an entity cannot be its own collision parent"
        );
        if parent == Some(self.entity) {
            return;
        }
        self.scheduled_parent = Some(parent);
    }

    /// Advance motion by `dt` seconds: apply pending carry, integrate the
    /// active motion against the world, then do new-tile bookkeeping.
    pub fn update<W: WorldQuery + ?Sized>(
        &mut self,
        body: &mut ActorBody,
        dt: f32,
        ctx: &mut UpdateContext<'_, W>,
    ) -> UpdateOutcome {
        let ts = ctx.config.tile_size;
        let start = body.position;
        let probe = self.sweep_probe(body);

        let carry = std::mem::take(&mut self.carry);
        if carry != Vec2::ZERO {
            let out = physics_core::sweep(ctx.world, &probe, &body.aabb(), carry, ts, ctx.counters);
            body.position += out.delta;
        }

        let intent = match self.motion {
            Motion::Idle => Vec2::ZERO,
            Motion::Step(step) => self.step_intent(step, dt, ctx.moves, ts),
            Motion::Physics { mode, settings } => {
                self.physics_intent(mode, settings, body.position, dt, ctx)
            }
        };

        let mut blocked = false;
        if intent != Vec2::ZERO {
            let out = physics_core::sweep(ctx.world, &probe, &body.aabb(), intent, ts, ctx.counters);
            body.position += out.delta;
            match &mut self.motion {
                Motion::Step(step) => {
                    step.distance += (out.delta.dot(step.direction.unit()) / ts).max(0.0);
                    blocked = out.blocked.contains(step.direction);
                }
                Motion::Physics { .. } => {
                    if out.blocked.contains(Direction::Left) || out.blocked.contains(Direction::Right) {
                        self.velocity.x = 0.0;
                    }
                    if out.blocked.contains(Direction::Down) || out.blocked.contains(Direction::Up) {
                        self.velocity.y = 0.0;
                    }
                }
                Motion::Idle => {}
            }
        }

        let finished = match self.motion {
            Motion::Step(step) => {
                !blocked && step.end_distance - step.distance <= ctx.config.step_epsilon
            }
            _ => false,
        };
        if let (true, Motion::Step(step)) = (finished, self.motion) {
            snap_to_grid(body, step.direction, ts, ctx.config.edge_epsilon);
        }

        let rect = registered_tile_rect(&body.aabb(), ts);
        let changed = self.tile_rect != Some(rect);
        let mut fresh_survey = None;
        if changed {
            self.tile_rect = Some(rect);
            if let Motion::Step(step) = self.motion {
                if rect.size() == body.footprint(ts) {
                    ctx.events.emit(
                        events::FOOTSTEP,
                        json!({ "foot": self.footstep_tag, "x": rect.min.x, "y": rect.min.y }),
                        Some(self.entity),
                    );
                    self.footstep_tag ^= 1;
                }
                if !blocked && !finished {
                    let survey = self.construct_survey(body, ctx.world, ctx.config);
                    let def = ctx.moves.and_then(|m| m.get(step.move_id));
                    if let Some(def) = def {
                        if def.interruptible && !move_still_legal(def, &survey) {
                            ctx.events.emit(
                                events::MOVE_INTERRUPTED,
                                json!({ "move": def.name, "distance": step.distance }),
                                Some(self.entity),
                            );
                            self.go_idle();
                            self.reselect_persistent();
                        }
                    }
                    fresh_survey = Some(survey);
                }
            }
        }

        if let Motion::Step(step) = self.motion {
            let name = ctx
                .moves
                .and_then(|m| m.name(step.move_id))
                .unwrap_or_default()
                .to_string();
            if blocked {
                ctx.events.emit(
                    events::MOVE_BLOCKED,
                    json!({ "move": name, "direction": step.direction.label(), "distance": step.distance }),
                    Some(self.entity),
                );
                self.go_idle();
                self.reselect_persistent();
            } else if finished {
                ctx.events.emit(
                    events::MOVE_END,
                    json!({ "move": name, "distance": step.distance }),
                    Some(self.entity),
                );
                self.go_idle();
                self.reselect_persistent();
            }
        }

        if changed || self.reevaluate {
            self.reevaluate = false;
            let survey =
                fresh_survey.unwrap_or_else(|| self.construct_survey(body, ctx.world, ctx.config));
            let pending = self.scheduled_parent.unwrap_or(self.collision_parent);
            if survey.stand_on_entity != pending {
                self.set_collision_parent_entity_scheduled(survey.stand_on_entity);
            }
            self.set_survey(survey);
        }

        self.last_delta = body.position - start;
        UpdateOutcome {
            delta: self.last_delta,
            rect_changed: changed.then_some(rect),
        }
    }

    fn construct_survey<W: WorldQuery + ?Sized>(
        &self,
        body: &ActorBody,
        world: &W,
        config: &MovementConfig,
    ) -> Survey {
        Survey::construct(
            &body.aabb(),
            body.orientation,
            &body.survey_probe(self.entity),
            world,
            config,
        )
    }

    fn step_intent(&mut self, step: StepMotion, dt: f32, moves: Option<&MoveSet>, ts: f32) -> Vec2 {
        let speed = moves
            .and_then(|m| m.get(step.move_id))
            .map_or(0.0, MoveDef::speed);
        self.speed = speed;
        let remaining = (step.end_distance - step.distance).max(0.0);
        // a move without a usable cycle completes at once
        let advance = if speed > 0.0 {
            (speed * dt).min(remaining)
        } else {
            remaining
        };
        step.direction.unit() * advance * ts
    }

    fn physics_intent<W: ?Sized>(
        &mut self,
        mode: PhysicsMode,
        settings: PhysicsSettings,
        position: Vec2,
        dt: f32,
        ctx: &mut UpdateContext<'_, W>,
    ) -> Vec2 {
        let tolerance = settings.arrive_tolerance;
        let velocity = match mode {
            PhysicsMode::Idle => physics_core::damp(self.velocity, settings.damping, dt),
            PhysicsMode::Direction { heading } => {
                physics_core::steer(self.velocity, heading, &settings, dt)
            }
            PhysicsMode::Point { target } => {
                if target.distance(position) <= tolerance {
                    self.arrive(position, ctx.events);
                    return Vec2::ZERO;
                }
                physics_core::seek_velocity(self.velocity, target - position, &settings, dt)
            }
            PhysicsMode::Entity { target, offset } => {
                let Some(target_position) = ctx.positions.get(&target) else {
                    warn!(
                        "[Axiom movement] Seek target {} for entity {} is gone",
                        target.to_bits(),
                        self.entity.to_bits()
                    );
                    self.go_idle();
                    ctx.events.emit(
                        events::TARGET_LOST,
                        json!({ "target": target.to_bits() }),
                        Some(self.entity),
                    );
                    return Vec2::ZERO;
                };
                let goal = *target_position + offset;
                if goal.distance(position) <= tolerance {
                    self.arrive(position, ctx.events);
                    return Vec2::ZERO;
                }
                physics_core::seek_velocity(self.velocity, goal - position, &settings, dt)
            }
            PhysicsMode::Path { agent, .. } => {
                match ctx.paths.next_waypoint(agent, position, tolerance) {
                    Waypoint::Next(point) => {
                        physics_core::seek_velocity(self.velocity, point - position, &settings, dt)
                    }
                    Waypoint::Arrived => {
                        ctx.paths.release(agent);
                        self.arrive(position, ctx.events);
                        return Vec2::ZERO;
                    }
                    Waypoint::Lost => {
                        self.lose_path(agent, ctx.events);
                        return Vec2::ZERO;
                    }
                }
            }
        };
        self.velocity = velocity;
        self.speed = velocity.length();
        let facing = Direction::from_vec(velocity);
        if !facing.is_none() {
            self.direction = facing;
        }
        velocity * dt
    }

    fn arrive(&mut self, position: Vec2, events: &mut MovementEventBus) {
        self.go_idle();
        events.emit(
            events::ARRIVED,
            json!({ "x": position.x, "y": position.y }),
            Some(self.entity),
        );
    }

    /// Rewrite every stored entity handle, e.g. after restoring controllers
    /// into a freshly spawned population.
    pub(crate) fn remap_handles(&mut self, remap: &impl Fn(EntityHandle) -> EntityHandle) {
        self.entity = remap(self.entity);
        self.collision_parent = self.collision_parent.map(remap);
        self.scheduled_parent = self.scheduled_parent.map(|p| p.map(remap));
        self.collision_children = self.collision_children.iter().map(|&c| remap(c)).collect();
        self.collision_ancestor = remap(self.collision_ancestor);
        if let Some(survey) = self.survey.as_mut() {
            survey.stand_on_entity = survey.stand_on_entity.map(remap);
        }
        if let Motion::Physics {
            mode: PhysicsMode::Entity { target, .. },
            ..
        } = &mut self.motion
        {
            *target = remap(*target);
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn unserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

fn valid_request(direction: Direction, end_distance: f32) -> bool {
    debug_assert!(!direction.is_none(), "movement request toward Direction::None");
    debug_assert!(
        end_distance >= 0.0,
        "movement request with distance {end_distance}"
    );
    !direction.is_none() && !end_distance.is_nan() && end_distance >= 0.0
}

/// Put the box exactly on the nearest grid line along the move axis when it
/// landed within `epsilon` tiles of one.
fn snap_to_grid(body: &mut ActorBody, direction: Direction, tile_size: f32, epsilon: f32) {
    let epsilon = epsilon * tile_size;
    let aabb = body.aabb();
    let size = body.collision_size();
    if direction.is_horizontal() {
        let line = (aabb.min_x / tile_size).round() * tile_size;
        if (line - aabb.min_x).abs() <= epsilon {
            body.position.x = line + size.x * 0.5;
        }
    } else {
        let line = (aabb.min_y / tile_size).round() * tile_size;
        if (line - aabb.min_y).abs() <= epsilon {
            body.position.y = line + size.y * 0.5;
        }
    }
}

/// A move stays legal on a new tile while its sustain flags hold and the
/// actor is not inside collision.
fn move_still_legal(def: &MoveDef, survey: &Survey) -> bool {
    survey.flags.contains(def.sustain) && !survey.has(SurveyFlags::INSIDE_COLLISION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ActorDesc;
    use crate::moves::MoveLibrary;
    use crate::tilemap::Tilemap;

    struct Fixture {
        map: Tilemap,
        library: MoveLibrary,
        paths: PathManager,
        events: MovementEventBus,
        config: MovementConfig,
        counters: PhysicsCounters,
        positions: HashMap<EntityHandle, Vec2>,
    }

    impl Fixture {
        fn new(rows: &[&str]) -> Self {
            Self {
                map: Tilemap::from_rows(rows),
                library: MoveLibrary::default_library(),
                paths: PathManager::new(),
                events: MovementEventBus::default(),
                config: MovementConfig::default(),
                counters: PhysicsCounters::default(),
                positions: HashMap::new(),
            }
        }

        fn walker(&self) -> &MoveSet {
            self.library.get("walker").unwrap()
        }

        fn surveyed(&self, controller: &mut MovementController, body: &ActorBody) {
            let survey = controller.construct_survey(body, &self.map, &self.config);
            controller.set_survey(survey);
        }

        fn update(&mut self, controller: &mut MovementController, body: &mut ActorBody) -> UpdateOutcome {
            let mut ctx = UpdateContext {
                world: &self.map,
                moves: self.library.get(controller.move_set()),
                paths: &mut self.paths,
                events: &mut self.events,
                config: &self.config,
                counters: &mut self.counters,
                positions: &self.positions,
            };
            controller.update(body, 1.0 / 60.0, &mut ctx)
        }
    }

    fn walker_at(x: f32, y: f32) -> (MovementController, ActorBody) {
        let handle = EntityHandle::from_raw_parts(0, 0);
        let body = ActorDesc::new(Vec2::new(x, y), Vec2::splat(16.0), "walker").body();
        (MovementController::new(handle, "walker"), body)
    }

    #[test]
    fn snap_tolerance_is_measured_in_tiles() {
        // 0.01 tiles is 0.16 world units at 16 per tile
        let (_, mut body) = walker_at(24.1, 24.0);
        snap_to_grid(&mut body, Direction::Right, 16.0, 0.01);
        assert_eq!(body.position.x, 24.0);

        let (_, mut body) = walker_at(24.5, 24.05);
        snap_to_grid(&mut body, Direction::Right, 16.0, 0.01);
        assert_eq!(body.position, Vec2::new(24.5, 24.05));

        let (_, mut body) = walker_at(8.0, 24.15);
        snap_to_grid(&mut body, Direction::Up, 16.0, 0.01);
        assert_eq!(body.position.y, 24.0);
    }

    #[test]
    fn start_fails_without_matching_move() {
        let mut fx = Fixture::new(&["....", ".#..", "####"]);
        let (mut controller, body) = walker_at(8.0, 24.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.library.get("walker").unwrap().clone();

        assert!(!controller.start_new_movement(Direction::Right, 1.0, &walker, &mut fx.paths, &mut fx.events));
        assert_eq!(controller.direction(), Direction::Down);
        assert!(!controller.is_moving());
        assert_eq!(fx.events.count(events::MOVE_START), 0);
    }

    #[test]
    fn start_succeeds_and_resets_progress() {
        let mut fx = Fixture::new(&["....", "....", "####"]);
        let (mut controller, body) = walker_at(8.0, 24.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.walker().clone();

        assert!(controller.start_new_movement(Direction::Right, 2.0, &walker, &mut fx.paths, &mut fx.events));
        assert_eq!(controller.direction(), Direction::Right);
        assert_eq!(controller.distance(), 0.0);
        assert_eq!(controller.end_distance(), 2.0);
        assert_eq!(controller.footstep_tag(), 0);
        assert_eq!(fx.events.count(events::MOVE_START), 1);

        // zero distance means one cycle of the selected move
        assert!(controller.start_new_movement(Direction::Left, 0.0, &walker, &mut fx.paths, &mut fx.events));
        assert_eq!(controller.end_distance(), 1.0);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut fx = Fixture::new(&["....", "....", "####"]);
        let (mut controller, body) = walker_at(8.0, 24.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.walker().clone();
        controller.start_new_movement(Direction::Right, 1.0, &walker, &mut fx.paths, &mut fx.events);

        controller.stop_movement(&mut fx.paths, &mut fx.events);
        let once = controller.clone();
        controller.stop_movement(&mut fx.paths, &mut fx.events);
        assert_eq!(controller, once);
        assert_eq!(*controller.motion(), Motion::Idle);
        assert_eq!(fx.events.count(events::MOVE_END), 1);
    }

    #[test]
    fn step_move_walks_one_tile_and_ends() {
        let mut fx = Fixture::new(&["....", "....", "####"]);
        let (mut controller, mut body) = walker_at(8.0, 24.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.walker().clone();
        assert!(controller.start_new_movement(Direction::Right, 1.0, &walker, &mut fx.paths, &mut fx.events));

        let mut frames = 0;
        while controller.is_moving() && frames < 60 {
            fx.update(&mut controller, &mut body);
            frames += 1;
        }
        assert!(!controller.is_moving());
        assert!((body.position.x - 24.0).abs() < 1e-3);
        assert_eq!(body.position.y, 24.0);
        assert_eq!(fx.events.count(events::MOVE_END), 1);
        assert_eq!(fx.events.count(events::FOOTSTEP), 1);
        let settled = controller.construct_survey(&body, &fx.map, &fx.config);
        assert_eq!(controller.survey(), Some(&settled));
        assert!(fx.counters.collision_checks > 0);
    }

    #[test]
    fn wall_blocks_step_move() {
        let mut fx = Fixture::new(&["....", "....", "####"]);
        let (mut controller, mut body) = walker_at(8.0, 24.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.walker().clone();
        assert!(controller.start_new_movement(Direction::Right, 1.0, &walker, &mut fx.paths, &mut fx.events));
        // the wall appears after the move was selected
        fx.map.set(1, 1, crate::tilemap::TileType::Solid);
        fx.update(&mut controller, &mut body);
        assert!(!controller.is_moving());
        assert_eq!(body.position.x, 8.0);
        assert_eq!(fx.events.count(events::MOVE_BLOCKED), 1);
    }

    #[test]
    fn persistent_request_blocks_direct_starts_and_retries() {
        let mut fx = Fixture::new(&["....", "..#.", "####"]);
        let (mut controller, body) = walker_at(24.0, 24.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.walker().clone();

        controller.request_movement(Direction::Right, 1.0, true);
        assert!(!controller.start_new_movement(Direction::Left, 1.0, &walker, &mut fx.paths, &mut fx.events));
        // wall to the right: fails but is kept
        assert!(!controller.apply_request(&walker, &mut fx.paths, &mut fx.events));
        assert!(controller.request().is_some_and(|r| r.flags.contains(RequestFlags::RESELECT)));

        fx.map.set(2, 1, crate::tilemap::TileType::Empty);
        fx.surveyed(&mut controller, &body);
        assert!(controller.apply_request(&walker, &mut fx.paths, &mut fx.events));
        let request = controller.request().copied().unwrap();
        assert!(request.flags.contains(RequestFlags::PERSISTENT));
        assert!(!request.flags.contains(RequestFlags::RESELECT));

        controller.cancel_request();
        controller.request_movement(Direction::Up, 1.0, false);
        assert!(!controller.apply_request(&walker, &mut fx.paths, &mut fx.events));
        assert!(controller.request().is_none());
    }

    #[test]
    fn uninterruptible_move_holds_until_finished() {
        let mut fx = Fixture::new(&["....", "....", "...."]);
        let (mut controller, body) = walker_at(24.0, 40.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.walker().clone();
        assert!(controller.start_new_movement(Direction::Down, 1.0, &walker, &mut fx.paths, &mut fx.events));
        assert!(!controller.start_new_movement(Direction::Down, 1.0, &walker, &mut fx.paths, &mut fx.events));
        assert_eq!(fx.events.count(events::MOVE_START), 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "Direction::None")]
    fn none_direction_asserts_in_debug() {
        let mut fx = Fixture::new(&["...."]);
        let (mut controller, _) = walker_at(8.0, 8.0);
        let walker = fx.walker().clone();
        controller.start_new_movement(Direction::None, 1.0, &walker, &mut fx.paths, &mut fx.events);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn none_direction_is_rejected_in_release() {
        let mut fx = Fixture::new(&["...."]);
        let (mut controller, _) = walker_at(8.0, 8.0);
        let walker = fx.walker().clone();
        assert!(!controller.start_new_movement(Direction::None, 1.0, &walker, &mut fx.paths, &mut fx.events));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "own collision parent")]
    fn self_parent_asserts_in_debug() {
        let (mut controller, _) = walker_at(8.0, 8.0);
        let me = controller.entity();
        controller.set_collision_parent_entity_scheduled(Some(me));
    }

    #[test]
    fn point_seek_arrives_and_goes_idle() {
        let mut fx = Fixture::new(&["........", "........"]);
        let (mut controller, mut body) = walker_at(8.0, 8.0);
        controller.start_movement_to_position(Vec2::new(72.0, 8.0), PhysicsSettings::default(), &mut fx.paths);
        for _ in 0..240 {
            fx.update(&mut controller, &mut body);
            if !controller.is_moving() {
                break;
            }
        }
        assert!(!controller.is_moving());
        assert!((body.position.x - 72.0).abs() <= PhysicsSettings::default().arrive_tolerance);
        assert_eq!(fx.events.count(events::ARRIVED), 1);
        assert_eq!(controller.direction(), Direction::Right);
    }

    #[test]
    fn missing_seek_target_is_reported() {
        let mut fx = Fixture::new(&["...."]);
        let (mut controller, mut body) = walker_at(8.0, 8.0);
        let gone = EntityHandle::from_raw_parts(9, 3);
        assert!(controller.start_movement_to_entity(gone, Vec2::ZERO, PhysicsSettings::default(), &mut fx.paths));
        fx.update(&mut controller, &mut body);
        assert!(!controller.is_moving());
        assert_eq!(fx.events.count(events::TARGET_LOST), 1);
    }

    #[test]
    fn coasting_damps_to_rest() {
        let mut fx = Fixture::new(&["........", "........"]);
        let (mut controller, mut body) = walker_at(8.0, 8.0);
        let settings = PhysicsSettings::default();
        controller.start_movement_in_direction(Vec2::X, settings, &mut fx.paths);
        for _ in 0..10 {
            fx.update(&mut controller, &mut body);
        }
        assert!(controller.velocity().x > 0.0);
        controller.start_coasting(settings, &mut fx.paths);
        for _ in 0..120 {
            fx.update(&mut controller, &mut body);
        }
        assert_eq!(controller.velocity(), Vec2::ZERO);
        assert!(matches!(controller.motion(), Motion::Physics { mode: PhysicsMode::Idle, .. }));
    }

    #[test]
    fn path_reset_falls_back_to_idle() {
        let mut fx = Fixture::new(&["....", "...."]);
        let (mut controller, body) = walker_at(8.0, 8.0);
        let probe = body.survey_probe(controller.entity());
        let agent = fx
            .paths
            .allocate(&fx.map, &probe, body.position, Vec2::new(56.0, 8.0), IVec2::ONE, 16.0)
            .unwrap();
        controller.start_path_movement(agent, Vec2::new(56.0, 8.0), PhysicsSettings::default(), &mut fx.paths);

        fx.paths.reset();
        assert!(controller.handle_path_mgr_reset(&mut fx.events));
        assert!(!controller.is_moving());
        assert_eq!(fx.events.count(events::PATH_LOST), 1);
        assert!(!controller.handle_path_mgr_reset(&mut fx.events));
    }

    #[test]
    fn switching_modes_releases_path_agent() {
        let mut fx = Fixture::new(&["....", "...."]);
        let (mut controller, body) = walker_at(8.0, 8.0);
        let probe = body.survey_probe(controller.entity());
        let agent = fx
            .paths
            .allocate(&fx.map, &probe, body.position, Vec2::new(56.0, 8.0), IVec2::ONE, 16.0)
            .unwrap();
        controller.start_path_movement(agent, Vec2::new(56.0, 8.0), PhysicsSettings::default(), &mut fx.paths);
        controller.start_movement_in_direction(Vec2::new(0.0, 3.0), PhysicsSettings::default(), &mut fx.paths);
        assert!(!fx.paths.contains(agent));
        assert!(matches!(
            controller.motion(),
            Motion::Physics { mode: PhysicsMode::Direction { heading }, .. } if *heading == Vec2::Y
        ));
    }

    #[test]
    fn standing_on_solid_entity_schedules_parent() {
        let mut fx = Fixture::new(&["....", "....", "...."]);
        let platform = EntityHandle::from_raw_parts(5, 0);
        fx.map.register_entity(platform, TileRect::from_tile(IVec2::new(1, 0)), true);
        let (mut controller, mut body) = walker_at(24.0, 24.0);
        let out = fx.update(&mut controller, &mut body);
        assert_eq!(out.rect_changed, Some(TileRect::from_tile(IVec2::new(1, 1))));
        assert_eq!(controller.scheduled_collision_parent(), Some(Some(platform)));
        assert!(!controller.needs_reevaluate());
    }

    #[test]
    fn controller_state_round_trips() {
        let mut fx = Fixture::new(&["....", "....", "####"]);
        let (mut controller, body) = walker_at(8.0, 24.0);
        fx.surveyed(&mut controller, &body);
        let walker = fx.walker().clone();
        controller.start_new_movement(Direction::Right, 3.0, &walker, &mut fx.paths, &mut fx.events);
        controller.request_movement(Direction::Left, 1.0, true);
        controller.collision_children.insert(EntityHandle::from_raw_parts(4, 2));
        controller.set_collision_parent_entity_scheduled(Some(EntityHandle::from_raw_parts(7, 1)));
        controller.sort_weight = 3;
        controller.carry = Vec2::new(0.5, -1.25);

        let bytes = controller.serialize().unwrap();
        let restored = MovementController::unserialize(&bytes).unwrap();
        assert_eq!(restored, controller);
        assert_eq!(restored.direction(), Direction::Right);
        assert_eq!(restored.request().map(|r| r.flags), Some(RequestFlags(3)));
    }
}
