use std::collections::{BTreeSet, HashMap};

use bevy::prelude::*;
use serde::Serialize;

use crate::codec::{self, CodecError};
use crate::components::{Actor, ActorBody, ActorDesc};
use crate::config::MovementConfig;
use crate::controller::{MovementController, UpdateContext};
use crate::direction::{Direction, DirectionSet};
use crate::entity::{Arena, EntityHandle};
use crate::events::MovementEventBus;
use crate::geometry::{registered_tile_rect, TileRect};
use crate::hierarchy;
use crate::moves::MoveLibrary;
use crate::pathfinding::PathManager;
use crate::physics_core::{PhysicsCounters, PhysicsSettings};
use crate::survey::{self, Survey, SurveyResult};
use crate::tilemap::Tilemap;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TraceEntity {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub direction: &'static str,
    pub moving: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
}

#[derive(Serialize, Clone, Debug)]
pub struct TraceFrame {
    pub frame: u64,
    pub entities: Vec<TraceEntity>,
}

/// The whole simulated population plus everything it collides against.
#[derive(Resource)]
pub struct MovementWorld {
    pub actors: Arena<Actor>,
    pub tilemap: Tilemap,
    pub library: MoveLibrary,
    pub paths: PathManager,
    pub events: MovementEventBus,
    pub config: MovementConfig,
    pub counters: PhysicsCounters,
    pub frame: u64,
}

impl Default for MovementWorld {
    fn default() -> Self {
        Self::new(Tilemap::new(0, 0), MovementConfig::default())
    }
}

impl MovementWorld {
    pub fn new(tilemap: Tilemap, config: MovementConfig) -> Self {
        Self {
            actors: Arena::new(),
            tilemap,
            library: MoveLibrary::default_library(),
            paths: PathManager::new(),
            events: MovementEventBus::default(),
            config,
            counters: PhysicsCounters::default(),
            frame: 0,
        }
    }

    pub fn with_library(mut self, library: MoveLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn spawn(&mut self, desc: ActorDesc) -> EntityHandle {
        let body = desc.body();
        let move_set = desc.move_set;
        let rect = registered_tile_rect(&body.aabb(), self.config.tile_size);
        let handle = self.actors.insert_with(|handle| {
            let mut controller = MovementController::new(handle, move_set);
            controller.set_tile_rect(rect);
            Actor { body, controller }
        });
        self.tilemap.register_entity(handle, rect, body.solid);
        handle
    }

    /// Remove an actor: stop it, unlink it from the hierarchy and drop its
    /// tile registration.
    pub fn destroy(&mut self, handle: EntityHandle) -> bool {
        let Some(actor) = self.actors.get_mut(handle) else {
            return false;
        };
        actor
            .controller
            .stop_movement(&mut self.paths, &mut self.events);
        hierarchy::detach_for_destroy(&mut self.actors, handle);
        self.tilemap.unregister_entity(handle);
        self.actors.remove(handle);
        true
    }

    pub fn body(&self, handle: EntityHandle) -> Option<&ActorBody> {
        self.actors.get(handle).map(|a| &a.body)
    }

    pub fn body_mut(&mut self, handle: EntityHandle) -> Option<&mut ActorBody> {
        self.actors.get_mut(handle).map(|a| &mut a.body)
    }

    pub fn controller(&self, handle: EntityHandle) -> Option<&MovementController> {
        self.actors.get(handle).map(|a| &a.controller)
    }

    pub fn controller_mut(&mut self, handle: EntityHandle) -> Option<&mut MovementController> {
        self.actors.get_mut(handle).map(|a| &mut a.controller)
    }

    /// Build a new survey against the world as it stands now. Neighbours and
    /// tiles may have changed since the last one, so every decision point
    /// takes its own.
    fn refresh_survey(&mut self, handle: EntityHandle) {
        let Some(actor) = self.actors.get_mut(handle) else {
            return;
        };
        let survey = Survey::construct(
            &actor.body.aabb(),
            actor.body.orientation,
            &actor.body.survey_probe(handle),
            &self.tilemap,
            &self.config,
        );
        actor.controller.set_survey(survey);
    }

    /// Survey of the actor against the current world.
    pub fn survey(&mut self, handle: EntityHandle) -> Option<&Survey> {
        self.refresh_survey(handle);
        self.controller(handle).and_then(|c| c.survey())
    }

    pub fn touching_collision_directions(&self, handle: EntityHandle) -> DirectionSet {
        let Some(actor) = self.actors.get(handle) else {
            return DirectionSet::EMPTY;
        };
        survey::touching_collision_directions(
            &actor.body.aabb(),
            &actor.body.survey_probe(handle),
            &self.tilemap,
            &self.config,
        )
    }

    pub fn tile_collision_directions(&self, handle: EntityHandle) -> DirectionSet {
        let Some(actor) = self.actors.get(handle) else {
            return DirectionSet::EMPTY;
        };
        survey::tile_collision_directions(
            &actor.body.aabb(),
            &actor.body.survey_probe(handle),
            &self.tilemap,
            &self.config,
        )
    }

    pub fn survey_result(&mut self, handle: EntityHandle) -> Option<SurveyResult> {
        let touching = self.touching_collision_directions(handle);
        let survey = self.survey(handle)?;
        Some(SurveyResult::evaluate(survey, touching))
    }

    pub fn start_new_movement(
        &mut self,
        handle: EntityHandle,
        direction: Direction,
        end_distance: f32,
    ) -> bool {
        self.refresh_survey(handle);
        let Some(actor) = self.actors.get_mut(handle) else {
            return false;
        };
        let Some(moves) = self.library.get(actor.controller.move_set()) else {
            warn!(
                "[Axiom movement] Unknown move set '{}' for entity {}",
                actor.controller.move_set(),
                handle.to_bits()
            );
            return false;
        };
        actor
            .controller
            .start_new_movement(direction, end_distance, moves, &mut self.paths, &mut self.events)
    }

    pub fn stop_movement(&mut self, handle: EntityHandle) {
        if let Some(actor) = self.actors.get_mut(handle) {
            actor
                .controller
                .stop_movement(&mut self.paths, &mut self.events);
        }
    }

    pub fn request_movement(
        &mut self,
        handle: EntityHandle,
        direction: Direction,
        end_distance: f32,
        persistent: bool,
    ) -> bool {
        let Some(controller) = self.controller_mut(handle) else {
            return false;
        };
        controller.request_movement(direction, end_distance, persistent);
        true
    }

    pub fn cancel_request(&mut self, handle: EntityHandle) {
        if let Some(controller) = self.controller_mut(handle) {
            controller.cancel_request();
        }
    }

    pub fn start_coasting(&mut self, handle: EntityHandle, settings: PhysicsSettings) -> bool {
        let Some(actor) = self.actors.get_mut(handle) else {
            return false;
        };
        actor.controller.start_coasting(settings, &mut self.paths);
        true
    }

    pub fn start_movement_in_direction(
        &mut self,
        handle: EntityHandle,
        heading: Vec2,
        settings: PhysicsSettings,
    ) -> bool {
        let Some(actor) = self.actors.get_mut(handle) else {
            return false;
        };
        actor
            .controller
            .start_movement_in_direction(heading, settings, &mut self.paths);
        true
    }

    pub fn start_movement_to_position(
        &mut self,
        handle: EntityHandle,
        target: Vec2,
        settings: PhysicsSettings,
    ) -> bool {
        let Some(actor) = self.actors.get_mut(handle) else {
            return false;
        };
        actor
            .controller
            .start_movement_to_position(target, settings, &mut self.paths);
        true
    }

    pub fn start_movement_to_entity(
        &mut self,
        handle: EntityHandle,
        target: EntityHandle,
        offset: Vec2,
        settings: PhysicsSettings,
    ) -> bool {
        if !self.actors.contains(target) {
            return false;
        }
        let Some(actor) = self.actors.get_mut(handle) else {
            return false;
        };
        actor
            .controller
            .start_movement_to_entity(target, offset, settings, &mut self.paths)
    }

    /// Plan a tile path to `goal` and follow it. Fails when no path exists.
    pub fn start_path_movement(
        &mut self,
        handle: EntityHandle,
        goal: Vec2,
        settings: PhysicsSettings,
    ) -> bool {
        let Some(actor) = self.actors.get_mut(handle) else {
            return false;
        };
        let probe = actor.controller.sweep_probe(&actor.body);
        let footprint = actor.body.footprint(self.config.tile_size);
        let Some(agent) = self.paths.allocate(
            &self.tilemap,
            &probe,
            actor.body.position,
            goal,
            footprint,
            self.config.tile_size,
        ) else {
            debug!(
                "[Axiom movement] No path for entity {} to ({}, {})",
                handle.to_bits(),
                goal.x,
                goal.y
            );
            return false;
        };
        actor
            .controller
            .start_path_movement(agent, goal, settings, &mut self.paths);
        true
    }

    pub fn set_collision_parent_entity_scheduled(
        &mut self,
        handle: EntityHandle,
        parent: Option<EntityHandle>,
    ) {
        if let Some(controller) = self.controller_mut(handle) {
            controller.set_collision_parent_entity_scheduled(parent);
        }
    }

    pub fn make_scheduled_collision_parent_current(&mut self, handle: EntityHandle) -> bool {
        hierarchy::make_scheduled_collision_parent_current(&mut self.actors, handle, &mut self.events)
    }

    pub fn calculate_sort_weight(&self, handle: EntityHandle) -> i32 {
        hierarchy::calculate_sort_weight(&self.actors, handle)
    }

    pub fn collision_ancestor(&self, handle: EntityHandle) -> Option<EntityHandle> {
        self.controller(handle).map(MovementController::collision_ancestor)
    }

    /// Phase A: promote scheduled parents and apply pending move requests.
    /// Nobody moves.
    pub fn update_changes(&mut self) {
        for handle in self.actors.handles() {
            hierarchy::make_scheduled_collision_parent_current(
                &mut self.actors,
                handle,
                &mut self.events,
            );
            let wants_move = self
                .controller(handle)
                .and_then(MovementController::request)
                .is_some();
            if !wants_move {
                continue;
            }
            self.refresh_survey(handle);
            let Some(actor) = self.actors.get_mut(handle) else {
                continue;
            };
            let Some(moves) = self.library.get(actor.controller.move_set()) else {
                continue;
            };
            actor
                .controller
                .apply_request(moves, &mut self.paths, &mut self.events);
        }
    }

    /// Phase B: integrate every controller, carriers first, then commit tile
    /// registrations.
    pub fn update(&mut self, dt: f32) {
        let positions: HashMap<EntityHandle, Vec2> = self
            .actors
            .iter()
            .map(|(handle, actor)| (handle, actor.body.position))
            .collect();
        let mut order: Vec<(i32, EntityHandle)> = self
            .actors
            .iter()
            .map(|(handle, actor)| (actor.controller.sort_weight(), handle))
            .collect();
        order.sort_unstable();

        let mut moved: Vec<(EntityHandle, Option<TileRect>, TileRect, bool)> = Vec::new();
        for (_, handle) in order {
            let Some(actor) = self.actors.get_mut(handle) else {
                continue;
            };
            let old_rect = actor.controller.tile_rect();
            let moves = self.library.get(actor.controller.move_set());
            let Actor { body, controller } = actor;
            let mut ctx = UpdateContext {
                world: &self.tilemap,
                moves,
                paths: &mut self.paths,
                events: &mut self.events,
                config: &self.config,
                counters: &mut self.counters,
                positions: &positions,
            };
            let outcome = controller.update(body, dt, &mut ctx);
            if let Some(rect) = outcome.rect_changed {
                moved.push((handle, old_rect, rect, body.solid));
            }
            if outcome.delta == Vec2::ZERO {
                continue;
            }
            let children: Vec<EntityHandle> = controller.collision_children().collect();
            for child in children {
                if let Some(child) = self.actors.get_mut(child) {
                    child.controller.carry += outcome.delta;
                }
            }
        }

        for (handle, old_rect, rect, solid) in moved {
            self.tilemap.register_entity(handle, rect, solid);
            if !solid {
                continue;
            }
            // whoever stood on or beside a solid mover must look again
            let mut touched = BTreeSet::new();
            for area in old_rect.into_iter().chain(Some(rect)) {
                for tile in area.expand(1).tiles() {
                    touched.extend(
                        self.tilemap
                            .entities
                            .occupants(tile)
                            .iter()
                            .map(|o| o.entity)
                            .filter(|&e| e != handle),
                    );
                }
            }
            for other in touched {
                if let Some(actor) = self.actors.get_mut(other) {
                    actor.controller.reevaluate = true;
                }
            }
        }
    }

    pub fn begin_frame(&mut self) {
        self.frame += 1;
        self.events.tick();
    }

    /// One fixed step: advance the event frame, then both phases.
    pub fn step(&mut self, dt: f32) {
        self.begin_frame();
        self.update_changes();
        self.update(dt);
    }

    pub fn reset_paths(&mut self) {
        self.paths.reset();
        for handle in self.actors.handles() {
            if let Some(actor) = self.actors.get_mut(handle) {
                actor.controller.handle_path_mgr_reset(&mut self.events);
            }
        }
    }

    /// Every controller in handle order.
    pub fn serialize_controllers(&self) -> Result<Vec<u8>, CodecError> {
        let controllers: Vec<&MovementController> =
            self.actors.iter().map(|(_, actor)| &actor.controller).collect();
        codec::encode(&controllers)
    }

    /// Restore controllers saved by [`Self::serialize_controllers`] onto the
    /// live population, matched by handle order.
    ///
    /// # Panics
    ///
    /// When the saved and live populations differ in size.
    pub fn unserialize_controllers(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let controllers: Vec<MovementController> = codec::decode(bytes)?;
        let handles = self.actors.handles();
        assert_eq!(
            controllers.len(),
            handles.len(),
            "controller count mismatch: {} saved, {} live",
            controllers.len(),
            handles.len()
        );
        let remap: HashMap<EntityHandle, EntityHandle> = controllers
            .iter()
            .map(MovementController::entity)
            .zip(handles.iter().copied())
            .collect();
        let lookup = |h: EntityHandle| remap.get(&h).copied().unwrap_or(h);
        for (mut controller, handle) in controllers.into_iter().zip(handles) {
            controller.remap_handles(&lookup);
            if let Some(actor) = self.actors.get_mut(handle) {
                actor.controller = controller;
            }
        }
        Ok(())
    }

    pub fn trace_frame(&self) -> TraceFrame {
        TraceFrame {
            frame: self.frame,
            entities: self
                .actors
                .iter()
                .map(|(handle, actor)| TraceEntity {
                    id: handle.to_bits(),
                    x: actor.body.position.x,
                    y: actor.body.position.y,
                    direction: actor.controller.direction().label(),
                    moving: actor.controller.is_moving(),
                    parent: actor.controller.collision_parent().map(EntityHandle::to_bits),
                })
                .collect(),
        }
    }
}
