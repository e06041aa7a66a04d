use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::collision::{CollisionProbe, CollisionTypeSet};
use crate::controller::MovementController;
use crate::direction::Direction;
use crate::entity::EntityHandle;
use crate::physics_core::Aabb;

/// Physical state of an actor, in world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorBody {
    /// Center of the collision box.
    pub position: Vec2,
    /// Collision box size for the `Down` orientation.
    pub size: Vec2,
    pub orientation: Direction,
    /// Collision types this actor passes through.
    pub passable: CollisionTypeSet,
    /// Whether other actors collide with this one.
    pub solid: bool,
}

impl ActorBody {
    /// Box size in world axes; sideways orientations swap width and height.
    pub fn collision_size(&self) -> Vec2 {
        if self.orientation.is_horizontal() {
            Vec2::new(self.size.y, self.size.x)
        } else {
            self.size
        }
    }

    pub fn aabb(&self) -> Aabb {
        let size = self.collision_size();
        Aabb::from_center(self.position.x, self.position.y, size.x, size.y)
    }

    /// Footprint in whole tiles, at least one by one.
    pub fn footprint(&self, tile_size: f32) -> IVec2 {
        (self.collision_size() / tile_size)
            .round()
            .as_ivec2()
            .max(IVec2::ONE)
    }

    /// Probe for surveys: sees every other entity, carriers included.
    pub fn survey_probe(&self, entity: EntityHandle) -> CollisionProbe {
        CollisionProbe {
            entity,
            ignored: [None, None],
            passable: self.passable,
        }
    }
}

/// Spawn description for an actor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorDesc {
    pub position: Vec2,
    pub size: Vec2,
    #[serde(default)]
    pub orientation: Direction,
    #[serde(default)]
    pub passable: CollisionTypeSet,
    #[serde(default)]
    pub solid: bool,
    pub move_set: String,
}

impl ActorDesc {
    pub fn new(position: Vec2, size: Vec2, move_set: impl Into<String>) -> Self {
        Self {
            position,
            size,
            orientation: Direction::Down,
            passable: CollisionTypeSet::NONE,
            solid: false,
            move_set: move_set.into(),
        }
    }

    pub fn solid(mut self) -> Self {
        self.solid = true;
        self
    }

    pub fn with_orientation(mut self, orientation: Direction) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_passable(mut self, passable: CollisionTypeSet) -> Self {
        self.passable = passable;
        self
    }

    pub fn body(&self) -> ActorBody {
        ActorBody {
            position: self.position,
            size: self.size,
            orientation: self.orientation,
            passable: self.passable,
            solid: self.solid,
        }
    }
}

pub struct Actor {
    pub body: ActorBody,
    pub controller: MovementController,
}
