//! Contracts between the movement core and the world it moves through.
//!
//! The core never reaches into grid storage directly: every tile or fluid
//! question goes through [`TileCollisionQuery`] and [`FluidQuery`], so tests
//! can hand it a fabricated world.

use bevy::math::IVec2;
use serde::{Deserialize, Serialize};

use crate::entity::EntityHandle;
use crate::geometry::TileRect;

/// Set of collision types occupying a tile or tile-rect.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct CollisionTypeSet(pub u8);

impl CollisionTypeSet {
    pub const NONE: Self = Self(0);
    pub const SOLID: Self = Self(1 << 0);
    pub const PLATFORM: Self = Self(1 << 1);
    pub const BARRIER: Self = Self(1 << 2);
    /// A solid entity registered on the tile.
    pub const ENTITY: Self = Self(1 << 3);
    pub const ALL_BLOCKING: Self =
        Self(Self::SOLID.0 | Self::PLATFORM.0 | Self::BARRIER.0 | Self::ENTITY.0);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[inline]
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CollisionLayer {
    Tiles,
    Entities,
    All,
}

impl CollisionLayer {
    pub fn includes_tiles(self) -> bool {
        matches!(self, CollisionLayer::Tiles | CollisionLayer::All)
    }

    pub fn includes_entities(self) -> bool {
        matches!(self, CollisionLayer::Entities | CollisionLayer::All)
    }
}

/// Who is asking, and what they are allowed to pass through.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CollisionProbe {
    pub entity: EntityHandle,
    /// Entities never treated as blocking: the collision parent and ancestor.
    pub ignored: [Option<EntityHandle>; 2],
    /// Per-entity override: collision types this entity passes through.
    pub passable: CollisionTypeSet,
}

impl CollisionProbe {
    /// Probe without per-entity overrides.
    pub fn raw(entity: EntityHandle) -> Self {
        Self {
            entity,
            ignored: [None, None],
            passable: CollisionTypeSet::NONE,
        }
    }

    pub fn without_overrides(&self) -> Self {
        Self {
            passable: CollisionTypeSet::NONE,
            ..*self
        }
    }

    pub fn blocking(&self) -> CollisionTypeSet {
        CollisionTypeSet::ALL_BLOCKING.difference(self.passable)
    }

    pub fn ignores(&self, other: EntityHandle) -> bool {
        other == self.entity || self.ignored.iter().any(|i| *i == Some(other))
    }
}

/// Result of a collision-type scan. `primary` holds the types of the first
/// blocking tile in row-major order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CollisionScan {
    pub types: CollisionTypeSet,
    pub primary: CollisionTypeSet,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct MaterialId(pub u8);

pub trait TileCollisionQuery {
    /// Whether anything blocking for `probe` occupies the inclusive rect.
    fn has_tile_collision(&self, min: IVec2, max: IVec2, probe: &CollisionProbe) -> bool;

    fn collision_types(
        &self,
        probe: &CollisionProbe,
        layer: CollisionLayer,
        min: IVec2,
        max: IVec2,
    ) -> CollisionScan;

    /// Theme of the tile, `None` when the tile carries no material.
    fn tile_material(&self, tile: IVec2) -> Option<MaterialId>;

    /// First solid entity registered on `tile` that the probe does not ignore.
    fn solid_entity_at(&self, tile: IVec2, probe: &CollisionProbe) -> Option<EntityHandle>;

    fn rect_has_collision(&self, rect: TileRect, probe: &CollisionProbe) -> bool {
        self.has_tile_collision(rect.min, rect.max, probe)
    }
}

/// Fluid-related survey fields. Opaque to the movement core apart from the
/// flags it forwards to movement selection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct FluidSurvey {
    pub flags: u8,
}

impl FluidSurvey {
    pub const INSIDE_FLUID: u8 = 1 << 0;
    pub const TOUCH_FLUID: u8 = 1 << 1;
    pub const INSIDE_WATERFALL: u8 = 1 << 2;
    pub const TOUCH_WATERFALL: u8 = 1 << 3;
    pub const SUBMERGED: u8 = 1 << 4;

    #[inline]
    pub fn has(self, flag: u8) -> bool {
        (self.flags & flag) != 0
    }

    #[inline]
    pub fn set(&mut self, flag: u8, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

pub trait FluidQuery {
    /// Fill the fluid portion of a survey under construction.
    fn fill_survey(&self, fluid: &mut FluidSurvey, registered: TileRect, entity: EntityHandle);
}

/// Everything a survey or controller update needs to read from the world.
pub trait WorldQuery: TileCollisionQuery + FluidQuery {}

impl<T: TileCollisionQuery + FluidQuery> WorldQuery for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passable_override_removes_blocking_types() {
        let mut probe = CollisionProbe::raw(EntityHandle::from_raw_parts(0, 0));
        assert!(probe.blocking().contains(CollisionTypeSet::PLATFORM));
        probe.passable = CollisionTypeSet::PLATFORM;
        assert!(!probe.blocking().contains(CollisionTypeSet::PLATFORM));
        assert!(probe.blocking().contains(CollisionTypeSet::SOLID));
        assert!(probe.without_overrides().blocking().contains(CollisionTypeSet::PLATFORM));
    }

    #[test]
    fn probe_ignores_self_and_carriers() {
        let me = EntityHandle::from_raw_parts(1, 0);
        let parent = EntityHandle::from_raw_parts(2, 0);
        let other = EntityHandle::from_raw_parts(3, 0);
        let probe = CollisionProbe {
            entity: me,
            ignored: [Some(parent), None],
            passable: CollisionTypeSet::NONE,
        };
        assert!(probe.ignores(me));
        assert!(probe.ignores(parent));
        assert!(!probe.ignores(other));
    }
}
