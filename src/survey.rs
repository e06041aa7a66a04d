//! Surroundings survey: a point-in-time snapshot of the collision, fluid and
//! material state around an actor's snapped tile rectangle.
//!
//! A survey is a plain value. It is rebuilt whenever the world it describes
//! may have changed, never patched in place.

use bevy::math::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::collision::{
    CollisionLayer, CollisionProbe, FluidSurvey, MaterialId, TileCollisionQuery, WorldQuery,
};
use crate::config::MovementConfig;
use crate::direction::{Direction, DirectionSet};
use crate::entity::EntityHandle;
use crate::geometry::{registered_tile_rect, snapped_position, snapped_tile_rect, TileRect};
use crate::physics_core::Aabb;

/// Survey flag set. Contact, edge and diagonal flags are in world axes;
/// drop flags exist once per orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SurveyFlags(pub u64);

impl SurveyFlags {
    pub const EMPTY: Self = Self(0);

    // Blocked one tile out.
    pub const FLOOR: Self = Self(1 << 0);
    pub const CEILING: Self = Self(1 << 1);
    pub const WALL_LEFT: Self = Self(1 << 2);
    pub const WALL_RIGHT: Self = Self(1 << 3);
    pub const CORNER_DOWN_LEFT: Self = Self(1 << 4);
    pub const CORNER_DOWN_RIGHT: Self = Self(1 << 5);
    pub const CORNER_UP_LEFT: Self = Self(1 << 6);
    pub const CORNER_UP_RIGHT: Self = Self(1 << 7);

    // Blocked two tiles out.
    pub const FLOOR_2: Self = Self(1 << 8);
    pub const CEILING_2: Self = Self(1 << 9);
    pub const WALL_LEFT_2: Self = Self(1 << 10);
    pub const WALL_RIGHT_2: Self = Self(1 << 11);
    pub const CORNER_DOWN_LEFT_2: Self = Self(1 << 12);
    pub const CORNER_DOWN_RIGHT_2: Self = Self(1 << 13);
    pub const CORNER_UP_LEFT_2: Self = Self(1 << 14);
    pub const CORNER_UP_RIGHT_2: Self = Self(1 << 15);

    /// Diagonal move possible going sideways first (`_H`) or vertically
    /// first (`_V`).
    pub const CAN_MOVE_DOWN_LEFT_H: Self = Self(1 << 16);
    pub const CAN_MOVE_DOWN_LEFT_V: Self = Self(1 << 17);
    pub const CAN_MOVE_DOWN_RIGHT_H: Self = Self(1 << 18);
    pub const CAN_MOVE_DOWN_RIGHT_V: Self = Self(1 << 19);
    pub const CAN_MOVE_UP_LEFT_H: Self = Self(1 << 20);
    pub const CAN_MOVE_UP_LEFT_V: Self = Self(1 << 21);
    pub const CAN_MOVE_UP_RIGHT_H: Self = Self(1 << 22);
    pub const CAN_MOVE_UP_RIGHT_V: Self = Self(1 << 23);

    const DROP_LEFT_BASE: u32 = 24;
    const DROP_RIGHT_BASE: u32 = 28;

    pub const ON_TOP_EDGE: Self = Self(1 << 32);
    pub const ON_BOTTOM_EDGE: Self = Self(1 << 33);
    pub const ON_LEFT_EDGE: Self = Self(1 << 34);
    pub const ON_RIGHT_EDGE: Self = Self(1 << 35);

    /// Registered tiles overlap collision, honoring the passable override.
    pub const INSIDE_COLLISION: Self = Self(1 << 36);
    /// Registered tiles overlap collision, ignoring the passable override.
    pub const INSIDE_COLLISION_RAW: Self = Self(1 << 37);
    pub const TOUCH_COLLISION: Self = Self(1 << 38);
    pub const STAND_ON_ENTITY_TILE: Self = Self(1 << 39);

    /// Stepping one tile to the orientation's left, then one tile along the
    /// orientation, lands in open space.
    pub fn drop_left(orientation: Direction) -> Self {
        Self(1 << (Self::DROP_LEFT_BASE + u32::from(orientation.quarter_turns())))
    }

    pub fn drop_right(orientation: Direction) -> Self {
        Self(1 << (Self::DROP_RIGHT_BASE + u32::from(orientation.quarter_turns())))
    }

    /// Direct-contact flag for a world side.
    pub fn contact(side: Direction) -> Self {
        match side {
            Direction::Down => Self::FLOOR,
            Direction::Up => Self::CEILING,
            Direction::Left => Self::WALL_LEFT,
            Direction::Right => Self::WALL_RIGHT,
            Direction::None => Self::EMPTY,
        }
    }

    pub fn edge(side: Direction) -> Self {
        match side {
            Direction::Down => Self::ON_BOTTOM_EDGE,
            Direction::Up => Self::ON_TOP_EDGE,
            Direction::Left => Self::ON_LEFT_EDGE,
            Direction::Right => Self::ON_RIGHT_EDGE,
            Direction::None => Self::EMPTY,
        }
    }

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
    pub fn set(&mut self, flag: Self, value: bool) {
        if value {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FLAG_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, bits)| Self(*bits))
    }

    /// Names of the set flags, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(_, bits)| self.0 & bits != 0)
            .map(|(n, _)| *n)
            .collect()
    }
}

const FLAG_NAMES: [(&str, u64); 40] = [
    ("floor", 1 << 0),
    ("ceiling", 1 << 1),
    ("wall_left", 1 << 2),
    ("wall_right", 1 << 3),
    ("corner_down_left", 1 << 4),
    ("corner_down_right", 1 << 5),
    ("corner_up_left", 1 << 6),
    ("corner_up_right", 1 << 7),
    ("floor_2", 1 << 8),
    ("ceiling_2", 1 << 9),
    ("wall_left_2", 1 << 10),
    ("wall_right_2", 1 << 11),
    ("corner_down_left_2", 1 << 12),
    ("corner_down_right_2", 1 << 13),
    ("corner_up_left_2", 1 << 14),
    ("corner_up_right_2", 1 << 15),
    ("can_move_down_left_h", 1 << 16),
    ("can_move_down_left_v", 1 << 17),
    ("can_move_down_right_h", 1 << 18),
    ("can_move_down_right_v", 1 << 19),
    ("can_move_up_left_h", 1 << 20),
    ("can_move_up_left_v", 1 << 21),
    ("can_move_up_right_h", 1 << 22),
    ("can_move_up_right_v", 1 << 23),
    ("drop_left_down", 1 << 24),
    ("drop_left_right", 1 << 25),
    ("drop_left_up", 1 << 26),
    ("drop_left_left", 1 << 27),
    ("drop_right_down", 1 << 28),
    ("drop_right_right", 1 << 29),
    ("drop_right_up", 1 << 30),
    ("drop_right_left", 1 << 31),
    ("on_top_edge", 1 << 32),
    ("on_bottom_edge", 1 << 33),
    ("on_left_edge", 1 << 34),
    ("on_right_edge", 1 << 35),
    ("inside_collision", 1 << 36),
    ("inside_collision_raw", 1 << 37),
    ("touch_collision", 1 << 38),
    ("stand_on_entity_tile", 1 << 39),
];

/// Serde adapter writing a [`SurveyFlags`] as a list of flag names.
pub mod flag_names {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::SurveyFlags;

    pub fn serialize<S: Serializer>(flags: &SurveyFlags, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(flags.names())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SurveyFlags, D::Error> {
        let names = Vec::<String>::deserialize(d)?;
        let mut flags = SurveyFlags::EMPTY;
        for name in &names {
            let flag = SurveyFlags::from_name(name)
                .ok_or_else(|| D::Error::custom(format!("unknown survey flag '{name}'")))?;
            flags = flags.union(flag);
        }
        Ok(flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SurveyResult(pub u8);

impl SurveyResult {
    pub const STAND_ON_SOLID: Self = Self(1 << 0);
    pub const STAND_ON_ENTITY: Self = Self(1 << 1);
    pub const IN_FLUID: Self = Self(1 << 2);
    pub const UNDER_WATERFALL: Self = Self(1 << 3);
    pub const STUCK: Self = Self(1 << 4);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn set(&mut self, flag: Self, value: bool) {
        if value {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    /// Combine a survey with the controller's touching directions. Standing
    /// requires both a blocked tile under the orientation's down side and an
    /// edge actually resting on it.
    pub fn evaluate(survey: &Survey, touching: DirectionSet) -> Self {
        let down = survey.orientation;
        let resting = touching.contains(down);
        let mut result = Self::default();
        result.set(
            Self::STAND_ON_SOLID,
            resting && survey.flags.contains(SurveyFlags::contact(down)),
        );
        result.set(
            Self::STAND_ON_ENTITY,
            resting && survey.flags.contains(SurveyFlags::STAND_ON_ENTITY_TILE),
        );
        result.set(Self::IN_FLUID, survey.fluid.has(FluidSurvey::INSIDE_FLUID));
        result.set(
            Self::UNDER_WATERFALL,
            survey.fluid.has(FluidSurvey::INSIDE_WATERFALL),
        );
        result.set(
            Self::STUCK,
            survey.flags.contains(SurveyFlags::INSIDE_COLLISION),
        );
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub orientation: Direction,
    pub snapped_position: IVec2,
    pub snapped_rect: TileRect,
    pub registered_rect: TileRect,
    pub surround_one: TileRect,
    pub surround_two: TileRect,
    pub flags: SurveyFlags,
    pub fluid: FluidSurvey,
    /// Material of the first blocking tile under the footprint.
    pub stand_on_material: Option<MaterialId>,
    pub stand_on_entity: Option<EntityHandle>,
}

const SIDES: [(Direction, SurveyFlags, SurveyFlags); 4] = [
    (Direction::Down, SurveyFlags::FLOOR, SurveyFlags::FLOOR_2),
    (Direction::Up, SurveyFlags::CEILING, SurveyFlags::CEILING_2),
    (Direction::Left, SurveyFlags::WALL_LEFT, SurveyFlags::WALL_LEFT_2),
    (Direction::Right, SurveyFlags::WALL_RIGHT, SurveyFlags::WALL_RIGHT_2),
];

// (vertical, horizontal, corner, corner two out, via horizontal, via vertical)
const CORNERS: [(Direction, Direction, SurveyFlags, SurveyFlags, SurveyFlags, SurveyFlags); 4] = [
    (
        Direction::Down,
        Direction::Left,
        SurveyFlags::CORNER_DOWN_LEFT,
        SurveyFlags::CORNER_DOWN_LEFT_2,
        SurveyFlags::CAN_MOVE_DOWN_LEFT_H,
        SurveyFlags::CAN_MOVE_DOWN_LEFT_V,
    ),
    (
        Direction::Down,
        Direction::Right,
        SurveyFlags::CORNER_DOWN_RIGHT,
        SurveyFlags::CORNER_DOWN_RIGHT_2,
        SurveyFlags::CAN_MOVE_DOWN_RIGHT_H,
        SurveyFlags::CAN_MOVE_DOWN_RIGHT_V,
    ),
    (
        Direction::Up,
        Direction::Left,
        SurveyFlags::CORNER_UP_LEFT,
        SurveyFlags::CORNER_UP_LEFT_2,
        SurveyFlags::CAN_MOVE_UP_LEFT_H,
        SurveyFlags::CAN_MOVE_UP_LEFT_V,
    ),
    (
        Direction::Up,
        Direction::Right,
        SurveyFlags::CORNER_UP_RIGHT,
        SurveyFlags::CORNER_UP_RIGHT_2,
        SurveyFlags::CAN_MOVE_UP_RIGHT_H,
        SurveyFlags::CAN_MOVE_UP_RIGHT_V,
    ),
];

impl Survey {
    /// Build a survey for an actor whose collision box is `aabb`. `probe`
    /// should not carry ignored carriers: whatever the actor rests on must
    /// show up as contact.
    pub fn construct<W: WorldQuery + ?Sized>(
        aabb: &Aabb,
        orientation: Direction,
        probe: &CollisionProbe,
        world: &W,
        config: &MovementConfig,
    ) -> Self {
        let ts = config.tile_size;
        let snapped_rect = snapped_tile_rect(aabb, ts);
        let registered_rect = registered_tile_rect(aabb, ts);
        let blocked = |rect: TileRect| world.rect_has_collision(rect, probe);

        let mut flags = SurveyFlags::EMPTY;
        for (side, one, two) in SIDES {
            flags.set(one, blocked(snapped_rect.side_strip(side, 1)));
            flags.set(two, blocked(snapped_rect.side_strip(side, 2)));
        }
        for (vertical, horizontal, corner, corner_2, via_h, via_v) in CORNERS {
            let corner_blocked = blocked(snapped_rect.corner(vertical, horizontal, 1));
            flags.set(corner, corner_blocked);
            flags.set(corner_2, blocked(snapped_rect.corner(vertical, horizontal, 2)));
            flags.set(
                via_h,
                !corner_blocked && !flags.contains(SurveyFlags::contact(horizontal)),
            );
            flags.set(
                via_v,
                !corner_blocked && !flags.contains(SurveyFlags::contact(vertical)),
            );
        }

        for o in Direction::CARDINALS {
            flags.set(
                SurveyFlags::drop_left(o),
                !blocked(drop_probe_rect(snapped_rect, Direction::Left, o)),
            );
            flags.set(
                SurveyFlags::drop_right(o),
                !blocked(drop_probe_rect(snapped_rect, Direction::Right, o)),
            );
        }

        flags = flags.union(edge_flags(aabb, snapped_rect, config));

        flags.set(SurveyFlags::INSIDE_COLLISION, blocked(registered_rect));
        flags.set(
            SurveyFlags::INSIDE_COLLISION_RAW,
            world.rect_has_collision(registered_rect, &probe.without_overrides()),
        );
        flags.set(SurveyFlags::TOUCH_COLLISION, blocked(registered_rect.expand(1)));

        let mut fluid = FluidSurvey::default();
        world.fill_survey(&mut fluid, registered_rect, probe.entity);

        let underfoot = snapped_rect.side_strip(orientation, 1);
        let stand_on_material = underfoot
            .tiles()
            .find(|tile| {
                world
                    .collision_types(probe, CollisionLayer::Tiles, *tile, *tile)
                    .types
                    .intersects(probe.blocking())
            })
            .and_then(|tile| world.tile_material(tile));
        let stand_on_entity = underfoot
            .tiles()
            .find_map(|tile| world.solid_entity_at(tile, probe));
        flags.set(SurveyFlags::STAND_ON_ENTITY_TILE, stand_on_entity.is_some());

        Self {
            orientation,
            snapped_position: snapped_position(aabb, ts),
            snapped_rect,
            registered_rect,
            surround_one: snapped_rect.expand(1),
            surround_two: snapped_rect.expand(2),
            flags,
            fluid,
            stand_on_material,
            stand_on_entity,
        }
    }

    pub fn has(&self, flag: SurveyFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn unserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

/// One tile past the footprint on the orientation-relative `side`, then one
/// tile along the orientation. `side` is given for the `Down` frame.
fn drop_probe_rect(snapped: TileRect, side: Direction, orientation: Direction) -> TileRect {
    snapped
        .side_strip(side.rotated(orientation), 1)
        .translate(orientation.offset())
}

fn edge_flags(aabb: &Aabb, snapped: TileRect, config: &MovementConfig) -> SurveyFlags {
    let ts = config.tile_size;
    let eps = config.edge_epsilon;
    let low = Vec2::new(aabb.min_x, aabb.min_y) / ts - snapped.min.as_vec2();
    let high = Vec2::new(aabb.max_x, aabb.max_y) / ts - (snapped.max + IVec2::ONE).as_vec2();
    let mut flags = SurveyFlags::EMPTY;
    flags.set(SurveyFlags::ON_LEFT_EDGE, low.x.abs() < eps);
    flags.set(SurveyFlags::ON_BOTTOM_EDGE, low.y.abs() < eps);
    flags.set(SurveyFlags::ON_RIGHT_EDGE, high.x.abs() < eps);
    flags.set(SurveyFlags::ON_TOP_EDGE, high.y.abs() < eps);
    flags
}

/// Sides on which the actor's box is flush against collision.
pub fn touching_collision_directions<W: TileCollisionQuery + ?Sized>(
    aabb: &Aabb,
    probe: &CollisionProbe,
    world: &W,
    config: &MovementConfig,
) -> DirectionSet {
    let registered = registered_tile_rect(aabb, config.tile_size);
    let edges = edge_flags(aabb, snapped_tile_rect(aabb, config.tile_size), config);
    Direction::CARDINALS
        .into_iter()
        .filter(|side| {
            edges.contains(SurveyFlags::edge(*side))
                && world.rect_has_collision(registered.side_strip(*side, 1), probe)
        })
        .collect()
}

/// Sides whose adjacent tile row/column holds collision, regardless of
/// sub-tile alignment.
pub fn tile_collision_directions<W: TileCollisionQuery + ?Sized>(
    aabb: &Aabb,
    probe: &CollisionProbe,
    world: &W,
    config: &MovementConfig,
) -> DirectionSet {
    let snapped = snapped_tile_rect(aabb, config.tile_size);
    Direction::CARDINALS
        .into_iter()
        .filter(|side| world.rect_has_collision(snapped.side_strip(*side, 1), probe))
        .collect()
}
