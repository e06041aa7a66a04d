use bevy::math::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::direction::Direction;
use crate::physics_core::Aabb;

/// Inclusive rectangle of tile coordinates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct TileRect {
    pub min: IVec2,
    pub max: IVec2,
}

impl TileRect {
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_tile(tile: IVec2) -> Self {
        Self {
            min: tile,
            max: tile,
        }
    }

    pub fn width(&self) -> i32 {
        self.max.x - self.min.x + 1
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y + 1
    }

    pub fn size(&self) -> IVec2 {
        IVec2::new(self.width(), self.height())
    }

    pub fn contains(&self, tile: IVec2) -> bool {
        tile.x >= self.min.x && tile.x <= self.max.x && tile.y >= self.min.y && tile.y <= self.max.y
    }

    pub fn translate(&self, offset: IVec2) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn expand(&self, n: i32) -> Self {
        Self {
            min: self.min - IVec2::splat(n),
            max: self.max + IVec2::splat(n),
        }
    }

    /// The row or column `distance` tiles past the given side, spanning the
    /// rect along the other axis.
    pub fn side_strip(&self, side: Direction, distance: i32) -> Self {
        match side {
            Direction::Down => Self {
                min: IVec2::new(self.min.x, self.min.y - distance),
                max: IVec2::new(self.max.x, self.min.y - distance),
            },
            Direction::Up => Self {
                min: IVec2::new(self.min.x, self.max.y + distance),
                max: IVec2::new(self.max.x, self.max.y + distance),
            },
            Direction::Left => Self {
                min: IVec2::new(self.min.x - distance, self.min.y),
                max: IVec2::new(self.min.x - distance, self.max.y),
            },
            Direction::Right => Self {
                min: IVec2::new(self.max.x + distance, self.min.y),
                max: IVec2::new(self.max.x + distance, self.max.y),
            },
            Direction::None => *self,
        }
    }

    /// The diagonal tile `distance` tiles out from the corner shared by the
    /// two sides. One side must be horizontal and the other vertical.
    pub fn corner(&self, a: Direction, b: Direction, distance: i32) -> Self {
        let (horizontal, vertical) = if a.is_horizontal() { (a, b) } else { (b, a) };
        let x = if horizontal == Direction::Left {
            self.min.x - distance
        } else {
            self.max.x + distance
        };
        let y = if vertical == Direction::Down {
            self.min.y - distance
        } else {
            self.max.y + distance
        };
        Self::from_tile(IVec2::new(x, y))
    }

    /// Tiles in row-major order starting at `min`.
    pub fn tiles(&self) -> impl Iterator<Item = IVec2> {
        let min = self.min;
        let max = self.max;
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| IVec2::new(x, y)))
    }
}

/// Tiles covered by the box, treating a shared edge as not covering.
pub fn registered_tile_rect(aabb: &Aabb, tile_size: f32) -> TileRect {
    let min = IVec2::new(
        (aabb.min_x / tile_size).floor() as i32,
        (aabb.min_y / tile_size).floor() as i32,
    );
    let max = IVec2::new(
        ((aabb.max_x - 0.01) / tile_size).floor() as i32,
        ((aabb.max_y - 0.01) / tile_size).floor() as i32,
    );
    TileRect::new(min, max.max(min))
}

/// Tile-grid position of the box's min corner, rounded to the nearest tile.
pub fn snapped_position(aabb: &Aabb, tile_size: f32) -> IVec2 {
    (Vec2::new(aabb.min_x, aabb.min_y) / tile_size).round().as_ivec2()
}

/// The box rounded onto the grid: snapped min corner plus the box size in
/// whole tiles (at least one).
pub fn snapped_tile_rect(aabb: &Aabb, tile_size: f32) -> TileRect {
    let min = snapped_position(aabb, tile_size);
    let size = (Vec2::new(aabb.width(), aabb.height()) / tile_size)
        .round()
        .as_ivec2()
        .max(IVec2::ONE);
    TileRect {
        min,
        max: min + size - IVec2::ONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_strips_sit_past_each_side() {
        let rect = TileRect::new(IVec2::new(2, 3), IVec2::new(3, 5));
        assert_eq!(
            rect.side_strip(Direction::Down, 1),
            TileRect::new(IVec2::new(2, 2), IVec2::new(3, 2))
        );
        assert_eq!(
            rect.side_strip(Direction::Up, 2),
            TileRect::new(IVec2::new(2, 7), IVec2::new(3, 7))
        );
        assert_eq!(
            rect.side_strip(Direction::Left, 1),
            TileRect::new(IVec2::new(1, 3), IVec2::new(1, 5))
        );
        assert_eq!(
            rect.side_strip(Direction::Right, 1),
            TileRect::new(IVec2::new(4, 3), IVec2::new(4, 5))
        );
        assert_eq!(
            rect.corner(Direction::Up, Direction::Left, 1),
            TileRect::from_tile(IVec2::new(1, 6))
        );
        assert_eq!(
            rect.corner(Direction::Right, Direction::Down, 2),
            TileRect::from_tile(IVec2::new(5, 1))
        );
    }

    #[test]
    fn registered_rect_excludes_shared_edges() {
        let aabb = Aabb::from_center(24.0, 24.0, 16.0, 16.0);
        let rect = registered_tile_rect(&aabb, 16.0);
        assert_eq!(rect, TileRect::from_tile(IVec2::new(1, 1)));

        let straddling = Aabb::from_center(30.0, 24.0, 16.0, 16.0);
        let rect = registered_tile_rect(&straddling, 16.0);
        assert_eq!(rect, TileRect::new(IVec2::new(1, 1), IVec2::new(2, 1)));
    }

    #[test]
    fn snapped_rect_rounds_to_nearest_tile() {
        let aabb = Aabb::from_center(30.0, 24.0, 16.0, 16.0);
        assert_eq!(snapped_position(&aabb, 16.0), IVec2::new(1, 1));
        let aabb = Aabb::from_center(34.0, 32.0, 16.0, 32.0);
        let rect = snapped_tile_rect(&aabb, 16.0);
        assert_eq!(rect, TileRect::new(IVec2::new(2, 1), IVec2::new(2, 2)));
        assert_eq!(rect.tiles().count(), 2);
    }
}
