use bevy::math::Vec2;
use serde::{Deserialize, Serialize};

use crate::collision::{CollisionProbe, TileCollisionQuery};
use crate::direction::{Direction, DirectionSet};
use crate::geometry::registered_tile_rect;

/// Maximum per-step displacement on one axis, in tiles, to avoid tunneling.
pub const MAX_SWEEP_TILES: f32 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Aabb {
    pub fn from_center(x: f32, y: f32, width: f32, height: f32) -> Self {
        let hw = width / 2.0;
        let hh = height / 2.0;
        Self {
            min_x: x - hw,
            min_y: y - hh,
            max_x: x + hw,
            max_y: y + hh,
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }

    pub fn translated(&self, delta: Vec2) -> Self {
        Self {
            min_x: self.min_x + delta.x,
            min_y: self.min_y + delta.y,
            max_x: self.max_x + delta.x,
            max_y: self.max_y + delta.y,
        }
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct PhysicsCounters {
    pub collision_checks: u64,
}

/// Tuning for the continuous (physics) movement modes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicsSettings {
    /// World units per second squared.
    pub acceleration: f32,
    /// World units per second.
    pub max_speed: f32,
    /// Fraction of velocity removed per second while not accelerating.
    pub damping: f32,
    /// Distance at which a seek counts as arrived.
    pub arrive_tolerance: f32,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            acceleration: 900.0,
            max_speed: 120.0,
            damping: 6.0,
            arrive_tolerance: 1.0,
        }
    }
}

/// Accelerate toward `heading` (normalized or zero) and clamp to max speed.
/// A zero heading damps instead.
pub fn steer(velocity: Vec2, heading: Vec2, settings: &PhysicsSettings, dt: f32) -> Vec2 {
    if heading.length_squared() <= f32::EPSILON {
        return damp(velocity, settings.damping, dt);
    }
    let out = velocity + heading * settings.acceleration * dt;
    out.clamp_length_max(settings.max_speed.max(0.0))
}

pub fn damp(velocity: Vec2, damping: f32, dt: f32) -> Vec2 {
    let decay = (1.0 - damping.max(0.0) * dt).clamp(0.0, 1.0);
    let out = velocity * decay;
    if out.length() < 0.1 {
        Vec2::ZERO
    } else {
        out
    }
}

/// Velocity for a seek toward `to_target`. Steers toward the desired
/// velocity (full speed, easing off inside braking distance) so sideways
/// momentum bleeds off instead of orbiting, and never overshoots.
pub fn seek_velocity(
    velocity: Vec2,
    to_target: Vec2,
    settings: &PhysicsSettings,
    dt: f32,
) -> Vec2 {
    let distance = to_target.length();
    if distance <= f32::EPSILON || dt <= 0.0 {
        return Vec2::ZERO;
    }
    let braking = (2.0 * settings.acceleration.max(0.0) * distance).sqrt();
    let desired = to_target / distance * settings.max_speed.max(0.0).min(braking);
    let steering = (desired - velocity).clamp_length_max(settings.acceleration.max(0.0) * dt);
    let out = velocity + steering;
    if out.length() * dt > distance {
        to_target / dt
    } else {
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepResult {
    /// Displacement actually applied.
    pub delta: Vec2,
    /// Sides on which the motion was stopped by collision.
    pub blocked: DirectionSet,
}

/// Move `aabb` by `delta`, x axis first, then y. A blocked axis snaps flush
/// against the blocking tile.
pub fn sweep<W: TileCollisionQuery + ?Sized>(
    world: &W,
    probe: &CollisionProbe,
    aabb: &Aabb,
    delta: Vec2,
    tile_size: f32,
    counters: &mut PhysicsCounters,
) -> SweepResult {
    let limit = tile_size * MAX_SWEEP_TILES;
    let delta = delta.clamp(Vec2::splat(-limit), Vec2::splat(limit));
    let mut current = *aabb;
    let mut blocked = DirectionSet::EMPTY;

    if delta.x != 0.0 {
        let moved = current.translated(Vec2::new(delta.x, 0.0));
        if !collides(world, probe, &moved, tile_size, counters) {
            current = moved;
        } else {
            let width = current.width();
            if delta.x > 0.0 {
                let tile_x = (moved.max_x / tile_size).floor();
                let min_x = (tile_x * tile_size - width).max(current.min_x);
                current = Aabb {
                    min_x,
                    max_x: min_x + width,
                    ..current
                };
                blocked.insert(Direction::Right);
            } else {
                let tile_x = (moved.min_x / tile_size).floor();
                let min_x = ((tile_x + 1.0) * tile_size).min(current.min_x);
                current = Aabb {
                    min_x,
                    max_x: min_x + width,
                    ..current
                };
                blocked.insert(Direction::Left);
            }
        }
    }

    if delta.y != 0.0 {
        let moved = current.translated(Vec2::new(0.0, delta.y));
        if !collides(world, probe, &moved, tile_size, counters) {
            current = moved;
        } else {
            let height = current.height();
            if delta.y < 0.0 {
                let tile_y = (moved.min_y / tile_size).floor();
                let min_y = ((tile_y + 1.0) * tile_size).min(current.min_y);
                current = Aabb {
                    min_y,
                    max_y: min_y + height,
                    ..current
                };
                blocked.insert(Direction::Down);
            } else {
                let tile_y = (moved.max_y / tile_size).floor();
                let min_y = (tile_y * tile_size - height).max(current.min_y);
                current = Aabb {
                    min_y,
                    max_y: min_y + height,
                    ..current
                };
                blocked.insert(Direction::Up);
            }
        }
    }

    SweepResult {
        delta: current.center() - aabb.center(),
        blocked,
    }
}

fn collides<W: TileCollisionQuery + ?Sized>(
    world: &W,
    probe: &CollisionProbe,
    aabb: &Aabb,
    tile_size: f32,
    counters: &mut PhysicsCounters,
) -> bool {
    counters.collision_checks = counters.collision_checks.saturating_add(1);
    let rect = registered_tile_rect(aabb, tile_size);
    world.has_tile_collision(rect.min, rect.max, probe)
}
