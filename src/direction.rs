use bevy::math::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

/// Facing / gravity direction. Incrementing the discriminant is a quarter
/// turn counter-clockwise, which is what lets offsets authored for `Down` be
/// reused for every other orientation through [`rotate`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Down = 0,
    Right = 1,
    Up = 2,
    Left = 3,
    None = 4,
}

impl Direction {
    pub const CARDINALS: [Direction; 4] = [
        Direction::Down,
        Direction::Right,
        Direction::Up,
        Direction::Left,
    ];

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Direction::Down,
            1 => Direction::Right,
            2 => Direction::Up,
            3 => Direction::Left,
            _ => Direction::None,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "down" => Some(Direction::Down),
            "right" => Some(Direction::Right),
            "up" => Some(Direction::Up),
            "left" => Some(Direction::Left),
            "none" => Some(Direction::None),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Down => "down",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Left => "left",
            Direction::None => "none",
        }
    }

    pub fn is_none(self) -> bool {
        self == Direction::None
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Down | Direction::Up)
    }

    /// Number of counter-clockwise quarter turns from `Down`.
    pub fn quarter_turns(self) -> u8 {
        match self {
            Direction::None => 0,
            d => d as u8,
        }
    }

    /// Rotate by another direction's quarter turns. `None` stays `None`.
    pub fn rotated(self, by: Direction) -> Direction {
        if self.is_none() {
            return Direction::None;
        }
        Direction::from_u8((self as u8 + by.quarter_turns()) % 4)
    }

    pub fn opposite(self) -> Direction {
        self.rotated(Direction::Up)
    }

    /// Unit tile offset pointing this way (`Down` is `(0, -1)`, y is up).
    pub fn offset(self) -> IVec2 {
        if self.is_none() {
            return IVec2::ZERO;
        }
        rotate(IVec2::NEG_Y, self)
    }

    pub fn unit(self) -> Vec2 {
        self.offset().as_vec2()
    }

    /// Closest cardinal direction for a vector, `None` for a zero vector.
    pub fn from_vec(v: Vec2) -> Direction {
        if v.length_squared() <= f32::EPSILON {
            return Direction::None;
        }
        if v.x.abs() > v.y.abs() {
            if v.x > 0.0 {
                Direction::Right
            } else {
                Direction::Left
            }
        } else if v.y > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

/// Rotate a `Down`-frame tile offset into the frame of `direction`.
pub fn rotate(offset: IVec2, direction: Direction) -> IVec2 {
    let mut v = offset;
    for _ in 0..direction.quarter_turns() {
        v = IVec2::new(-v.y, v.x);
    }
    v
}

pub fn rotate_vec(v: Vec2, direction: Direction) -> Vec2 {
    let mut out = v;
    for _ in 0..direction.quarter_turns() {
        out = Vec2::new(-out.y, out.x);
    }
    out
}

/// Set of cardinal directions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct DirectionSet(pub u8);

impl DirectionSet {
    pub const EMPTY: Self = Self(0);

    fn bit(direction: Direction) -> u8 {
        if direction.is_none() {
            0
        } else {
            1 << (direction as u8)
        }
    }

    pub fn insert(&mut self, direction: Direction) {
        self.0 |= Self::bit(direction);
    }

    pub fn with(mut self, direction: Direction) -> Self {
        self.insert(direction);
        self
    }

    pub fn contains(self, direction: Direction) -> bool {
        let bit = Self::bit(direction);
        bit != 0 && self.0 & bit != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Direction> {
        Direction::CARDINALS
            .into_iter()
            .filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Direction> for DirectionSet {
    fn from_iter<I: IntoIterator<Item = Direction>>(iter: I) -> Self {
        let mut set = DirectionSet::EMPTY;
        for d in iter {
            set.insert(d);
        }
        set
    }
}
