use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::direction::Direction;
use crate::survey::{flag_names, Survey, SurveyFlags};

/// Index of a move inside its [`MoveSet`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct MoveId(pub u16);

/// One named discrete move: a fixed trajectory along a direction, paced by
/// its animation cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveDef {
    pub name: String,
    pub direction: Direction,
    /// Tiles travelled per cycle.
    pub distance: f32,
    /// Seconds per cycle.
    pub duration: f32,
    #[serde(default, with = "flag_names")]
    pub requires: SurveyFlags,
    #[serde(default, with = "flag_names")]
    pub forbids: SurveyFlags,
    /// Flags that must keep holding on every new tile for the move to stay
    /// legal.
    #[serde(default, with = "flag_names")]
    pub sustain: SurveyFlags,
    #[serde(default = "default_interruptible")]
    pub interruptible: bool,
}

fn default_interruptible() -> bool {
    true
}

impl MoveDef {
    /// Tiles per second.
    pub fn speed(&self) -> f32 {
        if self.duration > 0.0 {
            self.distance / self.duration
        } else {
            0.0
        }
    }

    pub fn matches(&self, direction: Direction, flags: SurveyFlags) -> bool {
        self.direction == direction
            && flags.contains(self.requires)
            && !flags.intersects(self.forbids)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveSet {
    pub moves: Vec<MoveDef>,
}

impl MoveSet {
    /// First move in definition order that accepts `direction` under the
    /// survey. No survey means nothing qualifies.
    pub fn lookup(&self, direction: Direction, survey: Option<&Survey>) -> Option<MoveId> {
        let flags = survey?.flags;
        self.moves
            .iter()
            .position(|m| m.matches(direction, flags))
            .map(|i| MoveId(i as u16))
    }

    pub fn get(&self, id: MoveId) -> Option<&MoveDef> {
        self.moves.get(usize::from(id.0))
    }

    pub fn name(&self, id: MoveId) -> Option<&str> {
        self.get(id).map(|m| m.name.as_str())
    }

    /// Whether the move may be replaced or cut short after `progress` tiles.
    /// A finished move is always interruptible.
    pub fn is_interruptible(&self, id: MoveId, progress: f32) -> bool {
        match self.get(id) {
            Some(m) => m.interruptible || progress >= m.distance,
            None => true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveLibrary {
    pub sets: HashMap<String, MoveSet>,
}

impl MoveLibrary {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn get(&self, name: &str) -> Option<&MoveSet> {
        self.sets.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, set: MoveSet) {
        self.sets.insert(name.into(), set);
    }

    /// Built-in sets: a gravity-bound "walker" and a free "flyer".
    pub fn default_library() -> Self {
        let mut library = Self::default();
        library.insert(
            "walker",
            MoveSet {
                moves: vec![
                    walker_move("fall", Direction::Down, 1.0, 0.12, SurveyFlags::EMPTY, SurveyFlags::FLOOR, false),
                    walker_move("walk_left", Direction::Left, 1.0, 0.25, SurveyFlags::FLOOR, SurveyFlags::WALL_LEFT, true),
                    walker_move("walk_right", Direction::Right, 1.0, 0.25, SurveyFlags::FLOOR, SurveyFlags::WALL_RIGHT, true),
                    walker_move("climb_up", Direction::Up, 1.0, 0.3, SurveyFlags::FLOOR.union(SurveyFlags::WALL_RIGHT), SurveyFlags::CEILING, false),
                ],
            },
        );
        library.insert(
            "flyer",
            MoveSet {
                moves: Direction::CARDINALS
                    .into_iter()
                    .map(|d| MoveDef {
                        name: format!("fly_{}", d.label()),
                        direction: d,
                        distance: 1.0,
                        duration: 0.2,
                        requires: SurveyFlags::EMPTY,
                        forbids: SurveyFlags::contact(d),
                        sustain: SurveyFlags::EMPTY,
                        interruptible: true,
                    })
                    .collect(),
            },
        );
        library
    }
}

fn walker_move(
    name: &str,
    direction: Direction,
    distance: f32,
    duration: f32,
    requires: SurveyFlags,
    forbids: SurveyFlags,
    interruptible: bool,
) -> MoveDef {
    // walking moves keep needing ground under them
    let sustain = if direction.is_horizontal() {
        SurveyFlags::FLOOR
    } else {
        SurveyFlags::EMPTY
    };
    MoveDef {
        name: name.to_string(),
        direction,
        distance,
        duration,
        requires,
        forbids,
        sustain,
        interruptible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::CollisionProbe;
    use crate::config::MovementConfig;
    use crate::entity::EntityHandle;
    use crate::physics_core::Aabb;
    use crate::tilemap::Tilemap;

    fn survey(rows: &[&str], x: f32, y: f32) -> Survey {
        let map = Tilemap::from_rows(rows);
        let aabb = Aabb::from_center(x, y, 16.0, 16.0);
        let probe = CollisionProbe::raw(EntityHandle::from_raw_parts(0, 0));
        Survey::construct(&aabb, Direction::Down, &probe, &map, &MovementConfig::default())
    }

    #[test]
    fn lookup_respects_requires_and_forbids() {
        let library = MoveLibrary::default_library();
        let walker = library.get("walker").unwrap();
        let open = survey(&["...", "...", "###"], 24.0, 24.0);
        let id = walker.lookup(Direction::Right, Some(&open)).unwrap();
        assert_eq!(walker.name(id), Some("walk_right"));
        assert_eq!(walker.lookup(Direction::Down, Some(&open)), None);

        let walled = survey(&["...", "..#", "###"], 24.0, 24.0);
        assert_eq!(walker.lookup(Direction::Right, Some(&walled)), None);
        let climb = walker.lookup(Direction::Up, Some(&walled)).unwrap();
        assert_eq!(walker.name(climb), Some("climb_up"));

        let midair = survey(&["...", "...", "..."], 24.0, 24.0);
        assert_eq!(walker.name(walker.lookup(Direction::Down, Some(&midair)).unwrap()), Some("fall"));
        assert_eq!(walker.lookup(Direction::Right, None), None);
    }

    #[test]
    fn first_matching_move_wins() {
        let mut set = MoveSet::default();
        for name in ["a", "b"] {
            set.moves.push(MoveDef {
                name: name.into(),
                direction: Direction::Left,
                distance: 1.0,
                duration: 0.5,
                requires: SurveyFlags::EMPTY,
                forbids: SurveyFlags::EMPTY,
                sustain: SurveyFlags::EMPTY,
                interruptible: false,
            });
        }
        let s = survey(&["..."], 24.0, 8.0);
        let id = set.lookup(Direction::Left, Some(&s)).unwrap();
        assert_eq!(set.name(id), Some("a"));
        assert!(!set.is_interruptible(id, 0.5));
        assert!(set.is_interruptible(id, 1.0));
        assert_eq!(set.get(id).map(MoveDef::speed), Some(2.0));
    }

    #[test]
    fn library_loads_flag_names_from_json() {
        let json = r#"{
            "sets": {
                "crawler": {
                    "moves": [
                        {
                            "name": "crawl",
                            "direction": "Right",
                            "distance": 1.0,
                            "duration": 0.5,
                            "requires": ["floor", "on_bottom_edge"],
                            "forbids": ["wall_right"]
                        }
                    ]
                }
            }
        }"#;
        let library = MoveLibrary::from_json(json).unwrap();
        let crawl = &library.get("crawler").unwrap().moves[0];
        assert_eq!(
            crawl.requires,
            SurveyFlags::FLOOR.union(SurveyFlags::ON_BOTTOM_EDGE)
        );
        assert!(crawl.interruptible);
        assert!(crawl.sustain.is_empty());

        let bad = json.replace("on_bottom_edge", "on_the_moon");
        assert!(MoveLibrary::from_json(&bad).is_err());

        let text = serde_json::to_string(crawl).unwrap();
        assert!(text.contains("\"wall_right\""));
    }
}
