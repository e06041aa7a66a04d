use std::collections::{hash_map::Entry, HashMap, VecDeque};

use bevy::prelude::*;

use crate::collision::{CollisionProbe, TileCollisionQuery};
use crate::geometry::TileRect;

/// Tiles explored per search before giving up.
const MAX_SEARCH_NODES: usize = 8192;
/// How far past the start/goal bounding box the search may wander, in tiles.
const SEARCH_MARGIN: i32 = 12;

pub type AgentId = u32;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Waypoint {
    Next(Vec2),
    Arrived,
    /// The agent no longer exists (released or reset).
    Lost,
}

#[derive(Clone, Debug)]
struct PathAgent {
    waypoints: Vec<Vec2>,
    cursor: usize,
}

/// Owns path-following agents. Ids are never reused, so an id held across a
/// [`PathManager::reset`] reliably reports [`Waypoint::Lost`].
#[derive(Default)]
pub struct PathManager {
    agents: HashMap<AgentId, PathAgent>,
    next_id: AgentId,
}

impl PathManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan a path for a box of `footprint` tiles from `from` to `goal`
    /// (world-space centers) and allocate an agent following it.
    pub fn allocate<W: TileCollisionQuery + ?Sized>(
        &mut self,
        world: &W,
        probe: &CollisionProbe,
        from: Vec2,
        goal: Vec2,
        footprint: IVec2,
        tile_size: f32,
    ) -> Option<AgentId> {
        let footprint = footprint.max(IVec2::ONE);
        let start = footprint_origin(from, footprint, tile_size);
        let end = footprint_origin(goal, footprint, tile_size);
        let tiles = find_tile_path(world, probe, start, end, footprint)?;
        let waypoints = tiles
            .into_iter()
            .skip(1)
            .map(|t| (t.as_vec2() + footprint.as_vec2() * 0.5) * tile_size)
            .collect();

        self.next_id = self.next_id.wrapping_add(1).max(1);
        let id = self.next_id;
        self.agents.insert(
            id,
            PathAgent {
                waypoints,
                cursor: 0,
            },
        );
        Some(id)
    }

    pub fn release(&mut self, agent: AgentId) -> bool {
        self.agents.remove(&agent).is_some()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.agents.contains_key(&agent)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Advance past every waypoint within `tolerance` of `position` and
    /// return the next one.
    pub fn next_waypoint(&mut self, agent: AgentId, position: Vec2, tolerance: f32) -> Waypoint {
        let Some(state) = self.agents.get_mut(&agent) else {
            return Waypoint::Lost;
        };
        while let Some(wp) = state.waypoints.get(state.cursor) {
            if wp.distance(position) > tolerance {
                return Waypoint::Next(*wp);
            }
            state.cursor += 1;
        }
        Waypoint::Arrived
    }

    pub fn remaining(&self, agent: AgentId) -> Option<&[Vec2]> {
        self.agents
            .get(&agent)
            .map(|a| &a.waypoints[a.cursor.min(a.waypoints.len())..])
    }

    /// Drop every agent. Controllers holding ids must fall back on their own.
    pub fn reset(&mut self) {
        if !self.agents.is_empty() {
            info!("[Axiom movement] Path manager reset ({} agents dropped)", self.agents.len());
        }
        self.agents.clear();
    }
}

fn footprint_origin(center: Vec2, footprint: IVec2, tile_size: f32) -> IVec2 {
    (center / tile_size - footprint.as_vec2() * 0.5)
        .round()
        .as_ivec2()
}

const NEIGHBORS: [IVec2; 8] = [
    IVec2::new(1, 0),
    IVec2::new(-1, 0),
    IVec2::new(0, 1),
    IVec2::new(0, -1),
    IVec2::new(1, 1),
    IVec2::new(1, -1),
    IVec2::new(-1, 1),
    IVec2::new(-1, -1),
];

/// BFS over footprint origins, 8-way, never cutting a blocked corner.
fn find_tile_path<W: TileCollisionQuery + ?Sized>(
    world: &W,
    probe: &CollisionProbe,
    start: IVec2,
    goal: IVec2,
    footprint: IVec2,
) -> Option<Vec<IVec2>> {
    let bounds = TileRect::new(start.min(goal), start.max(goal)).expand(SEARCH_MARGIN);
    let open = |origin: IVec2| {
        bounds.contains(origin)
            && !world.has_tile_collision(origin, origin + footprint - IVec2::ONE, probe)
    };
    if !open(goal) {
        return None;
    }

    let mut visited: HashMap<IVec2, Option<IVec2>> = HashMap::new();
    let mut queue = VecDeque::new();
    visited.insert(start, None);
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        if node == goal {
            return Some(reconstruct_path(&visited, goal));
        }
        if visited.len() > MAX_SEARCH_NODES {
            break;
        }
        for step in NEIGHBORS {
            let next = node + step;
            if !open(next) {
                continue;
            }
            if step.x != 0
                && step.y != 0
                && (!open(node + IVec2::new(step.x, 0)) || !open(node + IVec2::new(0, step.y)))
            {
                continue;
            }
            enqueue_if_new(&mut visited, &mut queue, next, node);
        }
    }
    None
}

fn insert_parent_if_new(
    visited: &mut HashMap<IVec2, Option<IVec2>>,
    node: IVec2,
    parent: IVec2,
) -> bool {
    match visited.entry(node) {
        Entry::Vacant(entry) => {
            entry.insert(Some(parent));
            true
        }
        Entry::Occupied(_) => false,
    }
}

fn enqueue_if_new(
    visited: &mut HashMap<IVec2, Option<IVec2>>,
    queue: &mut VecDeque<IVec2>,
    node: IVec2,
    parent: IVec2,
) -> bool {
    if insert_parent_if_new(visited, node, parent) {
        queue.push_back(node);
        return true;
    }
    false
}

fn reconstruct_path(visited: &HashMap<IVec2, Option<IVec2>>, goal: IVec2) -> Vec<IVec2> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(Some(parent)) = visited.get(&current) {
        path.push(*parent);
        current = *parent;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityHandle;
    use crate::tilemap::Tilemap;

    fn probe() -> CollisionProbe {
        CollisionProbe::raw(EntityHandle::from_raw_parts(0, 0))
    }

    fn center(x: i32, y: i32) -> Vec2 {
        Vec2::new(x as f32 + 0.5, y as f32 + 0.5) * 16.0
    }

    #[test]
    fn path_goes_around_a_wall() {
        let map = Tilemap::from_rows(&[
            "#######",
            "#..#..#",
            "#..#..#",
            "#.....#",
            "#######",
        ]);
        let mut paths = PathManager::new();
        let agent = paths
            .allocate(&map, &probe(), center(1, 3), center(5, 3), IVec2::ONE, 16.0)
            .expect("path should exist");
        let route = paths.remaining(agent).unwrap().to_vec();
        assert_eq!(route.last().copied(), Some(center(5, 3)));
        // every waypoint is an open tile
        for wp in &route {
            let tile = (*wp / 16.0).floor().as_ivec2();
            assert!(!map.is_solid(tile.x, tile.y));
        }
        assert!(route.iter().any(|wp| (*wp / 16.0).floor().as_ivec2().y == 1));
    }

    #[test]
    fn diagonal_steps_never_cut_corners() {
        let map = Tilemap::from_rows(&["....", ".#..", "...."]);
        let mut paths = PathManager::new();
        let agent = paths
            .allocate(&map, &probe(), center(0, 0), center(2, 2), IVec2::ONE, 16.0)
            .unwrap();
        let mut prev = IVec2::new(0, 0);
        for wp in paths.remaining(agent).unwrap() {
            let tile = (*wp / 16.0).floor().as_ivec2();
            let step = tile - prev;
            if step.x != 0 && step.y != 0 {
                assert!(!map.is_solid(prev.x + step.x, prev.y));
                assert!(!map.is_solid(prev.x, prev.y + step.y));
            }
            prev = tile;
        }
        assert_eq!(prev, IVec2::new(2, 2));
    }

    #[test]
    fn waypoints_advance_and_reset_loses_agents() {
        let map = Tilemap::from_rows(&["....", "...."]);
        let mut paths = PathManager::new();
        let agent = paths
            .allocate(&map, &probe(), center(0, 0), center(2, 0), IVec2::ONE, 16.0)
            .unwrap();
        assert_eq!(paths.next_waypoint(agent, center(0, 0), 1.0), Waypoint::Next(center(1, 0)));
        assert_eq!(paths.next_waypoint(agent, center(1, 0), 1.0), Waypoint::Next(center(2, 0)));
        assert_eq!(paths.next_waypoint(agent, center(2, 0), 1.0), Waypoint::Arrived);

        paths.reset();
        assert_eq!(paths.next_waypoint(agent, center(2, 0), 1.0), Waypoint::Lost);
        let again = paths
            .allocate(&map, &probe(), center(0, 0), center(1, 0), IVec2::ONE, 16.0)
            .unwrap();
        assert_ne!(again, agent);
        assert!(paths.release(again));
        assert!(!paths.release(again));
    }

    #[test]
    fn blocked_goal_has_no_path() {
        let map = Tilemap::from_rows(&["..#", "..."]);
        let mut paths = PathManager::new();
        assert!(paths
            .allocate(&map, &probe(), center(0, 0), center(2, 1), IVec2::ONE, 16.0)
            .is_none());
        assert_eq!(paths.agent_count(), 0);
    }
}
