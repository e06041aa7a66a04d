use bevy::math::IVec2;
use serde::{Deserialize, Serialize};

use crate::collision::{
    CollisionLayer, CollisionProbe, CollisionScan, CollisionTypeSet, FluidQuery, FluidSurvey,
    MaterialId, TileCollisionQuery,
};
use crate::entity::EntityHandle;
use crate::geometry::TileRect;
use crate::spatial_hash::EntityTileGrid;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum TileType {
    Empty = 0,
    Solid = 1,
    Platform = 2,
    Barrier = 3,
    Water = 4,
    Waterfall = 5,
}

impl TileType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => TileType::Solid,
            2 => TileType::Platform,
            3 => TileType::Barrier,
            4 => TileType::Water,
            5 => TileType::Waterfall,
            _ => TileType::Empty,
        }
    }

    pub fn from_char(c: char) -> Self {
        match c {
            '#' => TileType::Solid,
            '=' => TileType::Platform,
            'X' => TileType::Barrier,
            '~' => TileType::Water,
            '|' => TileType::Waterfall,
            _ => TileType::Empty,
        }
    }

    pub fn collision_type(self) -> CollisionTypeSet {
        match self {
            TileType::Solid => CollisionTypeSet::SOLID,
            TileType::Platform => CollisionTypeSet::PLATFORM,
            TileType::Barrier => CollisionTypeSet::BARRIER,
            TileType::Empty | TileType::Water | TileType::Waterfall => CollisionTypeSet::NONE,
        }
    }

    pub fn is_solid(self) -> bool {
        !self.collision_type().is_empty()
    }

    pub fn is_fluid(self) -> bool {
        self == TileType::Water
    }

    pub fn is_waterfall(self) -> bool {
        self == TileType::Waterfall
    }
}

/// Static tile grid plus the entity registration layer.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Tilemap {
    pub width: usize,
    pub height: usize,
    pub tiles: Vec<u8>,
    /// Material/theme id per tile, parallel to `tiles`. 0 means none.
    #[serde(default)]
    pub materials: Vec<u8>,
    #[serde(skip)]
    pub entities: EntityTileGrid,
}

impl Tilemap {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            tiles: vec![TileType::Empty as u8; width * height],
            materials: vec![0; width * height],
            entities: EntityTileGrid::new(),
        }
    }

    /// Build from ASCII rows, top row first (row 0 of the grid is the last
    /// string). `#` solid, `=` platform, `X` barrier, `~` water,
    /// `|` waterfall, anything else empty.
    pub fn from_rows(rows: &[&str]) -> Self {
        let height = rows.len();
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0);
        let mut map = Self::new(width, height);
        for (row_index, row) in rows.iter().enumerate() {
            let y = (height - 1 - row_index) as i32;
            for (x, c) in row.chars().enumerate() {
                map.set(x as i32, y, TileType::from_char(c));
            }
        }
        map
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut map: Tilemap = serde_json::from_str(json)?;
        if map.materials.len() != map.tiles.len() {
            map.materials.resize(map.tiles.len(), 0);
        }
        Ok(map)
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    pub fn get_tile(&self, x: i32, y: i32) -> u8 {
        self.index(x, y)
            .and_then(|i| self.tiles.get(i).copied())
            .unwrap_or(TileType::Empty as u8)
    }

    pub fn get(&self, x: i32, y: i32) -> TileType {
        TileType::from_u8(self.get_tile(x, y))
    }

    pub fn set(&mut self, x: i32, y: i32, tile: TileType) {
        if let Some(i) = self.index(x, y) {
            self.tiles[i] = tile as u8;
        }
    }

    pub fn fill(&mut self, rect: TileRect, tile: TileType) {
        for t in rect.tiles() {
            self.set(t.x, t.y, tile);
        }
    }

    pub fn set_material(&mut self, x: i32, y: i32, material: u8) {
        if let Some(i) = self.index(x, y) {
            if self.materials.len() != self.tiles.len() {
                self.materials.resize(self.tiles.len(), 0);
            }
            self.materials[i] = material;
        }
    }

    pub fn is_solid(&self, x: i32, y: i32) -> bool {
        self.get(x, y).is_solid()
    }

    pub fn register_entity(&mut self, entity: EntityHandle, rect: TileRect, solid: bool) -> bool {
        self.entities.upsert(entity, rect, solid)
    }

    pub fn unregister_entity(&mut self, entity: EntityHandle) {
        self.entities.remove(entity);
    }

    fn tile_collision(&self, tile: IVec2) -> CollisionTypeSet {
        self.get(tile.x, tile.y).collision_type()
    }

    fn entity_collision(&self, tile: IVec2, probe: &CollisionProbe) -> CollisionTypeSet {
        let blocked = self
            .entities
            .occupants(tile)
            .iter()
            .any(|o| o.solid && !probe.ignores(o.entity));
        if blocked {
            CollisionTypeSet::ENTITY
        } else {
            CollisionTypeSet::NONE
        }
    }

    /// A small development level: floor, a raised ledge, a pit and a pool.
    pub fn test_level() -> Self {
        let mut map = Tilemap::from_rows(&[
            "#..............................#",
            "#..............................#",
            "#..............................#",
            "#..............................#",
            "#..............................#",
            "#..............................#",
            "#..............................#",
            "#.................######.......#",
            "#..............................#",
            "#......................~~~.....#",
            "###########...##########~~~#####",
            "################################",
        ]);
        for x in 0..map.width as i32 {
            map.set_material(x, 0, 1);
            map.set_material(x, 1, 2);
        }
        map
    }
}

impl TileCollisionQuery for Tilemap {
    fn has_tile_collision(&self, min: IVec2, max: IVec2, probe: &CollisionProbe) -> bool {
        let blocking = probe.blocking();
        let rect = TileRect::new(min, max);
        rect.tiles().any(|tile| {
            let types = self
                .tile_collision(tile)
                .union(self.entity_collision(tile, probe));
            types.intersects(blocking)
        })
    }

    fn collision_types(
        &self,
        probe: &CollisionProbe,
        layer: CollisionLayer,
        min: IVec2,
        max: IVec2,
    ) -> CollisionScan {
        let mut scan = CollisionScan::default();
        for tile in TileRect::new(min, max).tiles() {
            let mut types = CollisionTypeSet::NONE;
            if layer.includes_tiles() {
                types = types.union(self.tile_collision(tile));
            }
            if layer.includes_entities() {
                types = types.union(self.entity_collision(tile, probe));
            }
            if scan.primary.is_empty() && types.intersects(probe.blocking()) {
                scan.primary = types;
            }
            scan.types = scan.types.union(types);
        }
        scan
    }

    fn tile_material(&self, tile: IVec2) -> Option<MaterialId> {
        let i = self.index(tile.x, tile.y)?;
        match self.materials.get(i).copied().unwrap_or(0) {
            0 => None,
            m => Some(MaterialId(m)),
        }
    }

    fn solid_entity_at(&self, tile: IVec2, probe: &CollisionProbe) -> Option<EntityHandle> {
        self.entities
            .occupants(tile)
            .iter()
            .find(|o| o.solid && !probe.ignores(o.entity))
            .map(|o| o.entity)
    }
}

impl FluidQuery for Tilemap {
    fn fill_survey(&self, fluid: &mut FluidSurvey, registered: TileRect, _entity: EntityHandle) {
        let mut fluid_tiles = 0usize;
        let mut total = 0usize;
        for tile in registered.tiles() {
            total += 1;
            match self.get(tile.x, tile.y) {
                TileType::Water => {
                    fluid_tiles += 1;
                    fluid.set(FluidSurvey::INSIDE_FLUID, true);
                }
                TileType::Waterfall => fluid.set(FluidSurvey::INSIDE_WATERFALL, true),
                _ => {}
            }
        }
        fluid.set(FluidSurvey::SUBMERGED, total > 0 && fluid_tiles == total);

        let ring = registered.expand(1);
        for tile in ring.tiles().filter(|t| !registered.contains(*t)) {
            match self.get(tile.x, tile.y) {
                TileType::Water => fluid.set(FluidSurvey::TOUCH_FLUID, true),
                TileType::Waterfall => fluid.set(FluidSurvey::TOUCH_WATERFALL, true),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_rows_put_last_row_at_y_zero() {
        let map = Tilemap::from_rows(&["..=", "#.~"]);
        assert_eq!(map.get(0, 0), TileType::Solid);
        assert_eq!(map.get(2, 0), TileType::Water);
        assert_eq!(map.get(2, 1), TileType::Platform);
        assert_eq!(map.get(-1, 0), TileType::Empty);
        assert_eq!(map.get(0, 5), TileType::Empty);
    }

    #[test]
    fn collision_respects_passable_override_and_entities() {
        let mut map = Tilemap::from_rows(&["...", "=.."]);
        let me = EntityHandle::from_raw_parts(0, 0);
        let other = EntityHandle::from_raw_parts(1, 0);
        let mut probe = CollisionProbe::raw(me);
        assert!(map.has_tile_collision(IVec2::new(0, 0), IVec2::new(0, 0), &probe));
        probe.passable = CollisionTypeSet::PLATFORM;
        assert!(!map.has_tile_collision(IVec2::new(0, 0), IVec2::new(0, 0), &probe));

        map.register_entity(other, TileRect::from_tile(IVec2::new(2, 1)), true);
        map.register_entity(me, TileRect::from_tile(IVec2::new(1, 1)), true);
        assert!(map.has_tile_collision(IVec2::new(2, 1), IVec2::new(2, 1), &probe));
        assert!(!map.has_tile_collision(IVec2::new(1, 1), IVec2::new(1, 1), &probe));
        assert_eq!(map.solid_entity_at(IVec2::new(2, 1), &probe), Some(other));

        let scan = map.collision_types(&probe, CollisionLayer::Tiles, IVec2::new(0, 0), IVec2::new(2, 1));
        assert!(scan.types.contains(CollisionTypeSet::PLATFORM));
        assert!(!scan.types.contains(CollisionTypeSet::ENTITY));
    }

    #[test]
    fn fluid_survey_reports_inside_and_touch() {
        let map = Tilemap::from_rows(&["~|.", "~.."]);
        let mut fluid = FluidSurvey::default();
        map.fill_survey(&mut fluid, TileRect::from_tile(IVec2::new(0, 0)), EntityHandle::PLACEHOLDER);
        assert!(fluid.has(FluidSurvey::INSIDE_FLUID));
        assert!(fluid.has(FluidSurvey::SUBMERGED));
        assert!(fluid.has(FluidSurvey::TOUCH_FLUID));
        assert!(fluid.has(FluidSurvey::TOUCH_WATERFALL));
        assert!(!fluid.has(FluidSurvey::INSIDE_WATERFALL));
    }
}
