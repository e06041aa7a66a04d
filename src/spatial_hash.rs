use std::collections::HashMap;

use bevy::math::IVec2;

use crate::entity::EntityHandle;
use crate::geometry::TileRect;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TileOccupant {
    pub entity: EntityHandle,
    /// Whether other entities collide with this one.
    pub solid: bool,
}

/// Which entities are registered on which tiles. Written only when an
/// entity's registered tile rect changes; read by every survey.
#[derive(Clone, Debug, Default)]
pub struct EntityTileGrid {
    cells: HashMap<IVec2, Vec<TileOccupant>>,
    entity_cells: HashMap<EntityHandle, (TileRect, bool)>,
}

impl EntityTileGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupants(&self, tile: IVec2) -> &[TileOccupant] {
        self.cells.get(&tile).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn registered_rect(&self, entity: EntityHandle) -> Option<TileRect> {
        self.entity_cells.get(&entity).map(|(rect, _)| *rect)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Register `entity` on `rect`. Returns false when nothing changed.
    pub fn upsert(&mut self, entity: EntityHandle, rect: TileRect, solid: bool) -> bool {
        if let Some(old) = self.entity_cells.get(&entity) {
            if *old == (rect, solid) {
                return false;
            }
        }
        self.remove(entity);
        for tile in rect.tiles() {
            self.cells
                .entry(tile)
                .or_default()
                .push(TileOccupant { entity, solid });
        }
        self.entity_cells.insert(entity, (rect, solid));
        true
    }

    pub fn remove(&mut self, entity: EntityHandle) {
        let Some((old_rect, _)) = self.entity_cells.remove(&entity) else {
            return;
        };
        for tile in old_rect.tiles() {
            if let Some(list) = self.cells.get_mut(&tile) {
                list.retain(|o| o.entity != entity);
                if list.is_empty() {
                    self.cells.remove(&tile);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_updates_move_entity_between_tiles() {
        let mut grid = EntityTileGrid::new();
        let entity = EntityHandle::from_raw_parts(42, 0);

        assert!(grid.upsert(entity, TileRect::from_tile(IVec2::new(0, 0)), true));
        assert_eq!(grid.occupants(IVec2::new(0, 0)).len(), 1);
        assert!(!grid.upsert(entity, TileRect::from_tile(IVec2::new(0, 0)), true));

        let moved = TileRect::new(IVec2::new(2, 0), IVec2::new(3, 0));
        assert!(grid.upsert(entity, moved, true));
        assert!(grid.occupants(IVec2::new(0, 0)).is_empty());
        assert!(grid
            .occupants(IVec2::new(3, 0))
            .iter()
            .any(|o| o.entity == entity && o.solid));
        assert_eq!(grid.registered_rect(entity), Some(moved));

        grid.remove(entity);
        assert_eq!(grid.cell_count(), 0);
        assert_eq!(grid.registered_rect(entity), None);
    }
}
