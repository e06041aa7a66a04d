use std::collections::VecDeque;

use bevy::prelude::*;
use serde::Serialize;

use crate::entity::EntityHandle;

const MAX_EVENTS: usize = 500;

pub const MOVE_START: &str = "move_start";
pub const MOVE_END: &str = "move_end";
pub const MOVE_INTERRUPTED: &str = "move_interrupted";
pub const MOVE_BLOCKED: &str = "move_blocked";
pub const FOOTSTEP: &str = "footstep";
pub const ARRIVED: &str = "arrived";
pub const TARGET_LOST: &str = "target_lost";
pub const PATH_LOST: &str = "path_lost";
pub const COLLISION_PARENT_CHANGED: &str = "collision_parent_changed";

/// Notification for the presentation layers (animation, audio).
#[derive(Serialize, Clone, Debug)]
pub struct MovementEvent {
    pub name: String,
    pub data: serde_json::Value,
    pub frame: u64,
    pub source_entity: Option<u64>,
}

#[derive(Resource, Default)]
pub struct MovementEventBus {
    pub recent: VecDeque<MovementEvent>,
    pub frame: u64,
    pub dropped_events: u64,
    last_overflow_log_frame: u64,
}

impl MovementEventBus {
    pub fn emit(
        &mut self,
        name: impl Into<String>,
        data: serde_json::Value,
        source: Option<EntityHandle>,
    ) {
        self.recent.push_back(MovementEvent {
            name: name.into(),
            data,
            frame: self.frame,
            source_entity: source.map(EntityHandle::to_bits),
        });
        if self.recent.len() > MAX_EVENTS {
            let excess = self.recent.len() - MAX_EVENTS;
            for _ in 0..excess {
                self.recent.pop_front();
            }
            self.dropped_events = self.dropped_events.saturating_add(excess as u64);
            if self.frame.saturating_sub(self.last_overflow_log_frame) >= 60 {
                self.last_overflow_log_frame = self.frame;
                warn!(
                    "[Axiom movement] Dropped {} buffered events (total dropped: {})",
                    excess, self.dropped_events
                );
            }
        }
    }

    pub fn tick(&mut self) {
        self.frame = self.frame.saturating_add(1);
    }

    /// Take every buffered event, oldest first.
    pub fn drain(&mut self) -> Vec<MovementEvent> {
        self.recent.drain(..).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.recent.iter().filter(|e| e.name == name).count()
    }

    pub fn count_for(&self, name: &str, source: EntityHandle) -> usize {
        let bits = source.to_bits();
        self.recent
            .iter()
            .filter(|e| e.name == name && e.source_entity == Some(bits))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_bus_tracks_dropped_events() {
        let mut bus = MovementEventBus::default();
        for i in 0..(MAX_EVENTS + 25) {
            bus.emit(FOOTSTEP, serde_json::json!({ "i": i }), None);
        }
        assert_eq!(bus.recent.len(), MAX_EVENTS);
        assert!(bus.dropped_events >= 25);
        assert_eq!(bus.recent.front().map(|e| e.data["i"].clone()), Some(serde_json::json!(25)));
    }

    #[test]
    fn events_carry_frame_and_source() {
        let mut bus = MovementEventBus::default();
        let source = EntityHandle::from_raw_parts(3, 1);
        bus.tick();
        bus.emit(MOVE_START, serde_json::json!({ "move": "walk_right" }), Some(source));
        assert_eq!(bus.count_for(MOVE_START, source), 1);
        let events = bus.drain();
        assert_eq!(events[0].frame, 1);
        assert_eq!(events[0].source_entity, Some(source.to_bits()));
        assert!(bus.recent.is_empty());
    }
}
