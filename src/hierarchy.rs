//! Cross-actor half of the collision (carry) hierarchy.
//!
//! Each controller stores its parent, children, cached ancestor and sort
//! weight; the functions here keep those consistent across the arena when a
//! scheduled parent is promoted or an actor goes away.

use bevy::prelude::*;
use serde_json::json;

use crate::components::Actor;
use crate::entity::{Arena, EntityHandle};
use crate::events::{self, MovementEventBus};

/// Promote `handle`'s scheduled parent to its current parent. Returns whether
/// the hierarchy changed. A destroyed parent counts as no parent.
pub fn make_scheduled_collision_parent_current(
    actors: &mut Arena<Actor>,
    handle: EntityHandle,
    events: &mut MovementEventBus,
) -> bool {
    let Some(actor) = actors.get_mut(handle) else {
        return false;
    };
    let Some(scheduled) = actor.controller.scheduled_parent.take() else {
        return false;
    };
    let old_parent = actor.controller.collision_parent;
    let new_parent = scheduled.filter(|p| actors.contains(*p));
    if new_parent == old_parent {
        return false;
    }

    if let Some(parent) = new_parent {
        let cyclic = parent == handle || is_descendant(actors, parent, handle);
        debug_assert!(
            !cyclic,
            "collision parent {parent:?} would make a cycle through {handle:?}"
        );
        if cyclic {
            warn!(
                "[Axiom movement] Rejected collision parent {} for entity {}: cycle",
                parent.to_bits(),
                handle.to_bits()
            );
            return false;
        }
    }

    if let Some(old) = old_parent.and_then(|p| actors.get_mut(p)) {
        old.controller.collision_children.remove(&handle);
    }
    if let Some(new) = new_parent.and_then(|p| actors.get_mut(p)) {
        new.controller.collision_children.insert(handle);
    }
    if let Some(actor) = actors.get_mut(handle) {
        actor.controller.collision_parent = new_parent;
    }
    override_collision_ancestor(actors, handle);
    make_collision_children_reevaluate_parent(actors, handle, new_parent);

    debug!(
        "[Axiom movement] Entity {} collision parent {:?} -> {:?}",
        handle.to_bits(),
        old_parent.map(EntityHandle::to_bits),
        new_parent.map(EntityHandle::to_bits)
    );
    events.emit(
        events::COLLISION_PARENT_CHANGED,
        json!({
            "old": old_parent.map(EntityHandle::to_bits),
            "new": new_parent.map(EntityHandle::to_bits),
        }),
        Some(handle),
    );
    true
}

/// Whether `candidate` sits somewhere below `root` in the hierarchy.
pub fn is_descendant(actors: &Arena<Actor>, candidate: EntityHandle, root: EntityHandle) -> bool {
    let mut current = candidate;
    for _ in 0..=actors.len() {
        match actors.get(current).and_then(|a| a.controller.collision_parent) {
            Some(parent) if parent == root => return true,
            Some(parent) => current = parent,
            None => return false,
        }
    }
    false
}

/// Rewrite the cached ancestor and sort weight of `handle` and everything
/// below it from `handle`'s current parent.
pub fn override_collision_ancestor(actors: &mut Arena<Actor>, handle: EntityHandle) {
    let parent = actors
        .get(handle)
        .and_then(|a| a.controller.collision_parent)
        .and_then(|p| actors.get(p));
    let (ancestor, weight) = match parent {
        Some(p) => (p.controller.collision_ancestor, p.controller.sort_weight + 1),
        None => (handle, 0),
    };

    let mut stack = vec![(handle, weight)];
    while let Some((current, weight)) = stack.pop() {
        let Some(actor) = actors.get_mut(current) else {
            continue;
        };
        actor.controller.collision_ancestor = ancestor;
        actor.controller.sort_weight = weight;
        stack.extend(
            actor
                .controller
                .collision_children
                .iter()
                .map(|&child| (child, weight + 1)),
        );
    }
}

/// Depth of `handle` in its parent chain. Parents always weigh less than
/// their children.
pub fn calculate_sort_weight(actors: &Arena<Actor>, handle: EntityHandle) -> i32 {
    let mut weight = 0;
    let mut current = handle;
    while let Some(parent) = actors.get(current).and_then(|a| a.controller.collision_parent) {
        weight += 1;
        if weight as usize > actors.len() {
            break;
        }
        current = parent;
    }
    weight
}

/// Flag every child of `handle` except `caller` to re-check what it stands
/// on at its next update.
pub fn make_collision_children_reevaluate_parent(
    actors: &mut Arena<Actor>,
    handle: EntityHandle,
    caller: Option<EntityHandle>,
) {
    let Some(actor) = actors.get(handle) else {
        return;
    };
    let children: Vec<EntityHandle> = actor
        .controller
        .collision_children
        .iter()
        .copied()
        .filter(|&c| Some(c) != caller)
        .collect();
    for child in children {
        if let Some(child) = actors.get_mut(child) {
            child.controller.reevaluate = true;
        }
    }
}

/// Unlink `handle` before it is removed: leave its parent and orphan its
/// children, each of which becomes its own root.
pub fn detach_for_destroy(actors: &mut Arena<Actor>, handle: EntityHandle) {
    let Some(actor) = actors.get_mut(handle) else {
        return;
    };
    let parent = actor.controller.collision_parent.take();
    let children = std::mem::take(&mut actor.controller.collision_children);
    actor.controller.scheduled_parent = None;

    if let Some(parent) = parent.and_then(|p| actors.get_mut(p)) {
        parent.controller.collision_children.remove(&handle);
    }
    for child in children {
        let Some(orphan) = actors.get_mut(child) else {
            continue;
        };
        orphan.controller.collision_parent = None;
        orphan.controller.reevaluate = true;
        override_collision_ancestor(actors, child);
    }
}
