use bevy::prelude::*;

use crate::simulation::MovementWorld;

/// Runs both movement phases every fixed step.
pub struct MovementPlugin;

impl Plugin for MovementPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<Time<Fixed>>()
            .init_resource::<MovementWorld>()
            .add_systems(
                FixedUpdate,
                (update_movement_changes, update_movement).chain(),
            );
    }
}

pub fn update_movement_changes(mut world: ResMut<MovementWorld>) {
    world.begin_frame();
    world.update_changes();
}

pub fn update_movement(time: Res<Time<Fixed>>, mut world: ResMut<MovementWorld>) {
    world.update(time.delta_secs());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::components::ActorDesc;
    use crate::config::MovementConfig;
    use crate::direction::Direction;
    use crate::tilemap::Tilemap;

    #[test]
    fn fixed_update_drives_the_world() {
        let mut app = App::new();
        app.add_plugins(MovementPlugin);

        let mut world = MovementWorld::new(
            Tilemap::from_rows(&["........", "........", "########"]),
            MovementConfig::default(),
        );
        let walker = world.spawn(ActorDesc::new(Vec2::new(8.0, 24.0), Vec2::splat(16.0), "walker"));
        world.request_movement(walker, Direction::Right, 1.0, true);
        app.insert_resource(world);

        for _ in 0..30 {
            app.world_mut()
                .resource_mut::<Time<Fixed>>()
                .advance_by(Duration::from_secs_f64(1.0 / 60.0));
            app.world_mut().run_schedule(FixedUpdate);
        }

        let world = app.world().resource::<MovementWorld>();
        assert_eq!(world.frame, 30);
        let x = world.body(walker).unwrap().position.x;
        assert!(x > 24.0, "walker should have covered more than a tile, at {x}");
    }
}
