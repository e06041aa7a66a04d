use std::time::Duration;

use axiom_movement::{
    load_movement_config, ActorDesc, Direction, EntityHandle, MovementPlugin, MovementWorld,
    Tilemap,
};
use bevy::prelude::*;

const DEFAULT_FRAMES: u32 = 240;

fn parse_frames(args: &[String]) -> Result<u32, String> {
    match args.iter().position(|a| a == "--frames") {
        Some(i) => {
            let value = args
                .get(i + 1)
                .ok_or_else(|| "--frames needs a value".to_string())?;
            value
                .parse()
                .map_err(|e| format!("invalid --frames value '{value}': {e}"))
        }
        None => Ok(DEFAULT_FRAMES),
    }
}

struct Demo {
    platform: EntityHandle,
    rider: EntityHandle,
    walker: EntityHandle,
}

/// A solid platform flying right with a rider on top, and a walker heading
/// for the west wall.
fn populate_demo(world: &mut MovementWorld) -> Demo {
    let ts = world.config.tile_size;
    let at = |x: i32, y: i32| Vec2::new(x as f32 + 0.5, y as f32 + 0.5) * ts;
    let size = Vec2::splat(ts);

    let platform = world.spawn(ActorDesc::new(at(3, 5), size, "flyer").solid());
    let rider = world.spawn(ActorDesc::new(at(3, 6), size, "walker"));
    let walker = world.spawn(ActorDesc::new(at(6, 2), size, "walker"));
    world.request_movement(platform, Direction::Right, 1.0, true);
    world.request_movement(walker, Direction::Left, 1.0, true);
    Demo {
        platform,
        rider,
        walker,
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let frames = match parse_frames(&args) {
        Ok(frames) => frames,
        Err(e) => {
            eprintln!("[Axiom movement] {e}");
            std::process::exit(2);
        }
    };

    let config = load_movement_config();
    let fixed_dt = config.fixed_dt;
    let mut world = MovementWorld::new(Tilemap::test_level(), config);
    let demo = populate_demo(&mut world);
    println!(
        "[Axiom movement] Demo level {}x{} with {} actors (platform {}, rider {}, walker {})",
        world.tilemap.width,
        world.tilemap.height,
        world.actors.len(),
        demo.platform.to_bits(),
        demo.rider.to_bits(),
        demo.walker.to_bits()
    );
    println!("[Axiom movement] Running {frames} frames at {fixed_dt}s");

    let mut app = App::new();
    app.insert_resource(Time::<Fixed>::from_seconds(f64::from(fixed_dt)))
        .insert_resource(world)
        .add_plugins(MovementPlugin);

    let step = Duration::from_secs_f64(f64::from(fixed_dt));
    let mut trace = Vec::with_capacity(frames as usize);
    for _ in 0..frames {
        app.world_mut().resource_mut::<Time<Fixed>>().advance_by(step);
        app.world_mut().run_schedule(FixedUpdate);
        trace.push(app.world().resource::<MovementWorld>().trace_frame());
    }

    match serde_json::to_string_pretty(&trace) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("[Axiom movement] Failed to encode trace: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn frames_flag_parses() {
        assert_eq!(parse_frames(&args(&["bin"])), Ok(DEFAULT_FRAMES));
        assert_eq!(parse_frames(&args(&["bin", "--frames", "12"])), Ok(12));
        assert!(parse_frames(&args(&["bin", "--frames"])).is_err());
        assert!(parse_frames(&args(&["bin", "--frames", "many"])).is_err());
    }

    #[test]
    fn demo_rider_ends_up_carried() {
        let mut world = MovementWorld::new(Tilemap::test_level(), Default::default());
        let demo = populate_demo(&mut world);
        for _ in 0..120 {
            world.step(1.0 / 60.0);
        }
        let rider = world.controller(demo.rider).unwrap();
        assert_eq!(rider.collision_parent(), Some(demo.platform));
        let platform_x = world.body(demo.platform).unwrap().position.x;
        let rider_x = world.body(demo.rider).unwrap().position.x;
        assert!((platform_x - rider_x).abs() < 1e-3);
        assert_eq!(world.body(demo.walker).unwrap().position.x, 24.0);
    }
}
