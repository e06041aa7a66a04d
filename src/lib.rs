//! Grid-aligned actor movement and tile collision.
//!
//! Actors move either by discrete step moves selected from a move set
//! against a survey of their surroundings, or by continuous physics
//! motion. Actors standing on other actors are carried by them through a
//! collision hierarchy. [`MovementWorld`] drives the whole population in two
//! phases per fixed step; [`MovementPlugin`] schedules it in Bevy.

pub mod codec;
pub mod collision;
pub mod components;
pub mod config;
pub mod controller;
pub mod direction;
pub mod entity;
pub mod events;
pub mod geometry;
pub mod hierarchy;
pub mod moves;
pub mod pathfinding;
pub mod physics_core;
pub mod plugin;
pub mod simulation;
pub mod spatial_hash;
pub mod survey;
pub mod tilemap;

pub use components::{Actor, ActorBody, ActorDesc};
pub use config::{load_movement_config, MovementConfig};
pub use controller::{Motion, MovementController, PhysicsMode};
pub use direction::{Direction, DirectionSet};
pub use entity::EntityHandle;
pub use events::{MovementEvent, MovementEventBus};
pub use moves::{MoveLibrary, MoveSet};
pub use plugin::MovementPlugin;
pub use simulation::MovementWorld;
pub use survey::{Survey, SurveyFlags, SurveyResult};
pub use tilemap::Tilemap;
