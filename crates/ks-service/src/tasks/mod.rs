pub mod rotation_scheduler;

pub use rotation_scheduler::{run_rotation_scheduler, spawn_rotation_scheduler};
