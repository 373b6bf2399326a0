//! Background tasks for the key distribution cache.

pub mod refresh;

pub use refresh::{run_refresh_loop, spawn_refresh_task};
