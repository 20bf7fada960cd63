pub mod chunks;
pub mod controller;
pub mod driver;

pub use chunks::{ChunkPlan, ChunkWindow};
pub use controller::{percent_complete, CheckpointController, PausePoint};
pub use driver::ScanDriver;
