mod manager;

pub use manager::CheckpointManager;
