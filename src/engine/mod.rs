//! Incremental translation engine

pub mod classifier;
pub mod navigation;
pub mod scheduler;
pub mod walker;
pub mod watcher;
