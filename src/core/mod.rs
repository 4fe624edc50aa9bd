//! Translation client, configuration and shared state

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod state;
