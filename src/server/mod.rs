//! HTTP service hosting live page sessions

pub mod api;
pub mod session;
