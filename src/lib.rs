//! Live Translator - incremental in-place translation of live documents
//!
//! A [`Scheduler`] walks a document once, translating every text fragment
//! written in the source script, then watches the document for inserted
//! content and resets itself when the host reports an in-place navigation.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod dom;
pub mod engine;
pub mod processors;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use core::{
    client::{TranslationClient, TranslationEndpoint},
    config::TranslatorConfig,
    errors::TranslationError,
    models::{ControlMessage, NavigationEvent, NavigationSource, WalkStats},
};

pub use dom::{Document, NodeId};
pub use engine::scheduler::{Scheduler, StartOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
