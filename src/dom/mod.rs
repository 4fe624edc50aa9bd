//! In-memory live document model
//!
//! Nodes live in an arena addressed by [`NodeId`]. Every structural, text and
//! attribute change goes through [`Document`], which reports it to active
//! mutation subscriptions.

pub mod document;
pub mod observer;
pub mod tree;

use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use document::Document;
pub use observer::{MutationRecord, MutationSubscription, ObserveOptions, ObserverId};
pub use tree::Tree;

/// Node identifier, an index into the document arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The document node is always the first arena slot
    pub const ROOT: NodeId = NodeId(0);

    /// Get the raw index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// Payload of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element {
        name: String,
        attrs: Vec<Attribute>,
    },
    Text(String),
    Comment(String),
}

/// Structural errors raised by document operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0} does not exist")]
    NotFound(NodeId),

    #[error("node {0} cannot have children")]
    NotAContainer(NodeId),

    #[error("node {0} is not a text node")]
    NotText(NodeId),

    #[error("node {0} is not an element")]
    NotElement(NodeId),

    #[error("inserting {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("the document node cannot be moved")]
    DocumentNode,
}
