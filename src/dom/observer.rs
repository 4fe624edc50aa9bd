//! Mutation records and subscriptions

use std::collections::HashMap;
use std::sync::Weak;
use tokio::sync::mpsc;

use super::{Document, NodeId, Tree};

/// Identifier of an active subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Which changes a subscription is interested in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub character_data: bool,
    pub attributes: bool,
    pub subtree: bool,
}

impl ObserveOptions {
    /// Structural and text changes anywhere below the target
    pub const fn content_changes() -> Self {
        Self {
            child_list: true,
            character_data: true,
            attributes: false,
            subtree: true,
        }
    }
}

/// A single change to the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    CharacterData {
        target: NodeId,
    },
    Attributes {
        target: NodeId,
        name: String,
    },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            MutationRecord::ChildList { target, .. }
            | MutationRecord::CharacterData { target }
            | MutationRecord::Attributes { target, .. } => *target,
        }
    }

    pub fn added_nodes(&self) -> &[NodeId] {
        match self {
            MutationRecord::ChildList { added, .. } => added,
            _ => &[],
        }
    }

    fn wanted_by(&self, options: &ObserveOptions) -> bool {
        match self {
            MutationRecord::ChildList { .. } => options.child_list,
            MutationRecord::CharacterData { .. } => options.character_data,
            MutationRecord::Attributes { .. } => options.attributes,
        }
    }
}

struct Observer {
    target: NodeId,
    options: ObserveOptions,
    sender: mpsc::UnboundedSender<MutationRecord>,
}

/// Active subscriptions of one document
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    observers: HashMap<ObserverId, Observer>,
}

impl ObserverRegistry {
    pub(crate) fn register(
        &mut self,
        target: NodeId,
        options: ObserveOptions,
    ) -> (ObserverId, mpsc::UnboundedReceiver<MutationRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.insert(
            id,
            Observer {
                target,
                options,
                sender,
            },
        );
        (id, receiver)
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    /// Deliver a record to every interested subscription.
    /// `tree` must already reflect the change.
    pub(crate) fn dispatch(&mut self, tree: &Tree, record: &MutationRecord) {
        let mut closed = Vec::new();
        for (id, observer) in &self.observers {
            if !record.wanted_by(&observer.options) {
                continue;
            }
            let in_scope = if observer.options.subtree {
                tree.contains(observer.target, record.target())
            } else {
                observer.target == record.target()
            };
            if in_scope && observer.sender.send(record.clone()).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            self.observers.remove(&id);
        }
    }
}

/// Receiving end of [`Document::observe`]
///
/// Dropping the subscription disconnects it from the document.
pub struct MutationSubscription {
    id: ObserverId,
    receiver: mpsc::UnboundedReceiver<MutationRecord>,
    document: Weak<Document>,
}

impl MutationSubscription {
    pub(crate) fn new(
        id: ObserverId,
        receiver: mpsc::UnboundedReceiver<MutationRecord>,
        document: Weak<Document>,
    ) -> Self {
        Self {
            id,
            receiver,
            document,
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next change, then return it together with everything
    /// else already queued. `None` once the subscription was disconnected.
    pub async fn next_batch(&mut self) -> Option<Vec<MutationRecord>> {
        let first = self.receiver.recv().await?;
        let mut batch = vec![first];
        batch.extend(self.take_records());
        Some(batch)
    }

    /// Drain queued records without waiting
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.receiver.try_recv() {
            records.push(record);
        }
        records
    }
}

impl Drop for MutationSubscription {
    fn drop(&mut self) {
        if let Some(document) = self.document.upgrade() {
            document.disconnect(self.id);
        }
    }
}
