//! Shared live document with mutation notification

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use super::observer::{MutationRecord, MutationSubscription, ObserveOptions, ObserverId, ObserverRegistry};
use super::{DomError, NodeData, NodeId, Tree};

/// A live document that can be read, mutated and observed concurrently
///
/// Locks are held only for the duration of a single operation and never
/// across an `.await`.
pub struct Document {
    tree: RwLock<Tree>,
    observers: Mutex<ObserverRegistry>,
    location: RwLock<String>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("location", &self.location())
            .field("nodes", &self.read(|tree| tree.len()))
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl Document {
    /// Create an empty document (only the document node)
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            tree: RwLock::new(Tree::new()),
            observers: Mutex::new(ObserverRegistry::default()),
            location: RwLock::new(url.into()),
        })
    }

    /// Create a document with an `html > head + body` skeleton
    pub fn with_body(url: impl Into<String>) -> Arc<Self> {
        let document = Self::new(url);
        {
            let mut tree = document.write_tree();
            let html = tree.push(element_data("html"));
            let head = tree.push(element_data("head"));
            let body = tree.push(element_data("body"));
            // Fresh nodes under a fresh root; nothing can fail here and nobody observes yet.
            let _ = tree.insert(NodeId::ROOT, html, None);
            let _ = tree.insert(html, head, None);
            let _ = tree.insert(html, body, None);
        }
        document
    }

    fn read_tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> MutexGuard<'_, ObserverRegistry> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only query against a consistent view of the tree
    pub fn read<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.read_tree())
    }

    pub fn body(&self) -> Option<NodeId> {
        self.read(|tree| tree.find_element("body"))
    }

    pub fn location(&self) -> String {
        self.location
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the current URL without touching content
    pub fn set_location(&self, url: impl Into<String>) {
        *self.location.write().unwrap_or_else(PoisonError::into_inner) = url.into();
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.write_tree().push(element_data(&tag.to_ascii_lowercase()))
    }

    pub fn create_text(&self, text: impl Into<String>) -> NodeId {
        self.write_tree().push(NodeData::Text(text.into()))
    }

    pub fn create_comment(&self, text: impl Into<String>) -> NodeId {
        self.write_tree().push(NodeData::Comment(text.into()))
    }

    /// Append `child` as the last child of `parent`
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference`, or at the end when `reference` is `None`
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        let mut tree = self.write_tree();
        let previous = tree.insert(parent, child, reference)?;
        let mut records = Vec::with_capacity(2);
        if let Some(previous) = previous {
            records.push(MutationRecord::ChildList {
                target: previous,
                added: Vec::new(),
                removed: vec![child],
            });
        }
        records.push(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        self.notify(&tree, records);
        Ok(())
    }

    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let mut tree = self.write_tree();
        tree.remove(parent, child)?;
        self.notify(
            &tree,
            vec![MutationRecord::ChildList {
                target: parent,
                added: Vec::new(),
                removed: vec![child],
            }],
        );
        Ok(())
    }

    /// Swap all children of `parent` for `children`, reported as one change
    pub fn replace_children(&self, parent: NodeId, children: &[NodeId]) -> Result<(), DomError> {
        let mut tree = self.write_tree();
        if !tree.contains_id(parent) {
            return Err(DomError::NotFound(parent));
        }
        // Nothing changes unless every new child can be linked
        for child in children {
            tree.check_insert(parent, *child, None)?;
        }
        let removed = tree.children(parent).to_vec();
        for child in &removed {
            tree.remove(parent, *child)?;
        }
        for child in children {
            tree.insert(parent, *child, None)?;
        }
        self.notify(
            &tree,
            vec![MutationRecord::ChildList {
                target: parent,
                added: children.to_vec(),
                removed,
            }],
        );
        Ok(())
    }

    /// Replace the content of a text (or comment) node
    pub fn set_text(&self, id: NodeId, text: impl Into<String>) -> Result<(), DomError> {
        let mut tree = self.write_tree();
        tree.set_text(id, text.into())?;
        self.notify(&tree, vec![MutationRecord::CharacterData { target: id }]);
        Ok(())
    }

    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let mut tree = self.write_tree();
        tree.set_attribute(id, name, value)?;
        self.notify(
            &tree,
            vec![MutationRecord::Attributes {
                target: id,
                name: name.to_string(),
            }],
        );
        Ok(())
    }

    pub fn remove_attribute(&self, id: NodeId, name: &str) -> Result<(), DomError> {
        let mut tree = self.write_tree();
        if tree.remove_attribute(id, name)? {
            self.notify(
                &tree,
                vec![MutationRecord::Attributes {
                    target: id,
                    name: name.to_string(),
                }],
            );
        }
        Ok(())
    }

    /// Subscribe to changes at or below `target`
    pub fn observe(self: &Arc<Self>, target: NodeId, options: ObserveOptions) -> MutationSubscription {
        let (id, receiver) = self.registry().register(target, options);
        trace!("Observer {:?} attached to {}", id, target);
        MutationSubscription::new(id, receiver, Arc::downgrade(self))
    }

    /// Stop delivering records to a subscription. Returns whether it was active.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        let removed = self.registry().remove(id);
        if removed {
            trace!("Observer {:?} detached", id);
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.registry().len()
    }

    fn notify(&self, tree: &Tree, records: Vec<MutationRecord>) {
        let mut registry = self.registry();
        for record in &records {
            registry.dispatch(tree, record);
        }
    }
}

fn element_data(name: &str) -> NodeData {
    NodeData::Element {
        name: name.to_string(),
        attrs: Vec::new(),
    }
}
