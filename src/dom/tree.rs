//! Arena storage and read-only queries

use super::{Attribute, DomError, NodeData, NodeId};

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena of document nodes
///
/// Detached nodes keep their slot; they simply have no path to [`NodeId::ROOT`].
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree holding only the document node
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes.get_mut(id.index()).ok_or(DomError::NotFound(id))
    }

    pub fn contains_id(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.node(id).map(|n| &n.data)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Children in source order; empty for unknown ids
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Lower-case tag name of an element
    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            Some(NodeData::Element { name, .. }) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            Some(NodeData::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match self.data(id) {
            Some(NodeData::Element { attrs, .. }) => attrs.as_slice(),
            _ => &[],
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.attribute(id, name).is_some()
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.data(id), Some(NodeData::Element { .. }))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.data(id), Some(NodeData::Text(_)))
    }

    /// Parent chain of a node, nearest first, excluding the node itself
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// Whether `id` is reachable from the document node
    pub fn is_connected(&self, id: NodeId) -> bool {
        id == NodeId::ROOT || self.ancestors(id).any(|a| a == NodeId::ROOT)
    }

    /// Inclusive descendant check
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        ancestor == node || self.ancestors(node).any(|a| a == ancestor)
    }

    /// First element with the given tag in document order
    pub fn find_element(&self, tag: &str) -> Option<NodeId> {
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            if self.tag_name(id) == Some(tag) {
                return Some(id);
            }
            stack.extend(self.children(id).iter().rev());
        }
        None
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(text) = self.text(current) {
                out.push_str(text);
            }
            stack.extend(self.children(current).iter().rev());
        }
        out
    }

    /// Slots are never freed or reused, so a stale `NodeId` always refers
    /// to the node it was issued for, detached or not.
    pub(crate) fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Link `child` under `parent` before `reference` (or at the end).
    /// Returns the previous parent when the child was moved.
    pub(crate) fn insert(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<Option<NodeId>, DomError> {
        self.check_insert(parent, child, reference)?;

        let previous = self.detach(child);

        let siblings = &mut self.node_mut(parent)?.children;
        let position = reference
            .and_then(|r| siblings.iter().position(|c| *c == r))
            .unwrap_or(siblings.len());
        siblings.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);

        Ok(previous)
    }

    /// Validate an insertion without touching the tree
    pub(crate) fn check_insert(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        match self.data(parent) {
            None => return Err(DomError::NotFound(parent)),
            Some(NodeData::Document) | Some(NodeData::Element { .. }) => {}
            Some(_) => return Err(DomError::NotAContainer(parent)),
        }
        match self.data(child) {
            None => return Err(DomError::NotFound(child)),
            Some(NodeData::Document) => return Err(DomError::DocumentNode),
            Some(_) => {}
        }
        if self.contains(child, parent) {
            return Err(DomError::Cycle { parent, child });
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if !self.contains_id(parent) {
            return Err(DomError::NotFound(parent));
        }
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.detach(child);
        Ok(())
    }

    fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let previous = self.parent(child)?;
        if let Some(node) = self.nodes.get_mut(previous.index()) {
            node.children.retain(|c| *c != child);
        }
        if let Some(node) = self.nodes.get_mut(child.index()) {
            node.parent = None;
        }
        Some(previous)
    }

    pub(crate) fn set_text(&mut self, id: NodeId, value: String) -> Result<(), DomError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Text(text) | NodeData::Comment(text) => {
                *text = value;
                Ok(())
            }
            _ => Err(DomError::NotText(id)),
        }
    }

    pub(crate) fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DomError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Element { attrs, .. } => {
                match attrs.iter_mut().find(|a| a.name == name) {
                    Some(attr) => attr.value = value.to_string(),
                    None => attrs.push(Attribute {
                        name: name.to_string(),
                        value: value.to_string(),
                    }),
                }
                Ok(())
            }
            _ => Err(DomError::NotElement(id)),
        }
    }

    pub(crate) fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<bool, DomError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Element { attrs, .. } => {
                let before = attrs.len();
                attrs.retain(|a| a.name != name);
                Ok(attrs.len() != before)
            }
            _ => Err(DomError::NotElement(id)),
        }
    }
}

/// Iterator over a node's parent chain
pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}
