//! In-memory host document
//!
//! An arena of element nodes behind one mutex. Child-list changes are
//! broadcast as [`MutationRecord`]s after the lock is released, in commit
//! order. Removed nodes stay in the arena marked detached so stale ids fail
//! cleanly instead of aliasing new nodes.

use super::selector::{SelectorList, SelectorTree};
use super::{Fragment, HostDom, InsertPosition, MutationRecord, NodeId, NodeSummary};
use crate::error::DomError;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

const MUTATION_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached: bool,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
    body: Option<NodeId>,
}

const ROOT: NodeId = NodeId(0);

impl SelectorTree for Tree {
    fn tag_of(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|n| n.tag.as_str())
    }

    fn attr_of(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes.get(node.0)?.attrs.get(name).map(String::as_str)
    }

    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }
}

impl Tree {
    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(id.0).ok_or(DomError::NodeNotFound(id))
    }

    fn attached(&self, id: NodeId) -> Result<&Node, DomError> {
        let node = self.node(id)?;
        if node.attached {
            Ok(node)
        } else {
            Err(DomError::Detached(id))
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes.get_mut(id.0).ok_or(DomError::NodeNotFound(id))
    }

    /// Attached descendants of `root` in document order, `root` excluded
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.nodes.get(root.0) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(id.0) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn is_injected(&self, id: NodeId, marker: &str) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.nodes.get(node_id.0) else {
                return false;
            };
            if node.attrs.contains_key(marker) {
                return true;
            }
            current = node.parent;
        }
        false
    }

    fn summary(&self, id: NodeId, marker: &str) -> NodeSummary {
        NodeSummary {
            id,
            tag: self.nodes.get(id.0).map(|n| n.tag.clone()).unwrap_or_default(),
            injected: self.is_injected(id, marker),
        }
    }

    /// Build the fragment's nodes detached; returns the root id
    fn build(&mut self, fragment: &Fragment, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: fragment.tag.to_ascii_lowercase(),
            attrs: fragment.attrs.clone(),
            text: fragment.text.clone(),
            parent,
            children: Vec::new(),
            attached: true,
        });
        let children: Vec<NodeId> = fragment
            .children
            .iter()
            .map(|child| self.build(child, Some(id)))
            .collect();
        self.nodes[id.0].children = children;
        id
    }

    fn set_attached(&mut self, root: NodeId, attached: bool) {
        let mut ids = self.descendants(root);
        ids.push(root);
        for id in ids {
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.attached = attached;
            }
        }
    }

    fn text_of(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        if let Some(text) = &node.text {
            out.push_str(text);
        }
        for child in &node.children {
            self.text_of(*child, out);
        }
    }

    fn outline(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        out.push_str(&"  ".repeat(depth));
        out.push('<');
        out.push_str(&node.tag);
        for (name, value) in &node.attrs {
            out.push_str(&format!(" {}=\"{}\"", name, value));
        }
        out.push('>');
        if let Some(text) = &node.text {
            out.push(' ');
            out.push_str(text);
        }
        out.push('\n');
        for child in &node.children {
            self.outline(*child, depth + 1, out);
        }
    }
}

/// In-memory document implementing [`HostDom`]
pub struct VirtualDom {
    tree: Mutex<Tree>,
    marker: String,
    mutations: broadcast::Sender<MutationRecord>,
}

impl VirtualDom {
    /// Empty document (just `<html>`, no body yet)
    ///
    /// `marker` is the attribute that identifies engine-injected nodes.
    pub fn new(marker: impl Into<String>) -> Self {
        let (mutations, _) = broadcast::channel(MUTATION_CHANNEL_CAPACITY);
        Self {
            tree: Mutex::new(Tree {
                nodes: vec![Node {
                    tag: "html".to_string(),
                    attrs: BTreeMap::new(),
                    text: None,
                    parent: None,
                    children: Vec::new(),
                    attached: true,
                }],
                body: None,
            }),
            marker: marker.into(),
            mutations,
        }
    }

    /// Document with a mounted, empty body
    pub fn with_body(marker: impl Into<String>) -> Self {
        let dom = Self::new(marker);
        dom.mount_body();
        dom
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, record: MutationRecord) {
        // No receivers is fine: nothing is observing yet
        let _ = self.mutations.send(record);
    }

    /// Create the body if it does not exist; returns its id
    pub fn mount_body(&self) -> NodeId {
        let (body, record) = {
            let mut tree = self.lock();
            if let Some(body) = tree.body {
                return body;
            }
            let body = tree.build(&Fragment::new("body"), Some(ROOT));
            tree.nodes[ROOT.0].children.push(body);
            tree.body = Some(body);
            let record = MutationRecord {
                target: ROOT,
                added: vec![tree.summary(body, &self.marker)],
                removed: vec![],
            };
            (body, record)
        };
        self.publish(record);
        body
    }

    /// Host-side render: insert `fragment` as the last child of the first
    /// node matching `parent_selector`
    pub fn render(&self, parent_selector: &str, fragment: &Fragment) -> Result<NodeId, DomError> {
        let parent = self
            .query(parent_selector)?
            .ok_or_else(|| DomError::NoMatch(parent_selector.to_string()))?;
        self.insert(parent, InsertPosition::Append, fragment)
    }

    /// Remove every node matching `selector`; returns how many were removed
    pub fn remove_all(&self, selector: &str) -> Result<usize, DomError> {
        let nodes = self.query_all(selector)?;
        let mut removed = 0;
        for node in nodes {
            // A match inside an earlier removed subtree is already detached
            match self.remove(node) {
                Ok(()) => removed += 1,
                Err(DomError::Detached(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Number of attached nodes carrying the marker attribute
    pub fn injected_count(&self) -> usize {
        let tree = self.lock();
        tree.descendants(ROOT)
            .into_iter()
            .filter(|id| tree.nodes[id.0].attrs.contains_key(&self.marker))
            .count()
    }

    /// Indented outline of the attached document
    pub fn outline(&self) -> String {
        let tree = self.lock();
        let mut out = String::new();
        tree.outline(ROOT, 0, &mut out);
        out
    }
}

impl HostDom for VirtualDom {
    fn body(&self) -> Option<NodeId> {
        self.lock().body
    }

    fn query(&self, selector: &str) -> Result<Option<NodeId>, DomError> {
        Ok(self.query_all(selector)?.into_iter().next())
    }

    fn query_all(&self, selector: &str) -> Result<Vec<NodeId>, DomError> {
        self.query_within(ROOT, selector)
    }

    fn query_within(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>, DomError> {
        let list = SelectorList::parse(selector)?;
        let tree = self.lock();
        tree.attached(root)?;
        Ok(tree
            .descendants(root)
            .into_iter()
            .filter(|id| list.matches(&*tree, *id))
            .collect())
    }

    fn tag(&self, node: NodeId) -> Option<String> {
        let tree = self.lock();
        tree.attached(node).ok().map(|n| n.tag.clone())
    }

    fn text(&self, node: NodeId) -> Option<String> {
        let tree = self.lock();
        tree.attached(node).ok()?;
        let mut out = String::new();
        tree.text_of(node, &mut out);
        Some(out)
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        let tree = self.lock();
        tree.attached(node).ok()?.attrs.get(name).cloned()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        let tree = self.lock();
        tree.attached(node).ok()?.parent
    }

    fn insert(
        &self,
        reference: NodeId,
        position: InsertPosition,
        fragment: &Fragment,
    ) -> Result<NodeId, DomError> {
        let record = {
            let mut tree = self.lock();
            tree.attached(reference)?;

            let (parent, index) = match position {
                InsertPosition::Append => (reference, tree.node(reference)?.children.len()),
                InsertPosition::Prepend => (reference, 0),
                InsertPosition::Before | InsertPosition::After => {
                    let parent = tree.node(reference)?.parent.ok_or(DomError::Detached(reference))?;
                    let offset = tree
                        .node(parent)?
                        .children
                        .iter()
                        .position(|c| *c == reference)
                        .ok_or(DomError::Detached(reference))?;
                    let index = if position == InsertPosition::Before {
                        offset
                    } else {
                        offset + 1
                    };
                    (parent, index)
                }
            };

            let id = tree.build(fragment, Some(parent));
            tree.node_mut(parent)?.children.insert(index, id);

            MutationRecord {
                target: parent,
                added: vec![tree.summary(id, &self.marker)],
                removed: vec![],
            }
        };

        let id = record.added[0].id;
        self.publish(record);
        Ok(id)
    }

    fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let record = {
            let mut tree = self.lock();
            tree.attached(node)?;
            let summary = tree.summary(node, &self.marker);
            let parent = tree.node(node)?.parent.ok_or(DomError::Detached(node))?;

            tree.node_mut(parent)?.children.retain(|c| *c != node);
            tree.node_mut(node)?.parent = None;
            tree.set_attached(node, false);
            if tree.body == Some(node) {
                tree.body = None;
            }

            MutationRecord {
                target: parent,
                added: vec![],
                removed: vec![summary],
            }
        };
        self.publish(record);
        Ok(())
    }

    fn set_attr(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let mut tree = self.lock();
        tree.attached(node)?;
        tree.node_mut(node)?
            .attrs
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MutationRecord> {
        self.mutations.subscribe()
    }
}
