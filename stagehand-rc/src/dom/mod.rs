//! Host DOM abstraction
//!
//! The engine never touches a concrete document. Every read and write goes
//! through [`HostDom`], which a browser binding or the in-memory
//! [`VirtualDom`] implements.
//!
//! Selectors are a contract with the host's markup and are expected to break
//! when the host redesigns. Task-facing helpers ([`query_or_none`],
//! [`query_all_or_empty`]) turn every selector failure into "not found".

mod fragment;
mod selector;
mod virtual_dom;

pub use fragment::Fragment;
pub use selector::{Selector, SelectorList};
pub use virtual_dom::VirtualDom;

use crate::error::DomError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Opaque handle to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a fragment goes relative to a reference node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    /// Last child of the reference node
    Append,
    /// First child of the reference node
    Prepend,
    /// Sibling immediately before the reference node
    Before,
    /// Sibling immediately after the reference node
    After,
}

/// Added or removed node as seen by mutation observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub tag: String,
    /// The node or one of its ancestors carries the marker attribute
    pub injected: bool,
}

/// One child-list mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeSummary>,
    pub removed: Vec<NodeSummary>,
}

impl MutationRecord {
    /// True when every added and removed node was injected by the engine
    ///
    /// Records that touch no nodes at all are not self-inflicted.
    pub fn is_self_inflicted(&self) -> bool {
        let mut nodes = self.added.iter().chain(self.removed.iter()).peekable();
        nodes.peek().is_some() && nodes.all(|n| n.injected)
    }
}

/// Read/write access to the host document
///
/// Implementations must be cheap to call from any task; none of these
/// methods may block on I/O.
pub trait HostDom: Send + Sync {
    /// The document body, once it exists
    fn body(&self) -> Option<NodeId>;

    fn body_ready(&self) -> bool {
        self.body().is_some()
    }

    /// First node in document order matching `selector`
    fn query(&self, selector: &str) -> Result<Option<NodeId>, DomError>;

    /// Every node in document order matching `selector`
    fn query_all(&self, selector: &str) -> Result<Vec<NodeId>, DomError>;

    /// Descendants of `root` matching `selector`
    fn query_within(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>, DomError>;

    fn tag(&self, node: NodeId) -> Option<String>;

    /// Concatenated text of the node and its descendants
    fn text(&self, node: NodeId) -> Option<String>;

    fn attr(&self, node: NodeId, name: &str) -> Option<String>;

    fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Insert a fragment; returns the id of its root node
    fn insert(
        &self,
        reference: NodeId,
        position: InsertPosition,
        fragment: &Fragment,
    ) -> Result<NodeId, DomError>;

    /// Detach a node and its subtree
    fn remove(&self, node: NodeId) -> Result<(), DomError>;

    fn set_attr(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError>;

    /// Child-list mutation records, in commit order
    fn subscribe(&self) -> broadcast::Receiver<MutationRecord>;
}

/// `query` with selector errors degraded to "not found"
pub fn query_or_none(dom: &dyn HostDom, selector: &str) -> Option<NodeId> {
    match dom.query(selector) {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(selector, error = %e, "Selector query failed");
            None
        }
    }
}

/// `query_all` with selector errors degraded to an empty list
pub fn query_all_or_empty(dom: &dyn HostDom, selector: &str) -> Vec<NodeId> {
    match dom.query_all(selector) {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(selector, error = %e, "Selector query failed");
            Vec::new()
        }
    }
}

/// `query_within` with selector errors degraded to an empty list
pub fn query_within_or_empty(dom: &dyn HostDom, root: NodeId, selector: &str) -> Vec<NodeId> {
    match dom.query_within(root, selector) {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(selector, error = %e, "Selector query failed");
            Vec::new()
        }
    }
}
