//! Injection Task Registry
//!
//! An [`InjectionTask`] is a named, idempotent unit of DOM work bound to a set
//! of page types. Tasks never write to the DOM themselves: `apply` returns a
//! [`DomPatch`] that the orchestrator commits only after confirming the
//! result is still current and the fragment is still missing.

use crate::dom::{self, Fragment, HostDom, InsertPosition, NodeId};
use crate::error::{DomError, TaskError};
use crate::metadata::MetadataClient;
use crate::retry::RetryPolicy;
use futures::future::BoxFuture;
use stagehand_common::params::{EngineParams, TaskOverride};
use stagehand_common::staging::StagingStore;
use stagehand_common::{Error, PageType, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Page types a task runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageScope {
    /// Cross-cutting: scheduled on every page type
    Always,
    Pages(&'static [PageType]),
}

impl PageScope {
    pub fn applies_to(&self, page_type: PageType) -> bool {
        match self {
            PageScope::Always => true,
            PageScope::Pages(pages) => pages.contains(&page_type),
        }
    }
}

/// Which observer window reschedules the task on DOM changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    /// Latency-sensitive fragments
    Fast,
    /// Expensive full-page scans
    Slow,
}

/// Shared collaborators available to every task
pub struct Services {
    pub metadata: Arc<MetadataClient>,
    pub staging: StagingStore,
    pub params: EngineParams,
}

/// Everything one attempt of one task may look at
#[derive(Clone)]
pub struct TaskContext {
    pub dom: Arc<dyn HostDom>,
    pub services: Arc<Services>,
    pub page_type: PageType,
    /// Location the cycle was classified from (path, query, fragment)
    pub location: String,
    pub cycle_id: u64,
    /// 1-based attempt number within the cycle
    pub attempt: u32,
}

impl TaskContext {
    pub fn query(&self, selector: &str) -> Option<NodeId> {
        dom::query_or_none(self.dom.as_ref(), selector)
    }

    pub fn query_all(&self, selector: &str) -> Vec<NodeId> {
        dom::query_all_or_empty(self.dom.as_ref(), selector)
    }

    pub fn query_within(&self, root: NodeId, selector: &str) -> Vec<NodeId> {
        dom::query_within_or_empty(self.dom.as_ref(), root, selector)
    }

    pub fn exists(&self, selector: &str) -> bool {
        self.query(selector).is_some()
    }

    /// First match, or `MissingTarget` naming the selector
    pub fn require(&self, selector: &str) -> std::result::Result<NodeId, TaskError> {
        self.query(selector)
            .ok_or_else(|| TaskError::MissingTarget(selector.to_string()))
    }
}

/// One DOM write
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Insert {
        reference: NodeId,
        position: InsertPosition,
        fragment: Fragment,
    },
    Remove {
        node: NodeId,
    },
    SetAttr {
        node: NodeId,
        name: String,
        value: String,
    },
}

/// Ordered DOM writes produced by a task attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomPatch {
    ops: Vec<PatchOp>,
}

impl DomPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: NodeId, position: InsertPosition, fragment: Fragment) {
        self.ops.push(PatchOp::Insert {
            reference,
            position,
            fragment,
        });
    }

    pub fn append(&mut self, parent: NodeId, fragment: Fragment) {
        self.insert(parent, InsertPosition::Append, fragment);
    }

    pub fn remove(&mut self, node: NodeId) {
        self.ops.push(PatchOp::Remove { node });
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        self.ops.push(PatchOp::SetAttr {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Apply every op; inserted fragment roots get `marker="<task>"`
    ///
    /// All referenced nodes are checked first, so a patch aimed at nodes the
    /// host has since removed fails without writing anything.
    pub fn commit(self, dom: &dyn HostDom, marker: &str, task: &str) -> std::result::Result<usize, DomError> {
        for op in &self.ops {
            let node = match op {
                PatchOp::Insert { reference, .. } => *reference,
                PatchOp::Remove { node } | PatchOp::SetAttr { node, .. } => *node,
            };
            if dom.tag(node).is_none() {
                return Err(DomError::Detached(node));
            }
        }

        let count = self.ops.len();
        for op in self.ops {
            match op {
                PatchOp::Insert {
                    reference,
                    position,
                    fragment,
                } => {
                    let stamped = fragment.attr(marker, task);
                    dom.insert(reference, position, &stamped)?;
                }
                PatchOp::Remove { node } => dom.remove(node)?,
                PatchOp::SetAttr { node, name, value } => dom.set_attr(node, &name, &value)?,
            }
        }
        Ok(count)
    }
}

/// A named, idempotent unit of DOM work
///
/// `apply` may run any number of times. The orchestrator checks
/// `is_already_satisfied` before every attempt and again before committing,
/// and never calls `apply` while `prerequisites_ready` is false.
pub trait InjectionTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn scope(&self) -> PageScope;

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    /// Retry policy before any configured override
    fn retry_policy(&self, defaults: &RetryPolicy) -> RetryPolicy {
        *defaults
    }

    /// Does the target fragment already exist?
    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool;

    /// Are the subsystems this task depends on initialized?
    fn prerequisites_ready(&self, _ctx: &TaskContext) -> bool {
        true
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, std::result::Result<DomPatch, TaskError>>;
}

/// Tasks registered at startup, in registration order
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<dyn InjectionTask>>,
    overrides: HashMap<String, TaskOverride>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; names must be unique
    pub fn register<T: InjectionTask + 'static>(&mut self, task: T) -> Result<()> {
        self.register_arc(Arc::new(task))
    }

    pub fn register_arc(&mut self, task: Arc<dyn InjectionTask>) -> Result<()> {
        if self.get(task.name()).is_some() {
            return Err(Error::InvalidInput(format!(
                "Task '{}' is already registered",
                task.name()
            )));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Per-task retry overrides keyed by task name
    pub fn with_overrides(mut self, overrides: HashMap<String, TaskOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InjectionTask>> {
        self.tasks.iter().find(|t| t.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks for `page_type` (always-run tasks included), optionally
    /// restricted to one cadence
    pub fn select(&self, page_type: PageType, cadence: Option<Cadence>) -> Vec<Arc<dyn InjectionTask>> {
        self.tasks
            .iter()
            .filter(|t| t.scope().applies_to(page_type))
            .filter(|t| cadence.map_or(true, |c| t.cadence() == c))
            .cloned()
            .collect()
    }

    /// Effective retry policy: task default, then configured override
    pub fn policy_for(&self, task: &dyn InjectionTask, defaults: &RetryPolicy) -> RetryPolicy {
        let policy = task.retry_policy(defaults);
        match self.overrides.get(task.name()) {
            Some(task_override) => policy.with_override(task_override),
            None => policy,
        }
    }
}
