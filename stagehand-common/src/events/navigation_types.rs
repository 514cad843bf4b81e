//! Navigation event types

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the host signalled a route change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationTrigger {
    /// `history.pushState`
    Push,
    /// `history.replaceState`
    Replace,
    /// Back/forward gesture
    Popstate,
    /// Fragment-only change
    Hashchange,
    /// Host route broadcast, engine-initiated navigation, or a path change
    /// detected without any history signal
    Synthetic,
}

impl NavigationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationTrigger::Push => "push",
            NavigationTrigger::Replace => "replace",
            NavigationTrigger::Popstate => "popstate",
            NavigationTrigger::Hashchange => "hashchange",
            NavigationTrigger::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for NavigationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical client-side route change
///
/// Only created when the new location differs from the previously recorded
/// one; immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub previous_path: String,
    pub current_path: String,
    pub trigger: NavigationTrigger,
}

impl NavigationEvent {
    pub fn new(
        previous_path: impl Into<String>,
        current_path: impl Into<String>,
        trigger: NavigationTrigger,
    ) -> Self {
        Self {
            previous_path: previous_path.into(),
            current_path: current_path.into(),
            trigger,
        }
    }
}
