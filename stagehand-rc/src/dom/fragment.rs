//! Declarative markup fragments

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tree of elements to insert into the host document
///
/// Deserializable so replay scenarios can describe host markup inline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fragment {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<Fragment>,
}

impl Fragment {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Add one class to the `class` attribute
    pub fn class(mut self, class: &str) -> Self {
        let classes = self.attrs.entry("class".to_string()).or_default();
        if !classes.split_whitespace().any(|c| c == class) {
            if !classes.is_empty() {
                classes.push(' ');
            }
            classes.push_str(class);
        }
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn child(mut self, child: Fragment) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Fragment>) -> Self {
        self.children.extend(children);
        self
    }

    /// Number of elements in the fragment, root included
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Fragment::node_count).sum::<usize>()
    }
}
