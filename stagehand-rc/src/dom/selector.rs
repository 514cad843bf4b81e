//! CSS selector subset
//!
//! Supported: type (`div`, `*`), `#id`, `.class`, `[attr]`, `[attr="value"]`,
//! compound selectors (`tr.row[data-track-id]`), the descendant combinator
//! (whitespace) and selector lists (`a, b`). Anything else is rejected with
//! [`DomError::InvalidSelector`].

use super::NodeId;
use crate::error::DomError;

/// Tree access needed to evaluate a selector
pub(crate) trait SelectorTree {
    fn tag_of(&self, node: NodeId) -> Option<&str>;
    fn attr_of(&self, node: NodeId, name: &str) -> Option<&str>;
    fn parent_of(&self, node: NodeId) -> Option<NodeId>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrTest {
    name: String,
    value: Option<String>,
}

/// One compound selector: every part must match the same element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

impl Compound {
    fn matches<T: SelectorTree + ?Sized>(&self, tree: &T, node: NodeId) -> bool {
        let Some(tag) = tree.tag_of(node) else {
            return false;
        };
        if let Some(want) = &self.tag {
            if !want.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(want) = &self.id {
            if tree.attr_of(node, "id") != Some(want.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let classes = tree.attr_of(node, "class").unwrap_or("");
            if !self
                .classes
                .iter()
                .all(|c| classes.split_whitespace().any(|have| have == c))
            {
                return false;
            }
        }
        self.attrs.iter().all(|test| match (&test.value, tree.attr_of(node, &test.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(want), Some(have)) => want == have,
        })
    }
}

/// Compound selectors joined by descendant combinators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    compounds: Vec<Compound>,
}

impl Selector {
    pub(crate) fn matches<T: SelectorTree + ?Sized>(&self, tree: &T, node: NodeId) -> bool {
        let Some((last, ancestors)) = self.compounds.split_last() else {
            return false;
        };
        if !last.matches(tree, node) {
            return false;
        }

        // Right to left; greedy matching is exact for descendant-only chains
        let mut current = tree.parent_of(node);
        for compound in ancestors.iter().rev() {
            loop {
                let Some(candidate) = current else {
                    return false;
                };
                current = tree.parent_of(candidate);
                if compound.matches(tree, candidate) {
                    break;
                }
            }
        }
        true
    }
}

/// Comma-separated selectors; matches if any member matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<Selector>,
}

impl SelectorList {
    pub fn parse(input: &str) -> Result<Self, DomError> {
        let invalid = || DomError::InvalidSelector(input.to_string());

        let selectors = split_outside_brackets(input, |c| c == ',')
            .into_iter()
            .map(|group| {
                let compounds = split_outside_brackets(group, char::is_whitespace)
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    .map(parse_compound)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(invalid)?;
                if compounds.is_empty() {
                    return Err(invalid());
                }
                Ok(Selector { compounds })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { selectors })
    }

    pub(crate) fn matches<T: SelectorTree + ?Sized>(&self, tree: &T, node: NodeId) -> bool {
        self.selectors.iter().any(|s| s.matches(tree, node))
    }
}

/// Split on `is_sep` except inside `[...]` or quotes
fn split_outside_brackets(input: &str, is_sep: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, c) if depth == 0 && is_sep(c) => {
                parts.push(input[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_ident(chars: &[char], pos: &mut usize) -> Option<String> {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    (*pos > start).then(|| chars[start..*pos].iter().collect())
}

fn parse_compound(input: &str) -> Option<Compound> {
    let chars: Vec<char> = input.chars().collect();
    let mut compound = Compound::default();
    let mut pos = 0;

    if chars.first() == Some(&'*') {
        pos = 1;
    } else if chars.first().is_some_and(|c| c.is_ascii_alphabetic()) {
        compound.tag = Some(take_ident(&chars, &mut pos)?.to_ascii_lowercase());
    }

    while pos < chars.len() {
        match chars[pos] {
            '#' => {
                pos += 1;
                compound.id = Some(take_ident(&chars, &mut pos)?);
            }
            '.' => {
                pos += 1;
                compound.classes.push(take_ident(&chars, &mut pos)?);
            }
            '[' => {
                pos += 1;
                compound.attrs.push(parse_attr(&chars, &mut pos)?);
            }
            _ => return None,
        }
    }

    Some(compound)
}

/// Parse `name]` or `name=value]` with `pos` just past the opening bracket
fn parse_attr(chars: &[char], pos: &mut usize) -> Option<AttrTest> {
    let name = take_ident(chars, pos)?;
    match chars.get(*pos)? {
        ']' => {
            *pos += 1;
            Some(AttrTest { name, value: None })
        }
        '=' => {
            *pos += 1;
            let value = match chars.get(*pos)? {
                q @ ('"' | '\'') => {
                    let q = *q;
                    *pos += 1;
                    let start = *pos;
                    while *pos < chars.len() && chars[*pos] != q {
                        *pos += 1;
                    }
                    let value: String = chars.get(start..*pos)?.iter().collect();
                    *pos += 1;
                    value
                }
                _ => take_ident(chars, pos)?,
            };
            if chars.get(*pos) != Some(&']') {
                return None;
            }
            *pos += 1;
            Some(AttrTest {
                name,
                value: Some(value),
            })
        }
        _ => None,
    }
}
