//! Page classification
//!
//! Maps the host application's current path to a coarse page type. The path is
//! the single source of truth: classification never reads the DOM and is cheap
//! enough to recompute on every navigation.
//!
//! Rules are tested in order and the first match wins, so more specific routes
//! (`/backstage/tracks/42/edit`) must appear before the broader prefix that
//! would also match them (`/backstage`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a host route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Upload,
    Edit,
    Track,
    Confirmation,
    Artist,
    Playlist,
    Album,
    Genre,
    Discover,
    Backstage,
    Other,
}

impl PageType {
    /// All page types, in declaration order
    pub const ALL: [PageType; 11] = [
        PageType::Upload,
        PageType::Edit,
        PageType::Track,
        PageType::Confirmation,
        PageType::Artist,
        PageType::Playlist,
        PageType::Album,
        PageType::Genre,
        PageType::Discover,
        PageType::Backstage,
        PageType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Upload => "upload",
            PageType::Edit => "edit",
            PageType::Track => "track",
            PageType::Confirmation => "confirmation",
            PageType::Artist => "artist",
            PageType::Playlist => "playlist",
            PageType::Album => "album",
            PageType::Genre => "genre",
            PageType::Discover => "discover",
            PageType::Backstage => "backstage",
            PageType::Other => "other",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule tests the normalized path
#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// Path starts with the segment(s); matches the bare prefix or prefix + "/"
    Prefix(&'static str),
    /// Path contains the substring anywhere
    Contains(&'static str),
    /// Path ends with the final segment(s)
    Suffix(&'static str),
}

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        match *self {
            Matcher::Prefix(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Matcher::Contains(needle) => path.contains(needle),
            Matcher::Suffix(suffix) => path.ends_with(suffix),
        }
    }
}

/// Ordered classification rules; first match wins
const RULES: &[(Matcher, PageType)] = &[
    (Matcher::Contains("/upload/success"), PageType::Confirmation),
    (Matcher::Suffix("/confirmation"), PageType::Confirmation),
    (Matcher::Contains("/confirmation/"), PageType::Confirmation),
    (Matcher::Suffix("/edit"), PageType::Edit),
    (Matcher::Contains("/edit/"), PageType::Edit),
    (Matcher::Prefix("/upload"), PageType::Upload),
    (Matcher::Suffix("/tracks/new"), PageType::Upload),
    (Matcher::Prefix("/backstage"), PageType::Backstage),
    (Matcher::Prefix("/track"), PageType::Track),
    (Matcher::Prefix("/beat"), PageType::Track),
    (Matcher::Prefix("/artist"), PageType::Artist),
    (Matcher::Prefix("/producer"), PageType::Artist),
    (Matcher::Prefix("/playlist"), PageType::Playlist),
    (Matcher::Prefix("/album"), PageType::Album),
    (Matcher::Prefix("/genre"), PageType::Genre),
    (Matcher::Prefix("/discover"), PageType::Discover),
    (Matcher::Prefix("/explore"), PageType::Discover),
];

/// Strip query string, fragment and trailing slashes; lowercase
///
/// The root path normalizes to "/".
pub fn normalize_path(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with('/') {
        lowered
    } else {
        format!("/{}", lowered)
    }
}

/// Classify a host path into a page type
pub fn classify(path: &str) -> PageType {
    let normalized = normalize_path(path);
    RULES
        .iter()
        .find(|(matcher, _)| matcher.matches(&normalized))
        .map(|(_, page_type)| *page_type)
        .unwrap_or(PageType::Other)
}
