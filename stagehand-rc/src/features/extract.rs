//! Data extraction helpers
//!
//! Pull track identifiers and the host track table out of the current page.
//! Other tasks list these as prerequisites.

use super::markup;
use crate::dom::{self, HostDom, NodeId};
use crate::task::TaskContext;

/// Path segments that are followed by a track identifier
const TRACK_SEGMENTS: &[&str] = &["tracks", "track", "beat"];

/// Finds the identifier of the track the current page is about
pub struct TrackIdExtractor;

impl TrackIdExtractor {
    /// `/backstage/tracks/42/edit` -> `42`; `/track/summer-heat-42` -> `42`
    ///
    /// `/tracks/new` has no identifier yet.
    pub fn from_path(location: &str) -> Option<String> {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        segments
            .windows(2)
            .filter(|pair| TRACK_SEGMENTS.contains(&pair[0].to_ascii_lowercase().as_str()))
            .find_map(|pair| identifier_from_segment(pair[1]))
    }

    /// `?id=42` or `?track_id=42`
    pub fn from_query(location: &str) -> Option<String> {
        let query = location.split('#').next()?.split_once('?')?.1;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "id" || *name == "track_id")
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// First `[data-track-id]` attribute on the page
    pub fn from_dom(dom: &dyn HostDom) -> Option<String> {
        let node = dom::query_or_none(dom, markup::TRACK_ID_HOLDER)?;
        dom.attr(node, markup::TRACK_ID_ATTR)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    }

    /// Path first, then query string, then DOM
    pub fn extract(location: &str, dom: &dyn HostDom) -> Option<String> {
        Self::from_path(location)
            .or_else(|| Self::from_query(location))
            .or_else(|| Self::from_dom(dom))
    }

    pub fn for_task(ctx: &TaskContext) -> Option<String> {
        Self::extract(&ctx.location, ctx.dom.as_ref())
    }
}

fn identifier_from_segment(segment: &str) -> Option<String> {
    if segment.eq_ignore_ascii_case("new") {
        return None;
    }
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return Some(segment.to_string());
    }
    let digits = segment.rsplit('-').next()?;
    if !digits.is_empty() && digits.len() < segment.len() && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

/// One row of the host track table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRow {
    pub node: NodeId,
    pub track_id: Option<String>,
}

/// The host's track listing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTable {
    pub table: NodeId,
    pub header_row: Option<NodeId>,
    pub rows: Vec<TrackRow>,
}

impl TrackTable {
    pub fn locate(ctx: &TaskContext) -> Option<Self> {
        let table = ctx.query(markup::TRACK_TABLE)?;
        let header_row = ctx.query_within(table, markup::TABLE_HEADER_ROW).into_iter().next();
        let rows = ctx
            .query_within(table, markup::TABLE_ROW)
            .into_iter()
            .map(|node| TrackRow {
                node,
                track_id: ctx
                    .dom
                    .attr(node, markup::TRACK_ID_ATTR)
                    .filter(|id| !id.trim().is_empty()),
            })
            .collect();
        Some(Self {
            table,
            header_row,
            rows,
        })
    }

    /// Identifiers of all rows that have one
    pub fn track_ids(&self) -> Vec<&str> {
        self.rows.iter().filter_map(|r| r.track_id.as_deref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Fragment, VirtualDom};

    #[test]
    fn test_path_identifiers() {
        assert_eq!(TrackIdExtractor::from_path("/backstage/tracks/42/edit").as_deref(), Some("42"));
        assert_eq!(TrackIdExtractor::from_path("/track/summer-heat-42").as_deref(), Some("42"));
        assert_eq!(TrackIdExtractor::from_path("/beat/7?tab=info").as_deref(), Some("7"));
        assert_eq!(TrackIdExtractor::from_path("/backstage/tracks/new"), None);
        assert_eq!(TrackIdExtractor::from_path("/track/dark-trap"), None);
        assert_eq!(TrackIdExtractor::from_path("/upload"), None);
        assert_eq!(TrackIdExtractor::from_path("/track"), None);
    }

    #[test]
    fn test_query_identifiers() {
        assert_eq!(TrackIdExtractor::from_query("/upload/success?id=77").as_deref(), Some("77"));
        assert_eq!(
            TrackIdExtractor::from_query("/x?foo=1&track_id=9#top").as_deref(),
            Some("9")
        );
        assert_eq!(TrackIdExtractor::from_query("/x?id="), None);
        assert_eq!(TrackIdExtractor::from_query("/x#id=3"), None);
    }

    #[test]
    fn test_dom_fallback() {
        let dom = VirtualDom::with_body("data-stagehand");
        assert_eq!(TrackIdExtractor::extract("/upload/success", &dom), None);

        dom.render("body", &Fragment::new("div").attr("data-track-id", "88"))
            .unwrap();
        assert_eq!(TrackIdExtractor::extract("/upload/success", &dom).as_deref(), Some("88"));
        // The path wins over the DOM
        assert_eq!(
            TrackIdExtractor::extract("/backstage/tracks/42/edit", &dom).as_deref(),
            Some("42")
        );
    }
}
