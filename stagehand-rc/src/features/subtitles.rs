//! Track subtitles ("A minor · 140 BPM") under every track title
//!
//! A full-page scan with one lookup per track, so it runs off the slow
//! observer window.

use super::{injected, markup};
use crate::dom::{Fragment, NodeId};
use crate::error::TaskError;
use crate::metadata::TrackMetadata;
use crate::task::{Cadence, DomPatch, InjectionTask, PageScope, TaskContext};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use stagehand_common::PageType;

pub struct TrackSubtitles;

impl TrackSubtitles {
    pub const NAME: &'static str = "track-subtitles";

    /// `key scale · N BPM`, skipping whatever is unknown
    pub fn subtitle(record: &TrackMetadata) -> Option<String> {
        let tonality = [record.key.as_deref(), record.scale.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let tempo = record.tempo.map(|bpm| format!("{} BPM", bpm));

        let parts: Vec<String> = [Some(tonality).filter(|t| !t.is_empty()), tempo]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" · "))
        }
    }

    /// Titles without a subtitle or placeholder, with the identifier of
    /// their track
    fn pending_titles(ctx: &TaskContext) -> Vec<(NodeId, String)> {
        let subtitle = format!(".{}", injected::SUBTITLE);
        let placeholder = format!(".{}", injected::SUBTITLE_NONE);
        ctx.query_all(markup::TRACK_ID_HOLDER)
            .into_iter()
            .filter_map(|item| {
                let id = ctx.dom.attr(item, markup::TRACK_ID_ATTR)?;
                let title = ctx.query_within(item, markup::TRACK_TITLE).into_iter().next()?;
                let done = !ctx.query_within(title, &subtitle).is_empty()
                    || !ctx.query_within(title, &placeholder).is_empty();
                (!done).then_some((title, id))
            })
            .collect()
    }
}

impl InjectionTask for TrackSubtitles {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn scope(&self) -> PageScope {
        PageScope::Pages(&[
            PageType::Track,
            PageType::Artist,
            PageType::Playlist,
            PageType::Album,
            PageType::Genre,
            PageType::Discover,
        ])
    }

    fn cadence(&self) -> Cadence {
        Cadence::Slow
    }

    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool {
        Self::pending_titles(ctx).is_empty()
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<DomPatch, TaskError>> {
        async move {
            let titles = Self::pending_titles(ctx);
            let lookups = titles
                .iter()
                .map(|(_, id)| ctx.services.metadata.fetch(id));
            let results = future::join_all(lookups).await;

            let mut patch = DomPatch::new();
            for ((title, _), result) in titles.iter().zip(results) {
                // Tracks with nothing to show get an empty placeholder so the
                // title is not looked up again on every scan
                let fragment = match result?.as_ref().and_then(Self::subtitle) {
                    Some(text) => Fragment::new("span").class(injected::SUBTITLE).text(text),
                    None => Fragment::new("span").class(injected::SUBTITLE_NONE),
                };
                patch.append(*title, fragment);
            }
            Ok(patch)
        }
        .boxed()
    }
}
