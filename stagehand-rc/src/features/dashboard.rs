//! Backstage summary dashboard

use super::extract::TrackTable;
use super::{injected, markup};
use crate::dom::{Fragment, InsertPosition};
use crate::error::TaskError;
use crate::task::{DomPatch, InjectionTask, PageScope, TaskContext};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use stagehand_common::PageType;

pub struct BackstageDashboard;

impl BackstageDashboard {
    pub const NAME: &'static str = "backstage-dashboard";

    pub fn fragment(tracks: usize, with_metadata: usize) -> Fragment {
        Fragment::new("section")
            .class(injected::DASHBOARD)
            .child(
                Fragment::new("span")
                    .class("stagehand-dashboard-tracks")
                    .text(format!("{} tracks", tracks)),
            )
            .child(
                Fragment::new("span")
                    .class("stagehand-dashboard-metadata")
                    .text(format!("{} with custom fields", with_metadata)),
            )
    }
}

impl InjectionTask for BackstageDashboard {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn scope(&self) -> PageScope {
        PageScope::Pages(&[PageType::Backstage])
    }

    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool {
        ctx.exists(&format!(".{}", injected::DASHBOARD))
    }

    /// The table extractor must find the host track table first
    fn prerequisites_ready(&self, ctx: &TaskContext) -> bool {
        TrackTable::locate(ctx).is_some()
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<DomPatch, TaskError>> {
        async move {
            let table = TrackTable::locate(ctx)
                .ok_or_else(|| TaskError::MissingTarget(markup::TRACK_TABLE.to_string()))?;
            let ids = table.track_ids();

            let lookups = ids.iter().map(|id| ctx.services.metadata.fetch(id));
            let mut with_metadata = 0;
            for result in future::join_all(lookups).await {
                if result?.is_some() {
                    with_metadata += 1;
                }
            }

            let mut patch = DomPatch::new();
            patch.insert(
                table.table,
                InsertPosition::Before,
                Self::fragment(table.rows.len(), with_metadata),
            );
            Ok(patch)
        }
        .boxed()
    }
}
