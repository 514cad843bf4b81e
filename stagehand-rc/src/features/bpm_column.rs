//! BPM column in track tables
//!
//! Adds a header cell and one cell per row. Rows streamed in after the first
//! pass are picked up by the next rescan, since the task is satisfied only
//! when every row has its cell.

use super::extract::{TrackRow, TrackTable};
use super::injected;
use crate::dom::Fragment;
use crate::error::TaskError;
use crate::task::{DomPatch, InjectionTask, PageScope, TaskContext};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use stagehand_common::PageType;

pub struct BpmColumn;

impl BpmColumn {
    pub const NAME: &'static str = "bpm-column";

    fn cell_selector() -> String {
        format!(".{}", injected::BPM)
    }

    fn has_cell(ctx: &TaskContext, node: crate::dom::NodeId) -> bool {
        !ctx.query_within(node, &Self::cell_selector()).is_empty()
    }

    fn missing_rows<'t>(ctx: &TaskContext, table: &'t TrackTable) -> Vec<&'t TrackRow> {
        table
            .rows
            .iter()
            .filter(|row| !Self::has_cell(ctx, row.node))
            .collect()
    }
}

impl InjectionTask for BpmColumn {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn scope(&self) -> PageScope {
        PageScope::Pages(&[PageType::Backstage, PageType::Playlist, PageType::Album])
    }

    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool {
        let Some(table) = TrackTable::locate(ctx) else {
            return false;
        };
        let header_done = table
            .header_row
            .map_or(true, |row| Self::has_cell(ctx, row));
        header_done && Self::missing_rows(ctx, &table).is_empty()
    }

    fn prerequisites_ready(&self, ctx: &TaskContext) -> bool {
        TrackTable::locate(ctx).is_some()
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<DomPatch, TaskError>> {
        async move {
            let table = TrackTable::locate(ctx)
                .ok_or_else(|| TaskError::MissingTarget(super::markup::TRACK_TABLE.to_string()))?;
            let mut patch = DomPatch::new();

            if let Some(header) = table.header_row.filter(|row| !Self::has_cell(ctx, *row)) {
                patch.append(header, Fragment::new("th").class(injected::BPM).text("BPM"));
            }

            let rows = Self::missing_rows(ctx, &table);
            let lookups = rows.iter().map(|row| async move {
                match row.track_id.as_deref() {
                    Some(id) => ctx.services.metadata.fetch(id).await,
                    None => Ok(None),
                }
            });
            let results = future::join_all(lookups).await;

            for (row, result) in rows.iter().zip(results) {
                let tempo = result?
                    .and_then(|record| record.tempo)
                    .map(|bpm| bpm.to_string())
                    .unwrap_or_default();
                patch.append(row.node, Fragment::new("td").class(injected::BPM).text(tempo));
            }

            Ok(patch)
        }
        .boxed()
    }
}
