//! Deferred custom-field submission on the upload confirmation page
//!
//! Upload pages stage the custom fields because the track has no identifier
//! yet. Once the confirmation page shows the new identifier, the staged
//! record is saved and deleted, and a short note confirms it.

use super::custom_fields::CustomFields;
use super::extract::TrackIdExtractor;
use super::{injected, markup};
use crate::dom::{Fragment, InsertPosition};
use crate::error::TaskError;
use crate::task::{DomPatch, InjectionTask, PageScope, TaskContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use stagehand_common::staging::{ClearTarget, PENDING_METADATA_KEY};
use stagehand_common::PageType;
use tracing::info;

pub struct StagedSubmission;

impl StagedSubmission {
    pub const NAME: &'static str = "staged-submission";

    fn note(identifier: &str) -> Fragment {
        Fragment::new("p")
            .class(injected::STAGED_NOTE)
            .text(format!("Custom fields saved for track {}.", identifier))
    }
}

impl InjectionTask for StagedSubmission {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn scope(&self) -> PageScope {
        PageScope::Pages(&[PageType::Confirmation])
    }

    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool {
        ctx.exists(&format!(".{}", injected::STAGED_NOTE))
    }

    fn prerequisites_ready(&self, ctx: &TaskContext) -> bool {
        ctx.exists(markup::CONFIRMATION)
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<DomPatch, TaskError>> {
        async move {
            let staging = &ctx.services.staging;
            let max_age = ctx.services.params.staging_max_age();

            // Nothing staged: nothing to do on this confirmation page
            let Some(fields) = staging.load::<CustomFields>(PENDING_METADATA_KEY, max_age).await else {
                return Ok(DomPatch::new());
            };

            let identifier = TrackIdExtractor::for_task(ctx)
                .ok_or_else(|| TaskError::MissingTarget(markup::TRACK_ID_HOLDER.to_string()))?;
            let confirmation = ctx.require(markup::CONFIRMATION)?;

            ctx.services
                .metadata
                .save(&fields.into_metadata(&identifier))
                .await?;
            staging
                .clear(ClearTarget::Key(PENDING_METADATA_KEY.to_string()))
                .await;
            info!(identifier = %identifier, "Staged custom fields submitted");

            let mut patch = DomPatch::new();
            patch.insert(confirmation, InsertPosition::Append, Self::note(&identifier));
            Ok(patch)
        }
        .boxed()
    }
}
