//! Marketplace feature tasks
//!
//! Each task injects one cosmetic fragment into the host marketplace. The
//! selectors in [`markup`] are a contract with the host's markup and will
//! break on host redesigns; every task degrades to "not ready" or "nothing to
//! do" when they stop matching.

pub mod banner;
pub mod bpm_column;
pub mod custom_fields;
pub mod dashboard;
pub mod extract;
pub mod staged_submission;
pub mod subtitles;

pub use banner::SampleSafeBanner;
pub use bpm_column::BpmColumn;
pub use custom_fields::{CustomFields, CustomFieldsForm, CustomFieldsPanel, SubmitOutcome};
pub use dashboard::BackstageDashboard;
pub use extract::{TrackIdExtractor, TrackTable};
pub use staged_submission::StagedSubmission;
pub use subtitles::TrackSubtitles;

use crate::task::TaskRegistry;
use stagehand_common::params::TaskOverride;
use stagehand_common::Result;
use std::collections::HashMap;

/// Host markup contract
pub mod markup {
    pub const HEADER: &str = "header";
    pub const TRACK_FORM: &str = "form.track-form";
    pub const TRACK_ID_ATTR: &str = "data-track-id";
    pub const TRACK_ID_HOLDER: &str = "[data-track-id]";
    pub const TRACK_TABLE: &str = "table.track-table";
    pub const TABLE_HEADER_ROW: &str = "thead tr";
    pub const TABLE_ROW: &str = "tbody tr";
    pub const TRACK_TITLE: &str = ".track-title";
    pub const CONFIRMATION: &str = ".upload-confirmation";
}

/// Classes of the fragments the engine injects
pub mod injected {
    pub const BANNER: &str = "stagehand-banner";
    pub const CUSTOM_FIELDS: &str = "stagehand-custom-fields";
    pub const STAGED_NOTE: &str = "stagehand-staged-note";
    pub const BPM: &str = "stagehand-bpm";
    pub const SUBTITLE: &str = "stagehand-subtitle";
    /// Empty placeholder for a title whose track has nothing to show
    pub const SUBTITLE_NONE: &str = "stagehand-subtitle-none";
    pub const DASHBOARD: &str = "stagehand-dashboard";
}

/// Registry with every marketplace task and the configured overrides
pub fn default_registry(overrides: HashMap<String, TaskOverride>) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register(SampleSafeBanner)?;
    registry.register(CustomFieldsPanel)?;
    registry.register(StagedSubmission)?;
    registry.register(BpmColumn)?;
    registry.register(TrackSubtitles)?;
    registry.register(BackstageDashboard)?;
    Ok(registry.with_overrides(overrides))
}
