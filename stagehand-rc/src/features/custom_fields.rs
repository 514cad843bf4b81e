//! Custom fields panel and form submission
//!
//! The panel adds key, scale, tempo, producer, tag and licensing inputs to
//! the host's track form. On edit pages it is prefilled from the metadata
//! endpoint, which needs the track identifier; on upload pages the track does
//! not exist yet, so a submission is staged until the confirmation page
//! reveals the new identifier (see `staged_submission`).

use super::extract::TrackIdExtractor;
use super::{injected, markup};
use crate::dom::{self, Fragment, HostDom, NodeId};
use crate::error::{MetadataError, TaskError};
use crate::metadata::TrackMetadata;
use crate::retry::RetryPolicy;
use crate::task::{DomPatch, InjectionTask, PageScope, Services, TaskContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use stagehand_common::staging::PENDING_METADATA_KEY;
use stagehand_common::PageType;
use std::sync::Arc;
use tracing::{info, warn};

const FIELD_KEY: &str = "stagehand-key";
const FIELD_SCALE: &str = "stagehand-scale";
const FIELD_TEMPO: &str = "stagehand-tempo";
const FIELD_PRODUCERS: &str = "stagehand-producers";
const FIELD_TAGS: &str = "stagehand-tags";
const FIELD_LICENSE: &str = "stagehand-license";
const FIELD_SAMPLE_SAFE: &str = "stagehand-sample-safe";

/// Values of the custom fields panel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomFields {
    pub key: Option<String>,
    pub scale: Option<String>,
    pub tempo: Option<u32>,
    pub producers: Vec<String>,
    pub tags: Vec<String>,
    pub license_type: Option<String>,
    pub sample_safe: bool,
}

impl CustomFields {
    pub fn from_metadata(record: &TrackMetadata) -> Self {
        Self {
            key: record.key.clone(),
            scale: record.scale.clone(),
            tempo: record.tempo,
            producers: record.producers.clone(),
            tags: record.tags.clone(),
            license_type: record.license_type.clone(),
            sample_safe: record.sample_safe,
        }
    }

    pub fn into_metadata(self, identifier: &str) -> TrackMetadata {
        TrackMetadata {
            identifier: identifier.to_string(),
            key: self.key,
            scale: self.scale,
            tempo: self.tempo,
            producers: self.producers,
            tags: self.tags,
            license_type: self.license_type,
            sample_safe: self.sample_safe,
        }
    }

    fn input(name: &str, value: &str) -> Fragment {
        Fragment::new("input")
            .attr("name", name)
            .attr("value", value)
    }

    /// The panel fragment, prefilled with these values
    pub fn panel(&self) -> Fragment {
        let tempo = self.tempo.map(|t| t.to_string()).unwrap_or_default();
        let mut sample_safe = Fragment::new("input")
            .attr("type", "checkbox")
            .attr("name", FIELD_SAMPLE_SAFE);
        if self.sample_safe {
            sample_safe = sample_safe.attr("checked", "checked");
        }

        Fragment::new("fieldset")
            .class(injected::CUSTOM_FIELDS)
            .child(Fragment::new("legend").text("Custom fields"))
            .child(Self::input(FIELD_KEY, self.key.as_deref().unwrap_or_default()))
            .child(Self::input(FIELD_SCALE, self.scale.as_deref().unwrap_or_default()))
            .child(Self::input(FIELD_TEMPO, &tempo).attr("type", "number"))
            .child(Self::input(FIELD_PRODUCERS, &self.producers.join(", ")))
            .child(Self::input(FIELD_TAGS, &self.tags.join(", ")))
            .child(Self::input(FIELD_LICENSE, self.license_type.as_deref().unwrap_or_default()))
            .child(sample_safe)
    }

    /// Read the values currently held by an injected panel
    pub fn read_panel(dom: &dyn HostDom, panel: NodeId) -> Self {
        let value = |name: &str| -> Option<String> {
            let selector = format!("input[name=\"{}\"]", name);
            dom::query_within_or_empty(dom, panel, &selector)
                .into_iter()
                .next()
                .and_then(|input| dom.attr(input, "value"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let list = |name: &str| -> Vec<String> {
            value(name)
                .map(|v| {
                    v.split(',')
                        .map(|item| item.trim().to_string())
                        .filter(|item| !item.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };
        let sample_safe = dom::query_within_or_empty(dom, panel, &format!("input[name=\"{}\"]", FIELD_SAMPLE_SAFE))
            .into_iter()
            .next()
            .is_some_and(|input| dom.has_attr(input, "checked"));

        Self {
            key: value(FIELD_KEY),
            scale: value(FIELD_SCALE),
            tempo: value(FIELD_TEMPO).and_then(|t| t.parse().ok()),
            producers: list(FIELD_PRODUCERS),
            tags: list(FIELD_TAGS),
            license_type: value(FIELD_LICENSE),
            sample_safe,
        }
    }
}

/// Injects the custom fields panel into the track form
pub struct CustomFieldsPanel;

impl CustomFieldsPanel {
    pub const NAME: &'static str = "custom-fields-panel";
    pub const MAX_ATTEMPTS: u32 = 6;
}

impl InjectionTask for CustomFieldsPanel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn scope(&self) -> PageScope {
        PageScope::Pages(&[PageType::Edit, PageType::Upload])
    }

    fn retry_policy(&self, defaults: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: Self::MAX_ATTEMPTS,
            ..*defaults
        }
    }

    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool {
        ctx.exists(&format!(".{}", injected::CUSTOM_FIELDS))
    }

    fn prerequisites_ready(&self, ctx: &TaskContext) -> bool {
        if !ctx.exists(markup::TRACK_FORM) {
            return false;
        }
        ctx.page_type != PageType::Edit || TrackIdExtractor::for_task(ctx).is_some()
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<DomPatch, TaskError>> {
        async move {
            let form = ctx.require(markup::TRACK_FORM)?;

            let fields = match ctx.page_type {
                PageType::Edit => {
                    let identifier = TrackIdExtractor::for_task(ctx)
                        .ok_or_else(|| TaskError::PrerequisitesNotReady("track identifier".to_string()))?;
                    ctx.services
                        .metadata
                        .fetch(&identifier)
                        .await?
                        .map(|record| CustomFields::from_metadata(&record))
                        .unwrap_or_default()
                }
                _ => CustomFields::default(),
            };

            let mut patch = DomPatch::new();
            patch.append(form, fields.panel());
            Ok(patch)
        }
        .boxed()
    }
}

/// Result of submitting the custom fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Saved to the metadata endpoint
    Saved { identifier: String },
    /// No identifier yet; kept for the confirmation page
    Staged { persisted: bool },
}

/// User-facing submission of the custom fields on edit and upload pages
pub struct CustomFieldsForm {
    dom: Arc<dyn HostDom>,
    services: Arc<Services>,
}

impl CustomFieldsForm {
    pub fn new(dom: Arc<dyn HostDom>, services: Arc<Services>) -> Self {
        Self { dom, services }
    }

    /// Values of the injected panel, if it is on the page
    pub fn read(&self) -> Option<CustomFields> {
        let panel = dom::query_or_none(self.dom.as_ref(), &format!(".{}", injected::CUSTOM_FIELDS))?;
        Some(CustomFields::read_panel(self.dom.as_ref(), panel))
    }

    /// Save `fields` for the track at `location`, or stage them if the track
    /// has no identifier yet
    pub async fn submit(&self, location: &str, fields: &CustomFields) -> Result<SubmitOutcome, MetadataError> {
        match TrackIdExtractor::extract(location, self.dom.as_ref()) {
            Some(identifier) => {
                let record = fields.clone().into_metadata(&identifier);
                self.services.metadata.save(&record).await?;
                info!(identifier = %identifier, "Custom fields saved");
                Ok(SubmitOutcome::Saved { identifier })
            }
            None => {
                let persisted = self.services.staging.save(PENDING_METADATA_KEY, fields).await;
                if persisted {
                    info!("Custom fields staged until the track identifier is known");
                } else {
                    warn!("Custom fields could not be staged");
                }
                Ok(SubmitOutcome::Staged { persisted })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::VirtualDom;

    #[test]
    fn test_panel_round_trips_through_the_dom() {
        let dom = VirtualDom::with_body("data-stagehand");
        let fields = CustomFields {
            key: Some("A".to_string()),
            scale: Some("minor".to_string()),
            tempo: Some(140),
            producers: vec!["Metro".to_string(), "Wheezy".to_string()],
            tags: vec!["dark".to_string()],
            license_type: Some("lease".to_string()),
            sample_safe: true,
        };
        let panel = dom.render("body", &fields.panel()).unwrap();
        assert_eq!(CustomFields::read_panel(&dom, panel), fields);
    }

    #[test]
    fn test_empty_panel_reads_as_defaults() {
        let dom = VirtualDom::with_body("data-stagehand");
        let panel = dom.render("body", &CustomFields::default().panel()).unwrap();
        assert_eq!(CustomFields::read_panel(&dom, panel), CustomFields::default());
    }
}
