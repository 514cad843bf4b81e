//! Scenario replay
//!
//! Drives a virtual host page through a scripted session so the engine can
//! be exercised end to end without a browser. Scenarios are TOML:
//!
//! ```toml
//! name = "edit page"
//! start_path = "/"
//!
//! [[steps]]
//! action = "render"
//! parent = "body"
//! fragment = { tag = "header" }
//!
//! [[steps]]
//! action = "navigate"
//! path = "/backstage/tracks/42/edit"
//! ```

use crate::dom::{Fragment, HostDom, VirtualDom};
use crate::engine::Engine;
use crate::features::{CustomFields, CustomFieldsForm, SubmitOutcome};
use crate::navigation::{HistoryApi, MemoryHistory, Navigator};
use crate::task::{Services, TaskRegistry};
use crate::{build_router, AppState};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stagehand_common::events::{EngineEvent, EventBus, NavigationTrigger};
use stagehand_common::{classify, PageType};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A scripted host session
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default = "default_start_path")]
    pub start_path: String,
    /// Mount the body before the engine starts
    #[serde(default = "default_true")]
    pub mount_body: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_start_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_trigger() -> NavigationTrigger {
    NavigationTrigger::Push
}

/// One host action
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Route change through the host history
    Navigate {
        path: String,
        #[serde(default = "default_trigger")]
        trigger: NavigationTrigger,
    },
    /// Host renders a fragment under the first match of `parent`
    Render { parent: String, fragment: Fragment },
    /// Host removes every match of `selector`
    Remove { selector: String },
    MountBody,
    Back,
    Forward,
    Wait { ms: u64 },
    /// User submits the custom fields; without `fields`, the panel is read
    Submit {
        #[serde(default)]
        fields: Option<CustomFields>,
    },
    /// Late-loading module calls `reinitialize()`
    Reinitialize {
        #[serde(default)]
        force: bool,
    },
}

impl Scenario {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid scenario")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Read scenario {} failed", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Scenario {}", path.display()))
    }
}

/// What a replay left behind
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub name: String,
    pub final_location: String,
    pub page_type: PageType,
    /// Nodes carrying the marker attribute
    pub injected_nodes: usize,
    pub outline: String,
    pub events: Vec<EngineEvent>,
    pub submissions: Vec<String>,
}

impl ReplayReport {
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>, events: &mut Vec<EngineEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Replay event log lagged");
            }
            Err(_) => break,
        }
    }
}

/// Let debounce windows elapse and task runners finish
async fn settle(engine: &Engine<MemoryHistory>, services: &Services) {
    let quiet = services.params.slow_debounce() + services.params.fast_debounce();
    for _ in 0..2 {
        tokio::time::sleep(quiet).await;
        engine.orchestrator().wait_idle().await;
    }
}

/// Replay `scenario` against a fresh virtual page
///
/// With `status_port`, the status API is served on 127.0.0.1 for the length
/// of the replay.
pub async fn replay(
    scenario: &Scenario,
    registry: TaskRegistry,
    services: Arc<Services>,
    status_port: Option<u16>,
) -> Result<ReplayReport> {
    info!(scenario = %scenario.name, steps = scenario.steps.len(), "Replay starting");

    let dom = Arc::new(VirtualDom::new(services.params.marker_attribute.clone()));
    if scenario.mount_body {
        dom.mount_body();
    }
    let host_dom: Arc<dyn HostDom> = dom.clone();

    let bus = EventBus::new(services.params.event_bus_capacity);
    let mut rx = bus.subscribe();
    let engine = Engine::start_with_events(
        Arc::clone(&host_dom),
        MemoryHistory::new(&scenario.start_path),
        registry,
        Arc::clone(&services),
        bus,
    );
    let mut events = Vec::new();
    let mut submissions = Vec::new();
    let form = CustomFieldsForm::new(Arc::clone(&host_dom), Arc::clone(&services));

    let server_cancel = CancellationToken::new();
    if let Some(port) = status_port {
        let state = AppState::new(engine.orchestrator().clone(), engine.navigator());
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("Bind status port {} failed", port))?;
        info!("Status API listening on http://127.0.0.1:{}", port);
        let shutdown = server_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                warn!("Status API stopped: {}", e);
            }
        });
    }

    for (index, step) in scenario.steps.iter().enumerate() {
        info!(step = index + 1, ?step, "Replay step");
        let history = engine.history();

        match step {
            Step::Navigate { path, trigger } => match trigger {
                NavigationTrigger::Push => history.push_state(path),
                NavigationTrigger::Replace => history.replace_state(path),
                NavigationTrigger::Hashchange => {
                    history.host().push_state(path);
                    history.on_hashchange();
                }
                NavigationTrigger::Popstate => {
                    history.host().push_state(path);
                    history.on_popstate();
                }
                NavigationTrigger::Synthetic => history.navigate_synthetic(path),
            },
            Step::Render { parent, fragment } => {
                if let Err(e) = dom.render(parent, fragment) {
                    warn!(parent = %parent, "Render step skipped: {}", e);
                }
            }
            Step::Remove { selector } => match dom.remove_all(selector) {
                Ok(removed) => info!(selector = %selector, removed, "Removed nodes"),
                Err(e) => warn!(selector = %selector, "Remove step skipped: {}", e),
            },
            Step::MountBody => {
                dom.mount_body();
            }
            Step::Back => {
                if !history.back() {
                    warn!("Back step at start of history");
                }
            }
            Step::Forward => {
                if !history.forward() {
                    warn!("Forward step at end of history");
                }
            }
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
            Step::Submit { fields } => {
                let fields = match fields.clone().or_else(|| form.read()) {
                    Some(fields) => fields,
                    None => {
                        warn!("Submit step without fields or panel; skipped");
                        continue;
                    }
                };
                let outcome = form.submit(&history.current_location(), &fields).await;
                let summary = match outcome {
                    Ok(SubmitOutcome::Saved { identifier }) => format!("saved {}", identifier),
                    Ok(SubmitOutcome::Staged { persisted: true }) => "staged".to_string(),
                    Ok(SubmitOutcome::Staged { persisted: false }) => "staging failed".to_string(),
                    Err(e) => format!("failed: {}", e),
                };
                info!(outcome = %summary, "Custom fields submitted");
                submissions.push(summary);
            }
            Step::Reinitialize { force } => engine.orchestrator().reinitialize(*force),
        }

        // Navigation events are dispatched asynchronously
        tokio::task::yield_now().await;
        drain(&mut rx, &mut events);
    }

    settle(&engine, &services).await;
    drain(&mut rx, &mut events);

    let final_location = engine.history().current_location();
    let report = ReplayReport {
        name: scenario.name.clone(),
        page_type: classify(&final_location),
        final_location,
        injected_nodes: dom.injected_count(),
        outline: dom.outline(),
        events,
        submissions,
    };

    server_cancel.cancel();
    engine.shutdown().await;
    info!(
        scenario = %report.name,
        injected = report.injected_nodes,
        events = report.events.len(),
        "Replay finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps() {
        let scenario = Scenario::from_toml(
            r##"
            name = "upload then confirm"

            [[steps]]
            action = "render"
            parent = "body"
            fragment = { tag = "form", attrs = { class = "track-form" } }

            [[steps]]
            action = "navigate"
            path = "/upload"

            [[steps]]
            action = "navigate"
            path = "#details"
            trigger = "hashchange"

            [[steps]]
            action = "submit"
            fields = { key = "A", scale = "minor", tempo = 140 }

            [[steps]]
            action = "wait"
            ms = 50

            [[steps]]
            action = "back"

            [[steps]]
            action = "reinitialize"
            force = true
            "##,
        )
        .unwrap();

        assert_eq!(scenario.start_path, "/");
        assert!(scenario.mount_body);
        assert_eq!(scenario.steps.len(), 7);
        assert_eq!(
            scenario.steps[1],
            Step::Navigate {
                path: "/upload".to_string(),
                trigger: NavigationTrigger::Push
            }
        );
        assert_eq!(
            scenario.steps[2],
            Step::Navigate {
                path: "#details".to_string(),
                trigger: NavigationTrigger::Hashchange
            }
        );
        match &scenario.steps[3] {
            Step::Submit { fields: Some(fields) } => assert_eq!(fields.tempo, Some(140)),
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(scenario.steps[6], Step::Reinitialize { force: true });
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = Scenario::from_toml(
            r#"
            name = "bad"
            [[steps]]
            action = "teleport"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid scenario"));
    }
}
