//! End-to-end scenario replays

mod helpers;

use helpers::{services, FakeMetadataServer};
use serde_json::json;
use stagehand_common::events::{EngineEvent, NavigationTrigger};
use stagehand_common::PageType;
use stagehand_rc::features::default_registry;
use stagehand_rc::scenario::{replay, Scenario};
use std::collections::HashMap;
use std::io::Write;

const UPLOAD_FLOW: &str = r#"
name = "upload then confirm"
start_path = "/"

[[steps]]
action = "render"
parent = "body"
fragment = { tag = "header" }

[[steps]]
action = "render"
parent = "body"
fragment = { tag = "form", attrs = { class = "track-form" } }

[[steps]]
action = "navigate"
path = "/upload"

[[steps]]
action = "wait"
ms = 150

[[steps]]
action = "submit"
fields = { key = "F#", scale = "minor", tempo = 128 }

[[steps]]
action = "remove"
selector = "form"

[[steps]]
action = "render"
parent = "body"
fragment = { tag = "div", attrs = { class = "upload-confirmation" }, text = "Upload complete" }

[[steps]]
action = "navigate"
path = "/upload/success?id=77"

[[steps]]
action = "wait"
ms = 150
"#;

#[tokio::test]
async fn test_upload_flow_replay() {
    let server = FakeMetadataServer::start().await;
    let scenario = Scenario::from_toml(UPLOAD_FLOW).unwrap();
    let registry = default_registry(HashMap::new()).unwrap();

    let report = replay(&scenario, registry, services(&server.endpoint), None)
        .await
        .unwrap();

    assert_eq!(report.name, "upload then confirm");
    assert_eq!(report.final_location, "/upload/success?id=77");
    assert_eq!(report.page_type, PageType::Confirmation);
    assert_eq!(report.submissions, vec!["staged".to_string()]);

    let saves = server.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0]["identifier"], "77");
    assert_eq!(saves[0]["key"], "F#");
    assert_eq!(saves[0]["tempo"], "128");

    assert!(report.outline.contains("Custom fields saved for track 77."), "{}", report.outline);
    assert!(report.outline.contains("stagehand-banner"), "{}", report.outline);
    assert_eq!(report.count("TaskExhausted"), 0);

    let applied: Vec<&str> = report
        .events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TaskApplied { task, .. } => Some(task.as_str()),
            _ => None,
        })
        .collect();
    for task in ["sample-safe-banner", "custom-fields-panel", "staged-submission"] {
        assert!(applied.contains(&task), "{} missing from {:?}", task, applied);
    }
    // The banner survives navigation, so it is written once
    assert_eq!(applied.iter().filter(|t| **t == "sample-safe-banner").count(), 1);
}

#[tokio::test]
async fn test_back_navigation_replay() {
    let server = FakeMetadataServer::start().await;
    server.insert("5", json!({ "key": "A", "scale": "minor", "tempo": 140 }));
    let scenario = Scenario::from_toml(
        r#"
        name = "browse and go back"
        start_path = "/album/13"

        [[steps]]
        action = "render"
        parent = "body"
        fragment = { tag = "article", attrs = { data-track-id = "5" }, children = [{ tag = "h3", attrs = { class = "track-title" }, text = "Night Drive" }] }

        [[steps]]
        action = "navigate"
        path = "/discover"

        [[steps]]
        action = "wait"
        ms = 100

        [[steps]]
        action = "back"
        "#,
    )
    .unwrap();
    let registry = default_registry(HashMap::new()).unwrap();

    let report = replay(&scenario, registry, services(&server.endpoint), None)
        .await
        .unwrap();

    assert_eq!(report.final_location, "/album/13");
    assert_eq!(report.page_type, PageType::Album);
    assert!(report.events.iter().any(|e| matches!(
        e,
        EngineEvent::NavigationAccepted { trigger: NavigationTrigger::Popstate, current_path, .. }
            if current_path == "/album/13"
    )));
    assert!(report.outline.contains("A minor · 140 BPM"), "{}", report.outline);
    assert_eq!(report.outline.matches("stagehand-subtitle").count(), 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["page_type"], "album");
    assert!(json["events"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn test_body_mounted_late_replay() {
    let scenario = Scenario::from_toml(
        r#"
        name = "late body"
        start_path = "/genre/trap"
        mount_body = false

        [[steps]]
        action = "wait"
        ms = 50

        [[steps]]
        action = "mount_body"

        [[steps]]
        action = "render"
        parent = "body"
        fragment = { tag = "header" }
        "#,
    )
    .unwrap();
    let registry = default_registry(HashMap::new()).unwrap();

    let report = replay(&scenario, registry, helpers::offline_services(), None)
        .await
        .unwrap();

    assert!(report.outline.contains("stagehand-banner"), "{}", report.outline);
    assert_eq!(report.injected_nodes, 1);
}

#[test]
fn test_load_scenario_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(UPLOAD_FLOW.as_bytes()).unwrap();

    let scenario = Scenario::load(file.path()).unwrap();
    assert_eq!(scenario.name, "upload then confirm");
    assert_eq!(scenario.steps.len(), 9);
}

#[test]
fn test_load_missing_scenario_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = Scenario::load(&dir.path().join("missing.toml")).unwrap_err();
    assert!(format!("{:#}", err).contains("missing.toml"));
}
