//! Shared fixtures for stagehand-rc integration tests
//!
//! - `params()` / `services()`: short tunables and an in-memory staging store
//! - `FakeMetadataServer`: local axum server speaking the metadata envelope
//! - `FakeTask`: scriptable injection task that records how it was driven

#![allow(dead_code)]

use axum::{
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use stagehand_common::events::{EngineEvent, EventBus};
use stagehand_common::params::EngineParams;
use stagehand_common::staging::StagingStore;
use stagehand_rc::dom::{Fragment, NodeId};
use stagehand_rc::error::TaskError;
use stagehand_rc::metadata::MetadataClient;
use stagehand_rc::task::{Cadence, DomPatch, InjectionTask, PageScope, Services, TaskContext};
use stagehand_rc::retry::RetryPolicy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const MARKER: &str = "data-stagehand";

/// Endpoint nothing listens on; tasks that never fetch can use it
pub const OFFLINE_ENDPOINT: &str = "http://127.0.0.1:9/metadata";

/// Tunables small enough for tests
pub fn params() -> EngineParams {
    EngineParams {
        fast_debounce_ms: 20,
        slow_debounce_ms: 60,
        observer_arm_retry_ms: 10,
        default_backoff_ms: 100,
        ..EngineParams::default()
    }
}

pub fn services(endpoint: &str) -> Arc<Services> {
    services_with(endpoint, params())
}

pub fn services_with(endpoint: &str, params: EngineParams) -> Arc<Services> {
    let metadata = MetadataClient::new(endpoint, Duration::from_secs(2), params.cache_duration())
        .expect("client builds");
    Arc::new(Services {
        metadata: Arc::new(metadata),
        staging: StagingStore::in_memory(),
        params,
    })
}

pub fn offline_services() -> Arc<Services> {
    services(OFFLINE_ENDPOINT)
}

/// Everything currently buffered on `rx`
pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count(events: &[EngineEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

pub fn bus() -> (EventBus, broadcast::Receiver<EngineEvent>) {
    let bus = EventBus::new(1024);
    let rx = bus.subscribe();
    (bus, rx)
}

// =============================================================================
// Fake metadata endpoint
// =============================================================================

#[derive(Default)]
struct ServerState {
    records: Mutex<HashMap<String, Value>>,
    saves: Mutex<Vec<HashMap<String, String>>>,
    lookups: AtomicUsize,
    fail_next: AtomicUsize,
    reject_next: Mutex<Option<String>>,
    delay_ms: AtomicUsize,
}

/// Local metadata endpoint
///
/// Lookups (`{"action":"get"}` JSON) answer from `records`; saves
/// (form-encoded) are recorded and stored.
#[derive(Clone)]
pub struct FakeMetadataServer {
    state: Arc<ServerState>,
    pub endpoint: String,
}

impl FakeMetadataServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/metadata", post(handle))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            endpoint: format!("http://{}/metadata", addr),
        }
    }

    pub fn insert(&self, identifier: &str, record: Value) {
        let mut record = record;
        record["identifier"] = json!(identifier);
        self.state
            .records
            .lock()
            .unwrap()
            .insert(identifier.to_string(), record);
    }

    /// Number of lookup requests received
    pub fn lookups(&self) -> usize {
        self.state.lookups.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> Vec<HashMap<String, String>> {
        self.state.saves.lock().unwrap().clone()
    }

    /// Answer the next `n` requests with HTTP 500
    pub fn fail_next(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Answer the next request with an error envelope
    pub fn reject_next(&self, message: &str) {
        *self.state.reject_next.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

async fn handle(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }

    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

    if !is_form {
        state.lookups.fetch_add(1, Ordering::SeqCst);
    }

    let failing = state
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if let Some(message) = state.reject_next.lock().unwrap().take() {
        return Json(json!({ "status": "error", "message": message })).into_response();
    }

    if is_form {
        let Ok(Form(fields)) = Form::<HashMap<String, String>>::from_request(request, &()).await else {
            return (StatusCode::BAD_REQUEST, "bad form").into_response();
        };
        let identifier = fields.get("identifier").cloned().unwrap_or_default();
        let tempo = fields.get("tempo").and_then(|t| t.parse::<u32>().ok());
        let record = json!({
            "identifier": identifier,
            "key": fields.get("key").filter(|v| !v.is_empty()),
            "scale": fields.get("scale").filter(|v| !v.is_empty()),
            "tempo": tempo,
        });
        state.records.lock().unwrap().insert(identifier, record);
        state.saves.lock().unwrap().push(fields);
        return Json(json!({ "status": "ok" })).into_response();
    }

    let Ok(Json(body)) = Json::<Value>::from_request(request, &()).await else {
        return (StatusCode::BAD_REQUEST, "bad json").into_response();
    };
    let identifier = body["identifier"].as_str().unwrap_or_default();
    match state.records.lock().unwrap().get(identifier) {
        Some(record) => Json(json!({ "status": "ok", "data": record })).into_response(),
        None => Json(json!({ "status": "ok" })).into_response(),
    }
}

// =============================================================================
// Fake injection task
// =============================================================================

type Predicate = Box<dyn Fn(&TaskContext) -> bool + Send + Sync>;

/// Counters shared between a `FakeTask` and the test
#[derive(Default)]
pub struct Probe {
    pub applies: AtomicU32,
    pub readiness_checks: AtomicU32,
    pub in_apply: AtomicU32,
    pub max_in_apply: AtomicU32,
}

impl Probe {
    pub fn applies(&self) -> u32 {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_in_apply.load(Ordering::SeqCst)
    }
}

/// Appends `div.<class>` to `parent`
pub struct FakeTask {
    name: &'static str,
    scope: PageScope,
    cadence: Cadence,
    class: &'static str,
    parent: &'static str,
    max_attempts: Option<u32>,
    apply_delay: Duration,
    fail_times: AtomicU32,
    panics: AtomicBool,
    ready: Predicate,
    pub probe: Arc<Probe>,
}

impl FakeTask {
    pub fn new(name: &'static str, scope: PageScope) -> Self {
        Self {
            name,
            scope,
            cadence: Cadence::Fast,
            class: name,
            parent: "body",
            max_attempts: None,
            apply_delay: Duration::ZERO,
            fail_times: AtomicU32::new(0),
            panics: AtomicBool::new(false),
            ready: Box::new(|_| true),
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn slow(mut self) -> Self {
        self.cadence = Cadence::Slow;
        self
    }

    pub fn parent(mut self, selector: &'static str) -> Self {
        self.parent = selector;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    /// Fail the first `n` applies
    pub fn failing(self, n: u32) -> Self {
        self.fail_times.store(n, Ordering::SeqCst);
        self
    }

    pub fn panicking(self) -> Self {
        self.panics.store(true, Ordering::SeqCst);
        self
    }

    pub fn ready_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TaskContext) -> bool + Send + Sync + 'static,
    {
        self.ready = Box::new(predicate);
        self
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }

    pub fn selector(&self) -> String {
        format!(".{}", self.class)
    }
}

impl InjectionTask for FakeTask {
    fn name(&self) -> &'static str {
        self.name
    }

    fn scope(&self) -> PageScope {
        self.scope
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    fn retry_policy(&self, defaults: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            ..*defaults
        }
    }

    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool {
        ctx.exists(&self.selector())
    }

    fn prerequisites_ready(&self, ctx: &TaskContext) -> bool {
        self.probe.readiness_checks.fetch_add(1, Ordering::SeqCst);
        (self.ready)(ctx)
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<DomPatch, TaskError>> {
        async move {
            let probe = &self.probe;
            probe.applies.fetch_add(1, Ordering::SeqCst);
            let now = probe.in_apply.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_in_apply.fetch_max(now, Ordering::SeqCst);

            if !self.apply_delay.is_zero() {
                tokio::time::sleep(self.apply_delay).await;
            }
            probe.in_apply.fetch_sub(1, Ordering::SeqCst);

            if self.panics.load(Ordering::SeqCst) {
                panic!("{} exploded", self.name);
            }
            let failing = self
                .fail_times
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(TaskError::Network("connection reset".to_string()));
            }

            let parent: NodeId = ctx.require(self.parent)?;
            let mut patch = DomPatch::new();
            patch.append(parent, Fragment::new("div").class(self.class));
            Ok(patch)
        }
        .boxed()
    }
}
