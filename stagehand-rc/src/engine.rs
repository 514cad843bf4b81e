//! Engine wiring
//!
//! Connects the host adapters, the two DOM observers and the orchestrator,
//! then runs the initial cycle for the location the host was loaded at.

use crate::dom::HostDom;
use crate::metadata::MetadataClient;
use crate::navigation::{HistoryApi, InterceptedHistory, NavigationSource, Navigator};
use crate::observer::DomObserver;
use crate::orchestrator::Orchestrator;
use crate::task::{Services, TaskRegistry};
use stagehand_common::config::TomlConfig;
use stagehand_common::events::{EventBus, NavigationEvent, NavigationTrigger};
use stagehand_common::staging::{SqliteStore, StagingStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Build the shared task services from configuration
///
/// Staging uses the configured SQLite database, or memory when none is set.
pub async fn services_from_config(config: &TomlConfig) -> anyhow::Result<Arc<Services>> {
    let metadata = MetadataClient::from_config(&config.metadata, &config.engine)?;
    let staging = match &config.staging.database {
        Some(path) => {
            let store = SqliteStore::open(path, &config.staging.origin).await?;
            info!("Staging store: {} (origin {})", path.display(), config.staging.origin);
            StagingStore::new(Arc::new(store))
        }
        None => StagingStore::in_memory(),
    };

    Ok(Arc::new(Services {
        metadata: Arc::new(metadata),
        staging,
        params: config.engine.clone(),
    }))
}

/// A running reconciliation engine
pub struct Engine<H> {
    history: Arc<InterceptedHistory<H>>,
    orchestrator: Orchestrator,
    fast_observer: DomObserver,
    slow_observer: DomObserver,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl<H: HistoryApi + 'static> Engine<H> {
    /// Start observing `dom` and `host` history
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        dom: Arc<dyn HostDom>,
        host: H,
        registry: TaskRegistry,
        services: Arc<Services>,
    ) -> Self {
        let events = EventBus::new(services.params.event_bus_capacity);
        Self::start_with_events(dom, host, registry, services, events)
    }

    /// Like [`Engine::start`], publishing on an existing bus
    ///
    /// Subscribers taken before the call see the initial cycle's events.
    pub fn start_with_events(
        dom: Arc<dyn HostDom>,
        host: H,
        registry: TaskRegistry,
        services: Arc<Services>,
        events: EventBus,
    ) -> Self {
        let params = services.params.clone();
        let initial = host.location();

        let source = NavigationSource::new(&initial);
        let history = Arc::new(InterceptedHistory::new(host, source.clone()));
        let cancel = CancellationToken::new();

        let fast_observer = DomObserver::spawn(
            "fast",
            Arc::clone(&dom),
            params.fast_debounce(),
            params.observer_arm_retry(),
            cancel.child_token(),
        );
        let slow_observer = DomObserver::spawn(
            "slow",
            Arc::clone(&dom),
            params.slow_debounce(),
            params.observer_arm_retry(),
            cancel.child_token(),
        );

        let history_api: Arc<dyn HistoryApi> = history.clone();
        let orchestrator = Orchestrator::new(dom, history_api, registry, services, events);

        // Subscribe before the initial cycle so nothing it triggers is missed
        let navigation_rx = source.subscribe();
        let fast_rx = fast_observer.subscribe();
        let slow_rx = slow_observer.subscribe();

        info!(
            location = %initial,
            tasks = orchestrator.registry().len(),
            "Stagehand engine starting"
        );
        orchestrator.handle_navigation(&NavigationEvent::new(
            "",
            initial,
            NavigationTrigger::Synthetic,
        ));

        let handle = tokio::spawn(orchestrator.clone().run(
            navigation_rx,
            fast_rx,
            slow_rx,
            cancel.clone(),
        ));

        Self {
            history,
            orchestrator,
            fast_observer,
            slow_observer,
            cancel,
            handle,
        }
    }

    /// The intercepted history; host code navigates through this
    pub fn history(&self) -> &Arc<InterceptedHistory<H>> {
        &self.history
    }

    pub fn navigator(&self) -> Arc<dyn Navigator> {
        self.history.clone()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn events(&self) -> &EventBus {
        self.orchestrator.events()
    }

    /// True once both observers found the body
    pub fn observers_armed(&self) -> bool {
        self.fast_observer.is_armed() && self.slow_observer.is_armed()
    }

    /// Stop observing and wait for in-flight task runners to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Orchestrator task ended abnormally: {}", e);
        }
        self.orchestrator.wait_idle().await;
        info!("Stagehand engine stopped");
    }
}
