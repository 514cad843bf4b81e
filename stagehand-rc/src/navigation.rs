//! Navigation Event Source
//!
//! The host's history entry points are wrapped in one adapter,
//! [`InterceptedHistory`]. Everything else subscribes to the
//! [`NavigationSource`] instead of patching the host.
//!
//! # Emission rules
//!
//! - Notifications are queued and emitted from a dispatcher task, never
//!   inside the wrapped history call.
//! - Events are emitted in arrival order.
//! - A notification whose location equals the last emitted one is dropped
//!   (e.g. `replace_state` to the current URL).

use stagehand_common::events::{NavigationEvent, NavigationTrigger};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const NAVIGATION_CHANNEL_CAPACITY: usize = 64;

/// The host's history API
pub trait HistoryApi: Send + Sync {
    fn push_state(&self, location: &str);
    fn replace_state(&self, location: &str);
    /// Current location: path plus any query string and fragment
    fn location(&self) -> String;
}

/// History that supports back/forward traversal
pub trait TraversableHistory: HistoryApi {
    /// Step back; returns false at the start of the session
    fn back(&self) -> bool;
    /// Step forward; returns false at the end of the session
    fn forward(&self) -> bool;
}

/// Engine-initiated navigation (status API, replays)
pub trait Navigator: Send + Sync {
    fn navigate_synthetic(&self, location: &str);
    fn current_location(&self) -> String;
}

/// Resolve a fragment-only or query-only target against the current location
fn resolve_location(current: &str, target: &str) -> String {
    if target.starts_with('#') {
        let base = current.split('#').next().unwrap_or(current);
        format!("{}{}", base, target)
    } else if target.starts_with('?') {
        let base = current.split(['?', '#']).next().unwrap_or(current);
        format!("{}{}", base, target)
    } else {
        target.to_string()
    }
}

struct HistoryState {
    entries: Vec<String>,
    index: usize,
}

/// In-memory session history
pub struct MemoryHistory {
    state: Mutex<HistoryState>,
}

impl MemoryHistory {
    pub fn new(initial: &str) -> Self {
        Self {
            state: Mutex::new(HistoryState {
                entries: vec![initial.to_string()],
                index: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every session entry, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.lock().entries.clone()
    }
}

impl HistoryApi for MemoryHistory {
    fn push_state(&self, location: &str) {
        let mut state = self.lock();
        let resolved = resolve_location(&state.entries[state.index], location);
        let next = state.index + 1;
        state.entries.truncate(next);
        state.entries.push(resolved);
        state.index = next;
    }

    fn replace_state(&self, location: &str) {
        let mut state = self.lock();
        let index = state.index;
        let resolved = resolve_location(&state.entries[index], location);
        state.entries[index] = resolved;
    }

    fn location(&self) -> String {
        let state = self.lock();
        state.entries[state.index].clone()
    }
}

impl TraversableHistory for MemoryHistory {
    fn back(&self) -> bool {
        let mut state = self.lock();
        if state.index == 0 {
            return false;
        }
        state.index -= 1;
        true
    }

    fn forward(&self) -> bool {
        let mut state = self.lock();
        if state.index + 1 >= state.entries.len() {
            return false;
        }
        state.index += 1;
        true
    }
}

/// Normalizes route-change notifications into [`NavigationEvent`]s
///
/// Cloning yields another handle to the same source. Must be created inside a
/// tokio runtime.
#[derive(Clone)]
pub struct NavigationSource {
    notify_tx: mpsc::UnboundedSender<(String, NavigationTrigger)>,
    events: broadcast::Sender<NavigationEvent>,
    last_location: Arc<Mutex<String>>,
}

impl NavigationSource {
    /// Start a source whose first recorded location is `initial`
    pub fn new(initial: &str) -> Self {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<(String, NavigationTrigger)>();
        let (events, _) = broadcast::channel(NAVIGATION_CHANNEL_CAPACITY);
        let last_location = Arc::new(Mutex::new(initial.to_string()));

        let dispatch_events = events.clone();
        let dispatch_last = Arc::clone(&last_location);
        tokio::spawn(async move {
            while let Some((location, trigger)) = notify_rx.recv().await {
                let previous = {
                    let mut last = dispatch_last.lock().unwrap_or_else(|e| e.into_inner());
                    if *last == location {
                        debug!(location = %location, trigger = %trigger, "Duplicate navigation suppressed");
                        continue;
                    }
                    std::mem::replace(&mut *last, location.clone())
                };

                debug!(from = %previous, to = %location, trigger = %trigger, "Navigation");
                let _ = dispatch_events.send(NavigationEvent::new(previous, location, trigger));
            }
        });

        Self {
            notify_tx,
            events,
            last_location,
        }
    }

    /// Queue a notification; never blocks and never emits synchronously
    pub fn notify(&self, location: &str, trigger: NavigationTrigger) {
        if self.notify_tx.send((location.to_string(), trigger)).is_err() {
            debug!("Navigation dispatcher stopped; notification dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavigationEvent> {
        self.events.subscribe()
    }

    /// Location of the most recently emitted event
    pub fn last_location(&self) -> String {
        self.last_location
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// History adapter that reports every route change to a [`NavigationSource`]
///
/// Calls go to the host first; the notification follows once the host's
/// state has changed.
pub struct InterceptedHistory<H> {
    host: H,
    source: NavigationSource,
}

impl<H: HistoryApi> InterceptedHistory<H> {
    pub fn new(host: H, source: NavigationSource) -> Self {
        Self { host, source }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn source(&self) -> &NavigationSource {
        &self.source
    }

    /// Browser back/forward notification
    pub fn on_popstate(&self) {
        self.source
            .notify(&self.host.location(), NavigationTrigger::Popstate);
    }

    /// Fragment change notification
    pub fn on_hashchange(&self) {
        self.source
            .notify(&self.host.location(), NavigationTrigger::Hashchange);
    }

    /// Custom route-change broadcast from the host application
    pub fn on_route_broadcast(&self) {
        self.source
            .notify(&self.host.location(), NavigationTrigger::Synthetic);
    }
}

impl<H: TraversableHistory> InterceptedHistory<H> {
    /// Go back one entry and deliver the resulting popstate
    pub fn back(&self) -> bool {
        let moved = self.host.back();
        if moved {
            self.on_popstate();
        }
        moved
    }

    pub fn forward(&self) -> bool {
        let moved = self.host.forward();
        if moved {
            self.on_popstate();
        }
        moved
    }
}

impl<H: HistoryApi> HistoryApi for InterceptedHistory<H> {
    fn push_state(&self, location: &str) {
        self.host.push_state(location);
        self.source
            .notify(&self.host.location(), NavigationTrigger::Push);
    }

    fn replace_state(&self, location: &str) {
        self.host.replace_state(location);
        self.source
            .notify(&self.host.location(), NavigationTrigger::Replace);
    }

    fn location(&self) -> String {
        self.host.location()
    }
}

impl<H: HistoryApi> Navigator for InterceptedHistory<H> {
    fn navigate_synthetic(&self, location: &str) {
        self.host.push_state(location);
        self.source
            .notify(&self.host.location(), NavigationTrigger::Synthetic);
    }

    fn current_location(&self) -> String {
        self.host.location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn intercepted(initial: &str) -> InterceptedHistory<MemoryHistory> {
        InterceptedHistory::new(MemoryHistory::new(initial), NavigationSource::new(initial))
    }

    #[tokio::test]
    async fn test_emission_is_deferred_past_the_call() {
        let history = intercepted("/");
        let mut rx = history.source().subscribe();

        history.push_state("/track/summer-heat-42");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            NavigationEvent::new("/", "/track/summer-heat-42", NavigationTrigger::Push)
        );
    }

    #[tokio::test]
    async fn test_duplicate_location_is_suppressed() {
        let history = intercepted("/");
        let mut rx = history.source().subscribe();

        history.push_state("/discover");
        history.replace_state("/discover");
        history.push_state("/genre/trap");

        assert_eq!(rx.recv().await.unwrap().current_path, "/discover");
        let next = rx.recv().await.unwrap();
        assert_eq!(next.previous_path, "/discover");
        assert_eq!(next.current_path, "/genre/trap");
        assert_eq!(history.source().last_location(), "/genre/trap");
    }

    #[tokio::test]
    async fn test_back_emits_popstate() {
        let history = intercepted("/");
        let mut rx = history.source().subscribe();

        history.push_state("/album/13");
        history.push_state("/album/13/edit");
        assert!(history.back());

        let triggers: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| (e.current_path, e.trigger))
        .collect();
        assert_eq!(
            triggers,
            vec![
                ("/album/13".to_string(), NavigationTrigger::Push),
                ("/album/13/edit".to_string(), NavigationTrigger::Push),
                ("/album/13".to_string(), NavigationTrigger::Popstate),
            ]
        );
        assert!(history.forward());
        assert!(!history.forward());
    }

    #[tokio::test]
    async fn test_hash_change_resolves_against_current_path() {
        let history = intercepted("/track/9?tab=info");
        let mut rx = history.source().subscribe();

        history.host().push_state("#comments");
        history.on_hashchange();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.current_path, "/track/9?tab=info#comments");
        assert_eq!(event.trigger, NavigationTrigger::Hashchange);
    }

    #[tokio::test]
    async fn test_synthetic_navigation() {
        let history = intercepted("/");
        let mut rx = history.source().subscribe();

        history.navigate_synthetic("/backstage");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.trigger, NavigationTrigger::Synthetic);
        assert_eq!(history.current_location(), "/backstage");
    }

    #[test]
    fn test_memory_history_push_truncates_forward_entries() {
        let history = MemoryHistory::new("/");
        history.push_state("/a");
        history.push_state("/b");
        assert!(history.back());
        history.push_state("/c");
        assert_eq!(history.entries(), vec!["/", "/a", "/c"]);
        assert!(!history.forward());
    }
}
