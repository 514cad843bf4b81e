//! Event types for the Stagehand engine
//!
//! Provides the navigation event model, engine lifecycle events and the
//! EventBus they are broadcast on.

mod cycle_types;
mod navigation_types;

pub use cycle_types::{CycleState, ExhaustionReason};
pub use navigation_types::{NavigationEvent, NavigationTrigger};

use crate::page::PageType;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Engine lifecycle events
///
/// Broadcast via EventBus; serialized for the status SSE stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A navigation was accepted and classified
    NavigationAccepted {
        previous_path: String,
        current_path: String,
        trigger: NavigationTrigger,
        page_type: PageType,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reconciliation cycle began running tasks
    CycleStarted {
        cycle_id: u64,
        /// Navigation generation the cycle belongs to
        generation: u64,
        page_type: PageType,
        path: String,
        /// Names of the tasks scheduled in this pass
        tasks: Vec<String>,
        /// True when entered from a DOM-settled rescan rather than navigation
        rescan: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A task wrote its fragment to the page
    TaskApplied {
        cycle_id: u64,
        task: String,
        attempt: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A task found its fragment already present
    TaskSatisfied {
        cycle_id: u64,
        task: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A task used up its attempts for this cycle
    TaskExhausted {
        cycle_id: u64,
        task: String,
        attempts: u32,
        reason: ExhaustionReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A task result arrived after the page had moved on and was dropped
    StaleResultDiscarded {
        cycle_id: u64,
        task: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every scheduled task finished
    CycleSettled {
        cycle_id: u64,
        page_type: PageType,
        applied: usize,
        satisfied: usize,
        exhausted: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The DOM change observer emitted a debounced settle signal
    DomSettled {
        /// Relevant mutation records folded into this signal
        mutations: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EngineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::NavigationAccepted { .. } => "NavigationAccepted",
            EngineEvent::CycleStarted { .. } => "CycleStarted",
            EngineEvent::TaskApplied { .. } => "TaskApplied",
            EngineEvent::TaskSatisfied { .. } => "TaskSatisfied",
            EngineEvent::TaskExhausted { .. } => "TaskExhausted",
            EngineEvent::StaleResultDiscarded { .. } => "StaleResultDiscarded",
            EngineEvent::CycleSettled { .. } => "CycleSettled",
            EngineEvent::DomSettled { .. } => "DomSettled",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for engine events
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the orchestrator)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use stagehand_common::events::{EngineEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(EngineEvent::DomSettled {
///     mutations: 3,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(EngineEvent::DomSettled { mutations: 3, .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_serializes_with_type_tag() {
        let event = EngineEvent::TaskApplied {
            cycle_id: 4,
            task: "bpm-column".to_string(),
            attempt: 2,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TaskApplied");
        assert_eq!(json["task"], "bpm-column");
        assert_eq!(json["attempt"], 2);
        assert_eq!(event.event_type(), "TaskApplied");
    }

    #[test]
    fn test_exhaustion_reason_serialization() {
        let reason = ExhaustionReason::ApplyFailed("timeout".to_string());
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "apply_failed");
        assert_eq!(json["detail"], "timeout");

        let json = serde_json::to_value(ExhaustionReason::PrerequisitesNotReady).unwrap();
        assert_eq!(json["reason"], "prerequisites_not_ready");
    }

    #[test]
    fn test_navigation_event_round_trip() {
        let event = NavigationEvent::new("/", "/backstage/tracks/42/edit", NavigationTrigger::Push);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"trigger\":\"push\""));
        let back: NavigationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_emit_without_subscribers_fails_but_lossy_does_not_panic() {
        let bus = EventBus::new(8);
        let event = EngineEvent::DomSettled {
            mutations: 1,
            timestamp: chrono::Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 8);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        for mutations in 1..=3 {
            bus.emit(EngineEvent::DomSettled {
                mutations,
                timestamp: chrono::Utc::now(),
            })
            .unwrap();
        }

        for expected in 1..=3 {
            match rx.recv().await.unwrap() {
                EngineEvent::DomSettled { mutations, .. } => assert_eq!(mutations, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
