//! DOM Change Observer
//!
//! Watches every child-list mutation under the document and emits one
//! debounced [`DomSettled`] signal per quiet window. Mutations whose added and
//! removed nodes were all injected by the engine are ignored, which breaks
//! the observe -> inject -> observe loop.
//!
//! If the body does not exist yet, arming is retried on a timer.

use crate::dom::{HostDom, MutationRecord};
use stagehand_common::ratelimit::Debouncer;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SETTLED_CHANNEL_CAPACITY: usize = 32;

/// Debounced "the DOM may have changed in a relevant way" signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomSettled {
    /// Relevant mutation records folded into this signal
    pub mutations: usize,
}

/// Handle to a running observer task
pub struct DomObserver {
    settled: broadcast::Sender<DomSettled>,
    armed: Arc<AtomicBool>,
    window: Duration,
}

impl DomObserver {
    /// Spawn an observer with the given debounce window
    ///
    /// Runs until `cancel` fires or the DOM's mutation channel closes.
    pub fn spawn(
        name: &'static str,
        dom: Arc<dyn HostDom>,
        window: Duration,
        arm_retry: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (settled, _) = broadcast::channel(SETTLED_CHANNEL_CAPACITY);
        let armed = Arc::new(AtomicBool::new(false));
        // Subscribed before the task first runs so early mutations are kept
        let mutations = dom.subscribe();

        tokio::spawn(observe(
            name,
            dom,
            mutations,
            window,
            arm_retry,
            cancel,
            settled.clone(),
            Arc::clone(&armed),
        ));

        Self {
            settled,
            armed,
            window,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomSettled> {
        self.settled.subscribe()
    }

    /// True once the body existed and observation started
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

async fn observe(
    name: &'static str,
    dom: Arc<dyn HostDom>,
    mut mutations: broadcast::Receiver<MutationRecord>,
    window: Duration,
    arm_retry: Duration,
    cancel: CancellationToken,
    settled: broadcast::Sender<DomSettled>,
    armed: Arc<AtomicBool>,
) {
    while !dom.body_ready() {
        debug!(observer = name, "Body not ready; retrying arm in {:?}", arm_retry);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(arm_retry) => {}
        }
    }
    armed.store(true, Ordering::SeqCst);
    info!(observer = name, window_ms = window.as_millis() as u64, "DOM observer armed");

    let pending = Arc::new(AtomicUsize::new(0));
    let flush_pending = Arc::clone(&pending);
    let debouncer = Debouncer::new(window, move |()| {
        let count = flush_pending.swap(0, Ordering::SeqCst);
        if count > 0 {
            debug!(observer = name, mutations = count, "DOM settled");
            let _ = settled.send(DomSettled { mutations: count });
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = mutations.recv() => match received {
                Ok(record) => {
                    if record.is_self_inflicted() {
                        continue;
                    }
                    pending.fetch_add(1, Ordering::SeqCst);
                    debouncer.call(());
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Lost records may have been relevant
                    debug!(observer = name, skipped, "Mutation stream lagged");
                    pending.fetch_add(1, Ordering::SeqCst);
                    debouncer.call(());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!(observer = name, "DOM observer stopped");
}
