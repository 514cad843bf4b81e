//! Reconciliation Orchestrator
//!
//! Subscribes to navigation events and the two DOM observers, classifies the
//! current path and runs the matching injection tasks.
//!
//! # Generations
//!
//! Every change of pathname (or a forced refresh) starts a new navigation
//! generation. A task result is committed only while its cycle's generation
//! is still current; anything older is discarded unwritten.
//!
//! # Rescans
//!
//! A DOM-settled signal, a same-path navigation (query or fragment change)
//! and `reinitialize()` re-enter scheduling for the current page type without
//! classifying again. Satisfied tasks short-circuit via
//! `is_already_satisfied`; tasks still running or already exhausted in the
//! cycle are skipped.
//!
//! # Self-exclusion
//!
//! Each task name has one claim (cycle and generation) and one async lock.
//! A second runner for the same generation is never spawned; a runner for a
//! newer generation takes over the claim but waits for the old runner's
//! attempt to finish, and that attempt's result is then stale.

use crate::cycle::{ReconciliationCycle, TaskOutcome};
use crate::dom::HostDom;
use crate::error::TaskError;
use crate::navigation::HistoryApi;
use crate::observer::DomSettled;
use crate::retry::{run_with_backoff, AttemptError, RetryError, RetryPolicy};
use crate::task::{Cadence, InjectionTask, Services, TaskContext, TaskRegistry};
use futures::FutureExt;
use serde::Serialize;
use stagehand_common::events::{
    CycleState, EngineEvent, EventBus, ExhaustionReason, NavigationEvent, NavigationTrigger,
};
use stagehand_common::page::normalize_path;
use stagehand_common::{classify, time, PageType};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub generation: u64,
    pub location: String,
    pub page_type: Option<PageType>,
    pub cycle_id: Option<u64>,
    pub cycle_state: CycleState,
    /// Task runners currently in flight
    pub running_tasks: usize,
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    cycle_id: u64,
    generation: u64,
}

#[derive(Default)]
struct NavigationState {
    generation: u64,
    /// Normalized pathname of the current generation
    path: String,
    /// Full location last accepted
    location: String,
    active: Option<Arc<ReconciliationCycle>>,
}

/// How a task runner finished
enum RunOutcome {
    Applied { attempt: u32 },
    Satisfied,
}

struct Inner {
    dom: Arc<dyn HostDom>,
    history: Arc<dyn HistoryApi>,
    registry: TaskRegistry,
    services: Arc<Services>,
    events: EventBus,
    defaults: RetryPolicy,
    state: Mutex<NavigationState>,
    claims: Mutex<HashMap<&'static str, Claim>>,
    task_locks: Mutex<HashMap<&'static str, Arc<tokio::sync::Mutex<()>>>>,
    next_cycle_id: AtomicU64,
    running: AtomicUsize,
    idle: Notify,
}

/// Handle to the reconciliation state machine
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        dom: Arc<dyn HostDom>,
        history: Arc<dyn HistoryApi>,
        registry: TaskRegistry,
        services: Arc<Services>,
        events: EventBus,
    ) -> Self {
        let defaults = RetryPolicy::from_params(&services.params);
        Self {
            inner: Arc::new(Inner {
                dom,
                history,
                registry,
                services,
                events,
                defaults,
                state: Mutex::new(NavigationState::default()),
                claims: Mutex::new(HashMap::new()),
                task_locks: Mutex::new(HashMap::new()),
                next_cycle_id: AtomicU64::new(1),
                running: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.inner.services
    }

    /// Accept a navigation event
    ///
    /// A new pathname starts a new generation and cycle; the same pathname
    /// (fragment or query change) rescans the active cycle.
    pub fn handle_navigation(&self, event: &NavigationEvent) {
        let inner = &self.inner;
        let path = normalize_path(&event.current_path);
        let page_type = classify(&event.current_path);

        let (new_generation, already_accepted) = {
            let mut state = inner.lock_state();
            let already_accepted = state.generation > 0 && state.location == event.current_path;
            state.location = event.current_path.clone();
            if state.path != path || state.generation == 0 {
                state.generation += 1;
                state.path = path;
                (Some(state.generation), false)
            } else {
                (None, already_accepted)
            }
        };

        // A history signal arriving after a DOM settle already synced this location
        if already_accepted {
            debug!(location = %event.current_path, trigger = %event.trigger, "Location already accepted");
            return;
        }

        inner.events.emit_lossy(EngineEvent::NavigationAccepted {
            previous_path: event.previous_path.clone(),
            current_path: event.current_path.clone(),
            trigger: event.trigger,
            page_type,
            timestamp: time::now(),
        });

        match new_generation {
            Some(generation) => {
                info!(
                    from = %event.previous_path,
                    to = %event.current_path,
                    trigger = %event.trigger,
                    page_type = %page_type,
                    generation,
                    "Navigation accepted"
                );
                inner.start_cycle(generation, page_type, &event.current_path, false, None, None);
            }
            None => {
                debug!(location = %event.current_path, trigger = %event.trigger, "Same-path navigation; rescanning");
                inner.rescan(None);
            }
        }
    }

    /// React to a debounced DOM-settled signal from the observer for `cadence`
    pub fn handle_dom_settled(&self, cadence: Cadence, settled: DomSettled) {
        let inner = &self.inner;
        inner.events.emit_lossy(EngineEvent::DomSettled {
            mutations: settled.mutations,
            timestamp: time::now(),
        });

        if inner.sync_location() {
            return;
        }
        debug!(cadence = ?cadence, mutations = settled.mutations, "DOM settled; rescanning");
        inner.rescan(Some(cadence));
    }

    /// Idempotent re-entry for modules that finish loading late
    ///
    /// `force` starts a fresh generation for the current location, discarding
    /// in-flight results and attempt counters; otherwise this is a rescan.
    pub fn reinitialize(&self, force: bool) {
        if force {
            self.refresh();
        } else if !self.inner.sync_location() {
            self.inner.rescan(None);
        }
    }

    /// Start a new generation and cycle for the current location
    pub fn refresh(&self) {
        let inner = &self.inner;
        let location = inner.history.location();
        let generation = {
            let mut state = inner.lock_state();
            state.generation += 1;
            state.path = normalize_path(&location);
            state.location = location.clone();
            state.generation
        };
        let page_type = classify(&location);
        info!(location = %location, page_type = %page_type, generation, "Forced refresh");
        inner.start_cycle(generation, page_type, &location, false, None, None);
    }

    pub fn status(&self) -> OrchestratorStatus {
        let state = self.inner.lock_state();
        let active = state.active.as_ref();
        OrchestratorStatus {
            generation: state.generation,
            location: state.location.clone(),
            page_type: active.map(|c| c.page_type),
            cycle_id: active.map(|c| c.id),
            cycle_state: active.map_or(CycleState::Idle, |c| c.state()),
            running_tasks: self.inner.running.load(Ordering::SeqCst),
        }
    }

    /// The active cycle, if any
    pub fn active_cycle(&self) -> Option<Arc<ReconciliationCycle>> {
        self.inner.lock_state().active.clone()
    }

    /// Resolve once no task runner is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.running.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drive the orchestrator from its input channels until cancelled
    pub async fn run(
        self,
        mut navigation: broadcast::Receiver<NavigationEvent>,
        mut fast: broadcast::Receiver<DomSettled>,
        mut slow: broadcast::Receiver<DomSettled>,
        cancel: CancellationToken,
    ) {
        info!("Orchestrator started");
        let (mut nav_open, mut fast_open, mut slow_open) = (true, true, true);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = navigation.recv(), if nav_open => match received {
                    Ok(event) => self.handle_navigation(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Navigation stream lagged; resyncing with host location");
                        self.inner.sync_location();
                    }
                    Err(RecvError::Closed) => nav_open = false,
                },
                received = fast.recv(), if fast_open => match received {
                    Ok(settled) => self.handle_dom_settled(Cadence::Fast, settled),
                    Err(RecvError::Lagged(_)) => self.handle_dom_settled(Cadence::Fast, DomSettled { mutations: 0 }),
                    Err(RecvError::Closed) => fast_open = false,
                },
                received = slow.recv(), if slow_open => match received {
                    Ok(settled) => self.handle_dom_settled(Cadence::Slow, settled),
                    Err(RecvError::Lagged(_)) => self.handle_dom_settled(Cadence::Slow, DomSettled { mutations: 0 }),
                    Err(RecvError::Closed) => slow_open = false,
                },
                else => break,
            }
        }

        info!("Orchestrator stopped");
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, NavigationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_claims(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, Claim>> {
        self.claims.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn task_lock(&self, name: &'static str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.task_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name).or_default())
    }

    fn is_current(&self, cycle: &ReconciliationCycle) -> bool {
        self.lock_state().generation == cycle.generation
    }

    /// Start a navigation if the host pathname moved without any history
    /// signal; returns true if it did
    fn sync_location(self: &Arc<Self>) -> bool {
        let location = self.history.location();
        let previous = {
            let state = self.lock_state();
            if state.generation > 0 && state.path == normalize_path(&location) {
                return false;
            }
            state.location.clone()
        };
        let event = NavigationEvent::new(previous, location, NavigationTrigger::Synthetic);
        Orchestrator {
            inner: Arc::clone(self),
        }
        .handle_navigation(&event);
        true
    }

    fn start_cycle(
        self: &Arc<Self>,
        generation: u64,
        page_type: PageType,
        location: &str,
        rescan: bool,
        earlier: Option<&ReconciliationCycle>,
        cadence: Option<Cadence>,
    ) {
        let id = self.next_cycle_id.fetch_add(1, Ordering::SeqCst);
        let cycle = Arc::new(ReconciliationCycle::new(id, generation, page_type, location, rescan));
        if let Some(earlier) = earlier {
            cycle.carry_exhausted_from(earlier);
        }
        cycle.set_state(CycleState::Scheduling);

        let tasks = self.registry.select(page_type, cadence);
        let claimed = self.claim(&cycle, tasks);
        if rescan && claimed.is_empty() {
            return;
        }

        {
            let mut state = self.lock_state();
            if state.generation != generation {
                debug!(cycle_id = id, "Cycle superseded before it started");
                self.release_all(&cycle, &claimed);
                return;
            }
            state.active = Some(Arc::clone(&cycle));
        }

        self.dispatch(&cycle, claimed);
    }

    /// Re-enter scheduling for the current page type
    fn rescan(self: &Arc<Self>, cadence: Option<Cadence>) {
        let (active, generation, location) = {
            let state = self.lock_state();
            (state.active.clone(), state.generation, state.location.clone())
        };

        let Some(cycle) = active.filter(|c| c.generation == generation) else {
            let page_type = classify(&location);
            self.start_cycle(generation, page_type, &location, true, None, cadence);
            return;
        };

        if cycle.is_settled() {
            self.start_cycle(generation, cycle.page_type, &location, true, Some(cycle.as_ref()), cadence);
            return;
        }

        let tasks = self.registry.select(cycle.page_type, cadence);
        let claimed = self.claim(&cycle, tasks);
        if !claimed.is_empty() {
            self.dispatch(&cycle, claimed);
        }
    }

    /// Claim every task not exhausted in `cycle` and not already running
    /// for its generation
    fn claim(
        &self,
        cycle: &ReconciliationCycle,
        tasks: Vec<Arc<dyn InjectionTask>>,
    ) -> Vec<Arc<dyn InjectionTask>> {
        let mut claims = self.lock_claims();
        tasks
            .into_iter()
            .filter(|task| !cycle.is_exhausted(task.name()))
            .filter(|task| {
                let name = task.name();
                if let Some(claim) = claims.get(name).filter(|c| c.generation >= cycle.generation) {
                    debug!(task = name, cycle_id = claim.cycle_id, "Task already running; skipped");
                    return false;
                }
                claims.insert(
                    name,
                    Claim {
                        cycle_id: cycle.id,
                        generation: cycle.generation,
                    },
                );
                true
            })
            .collect()
    }

    fn release(&self, cycle: &ReconciliationCycle, name: &'static str) {
        let mut claims = self.lock_claims();
        if claims.get(name).is_some_and(|c| c.cycle_id == cycle.id) {
            claims.remove(name);
        }
    }

    fn release_all(&self, cycle: &ReconciliationCycle, tasks: &[Arc<dyn InjectionTask>]) {
        for task in tasks {
            self.release(cycle, task.name());
        }
    }

    fn dispatch(self: &Arc<Self>, cycle: &Arc<ReconciliationCycle>, tasks: Vec<Arc<dyn InjectionTask>>) {
        let names: Vec<String> = tasks.iter().map(|t| t.name().to_string()).collect();

        self.events.emit_lossy(EngineEvent::CycleStarted {
            cycle_id: cycle.id,
            generation: cycle.generation,
            page_type: cycle.page_type,
            path: cycle.location.clone(),
            tasks: names.clone(),
            rescan: cycle.rescan,
            timestamp: time::now(),
        });

        if tasks.is_empty() {
            info!(cycle_id = cycle.id, page_type = %cycle.page_type, "No tasks for page type");
            self.settle(cycle);
            return;
        }

        info!(
            cycle_id = cycle.id,
            page_type = %cycle.page_type,
            rescan = cycle.rescan,
            tasks = ?names,
            "Running tasks"
        );
        cycle.begin_tasks(tasks.len());
        cycle.set_state(CycleState::Running);

        for task in tasks {
            self.running.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(self);
            let cycle = Arc::clone(cycle);
            tokio::spawn(async move {
                Arc::clone(&inner).run_task(cycle, task).await;
                if inner.running.fetch_sub(1, Ordering::SeqCst) == 1 {
                    inner.idle.notify_waiters();
                }
            });
        }
    }

    fn settle(&self, cycle: &ReconciliationCycle) {
        cycle.set_state(CycleState::Settled);
        let tally = cycle.tally();
        info!(
            cycle_id = cycle.id,
            page_type = %cycle.page_type,
            applied = tally.applied,
            satisfied = tally.satisfied,
            exhausted = tally.exhausted,
            stale = tally.stale,
            "Cycle settled"
        );
        self.events.emit_lossy(EngineEvent::CycleSettled {
            cycle_id: cycle.id,
            page_type: cycle.page_type,
            applied: tally.applied,
            satisfied: tally.satisfied,
            exhausted: tally.exhausted,
            timestamp: time::now(),
        });
    }

    async fn run_task(self: Arc<Self>, cycle: Arc<ReconciliationCycle>, task: Arc<dyn InjectionTask>) {
        let name = task.name();
        let policy = self.registry.policy_for(task.as_ref(), &self.defaults);
        let lock = self.task_lock(name);

        let attempts = {
            let inner = Arc::clone(&self);
            let cycle = Arc::clone(&cycle);
            let task = Arc::clone(&task);
            run_with_backoff(name, &policy, move |_| {
                let inner = Arc::clone(&inner);
                let cycle = Arc::clone(&cycle);
                let task = Arc::clone(&task);
                let lock = Arc::clone(&lock);
                async move { inner.attempt(&cycle, task.as_ref(), &lock).await }
            })
        };

        let outcome = match AssertUnwindSafe(attempts).catch_unwind().await {
            Ok(Ok(RunOutcome::Applied { attempt })) => {
                info!(task = name, cycle_id = cycle.id, attempt, "Task applied");
                self.events.emit_lossy(EngineEvent::TaskApplied {
                    cycle_id: cycle.id,
                    task: name.to_string(),
                    attempt,
                    timestamp: time::now(),
                });
                TaskOutcome::Applied
            }
            Ok(Ok(RunOutcome::Satisfied)) => {
                debug!(task = name, cycle_id = cycle.id, "Task already satisfied");
                self.events.emit_lossy(EngineEvent::TaskSatisfied {
                    cycle_id: cycle.id,
                    task: name.to_string(),
                    timestamp: time::now(),
                });
                TaskOutcome::Satisfied
            }
            Ok(Err(RetryError::Aborted { attempt, error })) => {
                debug!(task = name, cycle_id = cycle.id, attempt, error = %error, "Task abandoned");
                TaskOutcome::Stale
            }
            Ok(Err(RetryError::Exhausted { attempts, last })) => {
                let reason = match &last {
                    TaskError::PrerequisitesNotReady(_) | TaskError::MissingTarget(_) => {
                        ExhaustionReason::PrerequisitesNotReady
                    }
                    other => ExhaustionReason::ApplyFailed(other.to_string()),
                };
                warn!(
                    task = name,
                    cycle_id = cycle.id,
                    page_type = %cycle.page_type,
                    attempts,
                    error = %last,
                    "Task exhausted its attempts"
                );
                self.events.emit_lossy(EngineEvent::TaskExhausted {
                    cycle_id: cycle.id,
                    task: name.to_string(),
                    attempts,
                    reason,
                    timestamp: time::now(),
                });
                TaskOutcome::Exhausted
            }
            Err(_) => {
                error!(task = name, cycle_id = cycle.id, "Task panicked");
                self.events.emit_lossy(EngineEvent::TaskExhausted {
                    cycle_id: cycle.id,
                    task: name.to_string(),
                    attempts: cycle.attempts(name),
                    reason: ExhaustionReason::ApplyFailed("task panicked".to_string()),
                    timestamp: time::now(),
                });
                TaskOutcome::Exhausted
            }
        };

        self.release(&cycle, name);
        if cycle.finish_task(name, outcome) {
            self.settle(&cycle);
        }
    }

    /// One attempt: stale check, satisfied check, prerequisites, apply,
    /// stale check, commit
    async fn attempt(
        &self,
        cycle: &ReconciliationCycle,
        task: &dyn InjectionTask,
        lock: &tokio::sync::Mutex<()>,
    ) -> Result<RunOutcome, AttemptError<TaskError>> {
        let _guard = lock.lock().await;
        let name = task.name();

        if !self.is_current(cycle) {
            return Err(AttemptError::Abort(TaskError::Stale));
        }

        let attempt = cycle.record_attempt(name);
        let ctx = TaskContext {
            dom: Arc::clone(&self.dom),
            services: Arc::clone(&self.services),
            page_type: cycle.page_type,
            location: cycle.location.clone(),
            cycle_id: cycle.id,
            attempt,
        };

        if task.is_already_satisfied(&ctx) {
            return Ok(RunOutcome::Satisfied);
        }

        if !task.prerequisites_ready(&ctx) {
            return Err(AttemptError::Retry(TaskError::PrerequisitesNotReady(
                name.to_string(),
            )));
        }

        let patch = match task.apply(&ctx).await {
            Ok(patch) => patch,
            Err(TaskError::Stale) => return Err(AttemptError::Abort(TaskError::Stale)),
            Err(e) => return Err(AttemptError::Retry(e)),
        };

        if !self.is_current(cycle) {
            debug!(task = name, cycle_id = cycle.id, "Stale result discarded");
            self.events.emit_lossy(EngineEvent::StaleResultDiscarded {
                cycle_id: cycle.id,
                task: name.to_string(),
                timestamp: time::now(),
            });
            return Err(AttemptError::Abort(TaskError::Stale));
        }

        if patch.is_empty() || task.is_already_satisfied(&ctx) {
            return Ok(RunOutcome::Satisfied);
        }

        patch
            .commit(self.dom.as_ref(), &self.services.params.marker_attribute, name)
            .map_err(|e| AttemptError::Retry(TaskError::from(e)))?;
        Ok(RunOutcome::Applied { attempt })
    }
}
