//! Debounce and throttle wrappers
//!
//! Both wrappers only schedule; they never inspect the values they carry, so
//! they are safe around callbacks with side effects elsewhere in the engine.
//!
//! Deadlines use `tokio::time::Instant`, so tests running with paused time see
//! exact firing instants.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Defers a callback until `wait` has elapsed with no further calls
///
/// Only the value from the most recent call is delivered. If the debouncer is
/// dropped while a call is pending, the pending value is still delivered once
/// its window elapses.
///
/// Must be created inside a tokio runtime: the timer runs on a spawned task.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    wait: Duration,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(wait: Duration, mut callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut latest = first;
                let mut deadline = Instant::now() + wait;

                loop {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(value) => {
                                latest = value;
                                deadline = Instant::now() + wait;
                            }
                            None => {
                                tokio::time::sleep_until(deadline).await;
                                callback(latest);
                                return;
                            }
                        },
                        _ = tokio::time::sleep_until(deadline) => {
                            callback(latest);
                            break;
                        }
                    }
                }
            }
        });

        Self { tx, wait }
    }

    /// Record a call; restarts the quiet window
    pub fn call(&self, value: T) {
        if self.tx.send(value).is_err() {
            tracing::debug!("Debounce timer task has stopped; call dropped");
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

/// Build a debounced wrapper around `callback`
pub fn debounce<T, F>(wait: Duration, callback: F) -> Debouncer<T>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    Debouncer::new(wait, callback)
}

/// Invokes a callback at most once per `limit` window
///
/// The first call fires immediately; calls within `limit` of the last firing
/// are ignored (not queued). The callback runs outside the window lock, so it
/// may call the same throttle; such a nested call is ignored.
pub struct Throttle<T> {
    limit: Duration,
    last_fired: Mutex<Option<Instant>>,
    callback: Mutex<Box<dyn FnMut(T) + Send>>,
}

impl<T> Throttle<T> {
    pub fn new<F>(limit: Duration, callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self {
            limit,
            last_fired: Mutex::new(None),
            callback: Mutex::new(Box::new(callback)),
        }
    }

    /// Invoke the callback unless inside the current window
    ///
    /// Returns true if the callback ran.
    pub fn call(&self, value: T) -> bool {
        {
            let mut last_fired = self.last_fired.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            if last_fired.is_some_and(|last| now.duration_since(last) < self.limit) {
                return false;
            }
            *last_fired = Some(now);
        }

        // Busy means this is a nested call from inside the callback
        let mut callback = match self.callback.try_lock() {
            Ok(callback) => callback,
            Err(std::sync::TryLockError::Poisoned(e)) => e.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return false,
        };
        (*callback)(value);
        true
    }
}

/// Build a throttled wrapper around `callback`
pub fn throttle<T, F>(limit: Duration, callback: F) -> Throttle<T>
where
    F: FnMut(T) + Send + 'static,
{
    Throttle::new(limit, callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type Log<T> = Arc<Mutex<Vec<(Duration, T)>>>;

    fn recorder<T: Send + 'static>(start: Instant, log: Log<T>) -> impl FnMut(T) + Send + 'static {
        move |value| {
            log.lock().unwrap().push((start.elapsed(), value));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_fires_once_with_last_value() {
        let start = Instant::now();
        let log: Log<u32> = Arc::new(Mutex::new(Vec::new()));
        let debounced = debounce(Duration::from_millis(100), recorder(start, log.clone()));

        debounced.call(0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        debounced.call(50);
        tokio::time::sleep(Duration::from_millis(50)).await;
        debounced.call(100);

        tokio::time::sleep(Duration::from_millis(500)).await;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1, "expected exactly one firing: {:?}", *log);
        assert_eq!(log[0], (Duration::from_millis(200), 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_separate_bursts_fire_separately() {
        let start = Instant::now();
        let log: Log<&'static str> = Arc::new(Mutex::new(Vec::new()));
        let debounced = debounce(Duration::from_millis(100), recorder(start, log.clone()));

        debounced.call("a");
        tokio::time::sleep(Duration::from_millis(300)).await;
        debounced.call("b");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (Duration::from_millis(100), "a"),
                (Duration::from_millis(400), "b"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_delivers_pending_value_after_drop() {
        let start = Instant::now();
        let log: Log<u8> = Arc::new(Mutex::new(Vec::new()));
        let debounced = debounce(Duration::from_millis(100), recorder(start, log.clone()));

        debounced.call(7);
        drop(debounced);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*log.lock().unwrap(), vec![(Duration::from_millis(100), 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_fires_first_and_ignores_window() {
        let start = Instant::now();
        let log: Log<u32> = Arc::new(Mutex::new(Vec::new()));
        let throttled = throttle(Duration::from_millis(100), recorder(start, log.clone()));

        assert!(throttled.call(1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!throttled.call(2));
        tokio::time::sleep(Duration::from_millis(59)).await;
        assert!(!throttled.call(3));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(throttled.call(4));

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (Duration::from_millis(0), 1),
                (Duration::from_millis(100), 4),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_callback_may_call_itself() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let this: Arc<Mutex<Option<std::sync::Weak<Throttle<u32>>>>> = Arc::new(Mutex::new(None));

        let throttled = {
            let fired = Arc::clone(&fired);
            let this = Arc::clone(&this);
            Arc::new(throttle(Duration::from_millis(100), move |value: u32| {
                let nested = this
                    .lock()
                    .unwrap()
                    .as_ref()
                    .and_then(|weak| weak.upgrade())
                    .map(|throttle| throttle.call(value + 1));
                fired.lock().unwrap().push((value, nested));
            }))
        };
        *this.lock().unwrap() = Some(Arc::downgrade(&throttled));

        assert!(throttled.call(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(throttled.call(10));

        assert_eq!(
            *fired.lock().unwrap(),
            vec![(1, Some(false)), (10, Some(false))]
        );
    }
}
