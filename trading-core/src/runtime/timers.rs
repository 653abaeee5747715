// runtime/timers.rs
// ====
// Timer Registry
// ====
// Named periodic and deferred tasks with crash containment.
// Callbacks that fail or panic are counted and logged, the timer keeps going.
// shutdown() drains in-flight callbacks for a bounded grace period, then aborts.
// ====

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Interval,
    Timeout,
}

/// Bookkeeping for a registered timer
#[derive(Debug, Clone)]
pub struct TimerMetadata {
    pub name: String,
    pub kind: TimerKind,
    pub period: Duration,
    pub created_at: DateTime<Utc>,
    pub last_executed: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub error_count: u64,
    pub is_executing: bool,
}

impl TimerMetadata {
    fn new(name: &str, kind: TimerKind, period: Duration) -> Self {
        Self {
            name: name.to_string(),
            kind,
            period,
            created_at: Utc::now(),
            last_executed: None,
            execution_count: 0,
            error_count: 0,
            is_executing: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimerRegistryConfig {
    /// How long shutdown() waits for running callbacks before aborting them
    pub shutdown_grace: Duration,
}

impl Default for TimerRegistryConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

struct TimerEntry {
    id: u64,
    meta: Arc<Mutex<TimerMetadata>>,
    handle: JoinHandle<()>,
}

struct RegistryInner {
    timers: DashMap<String, TimerEntry>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    config: TimerRegistryConfig,
}

/// Registry of named timers. Cloning shares the same registry.
///
/// Registering a name that already exists replaces (and aborts) the old timer.
#[derive(Clone)]
pub struct TimerRegistry {
    inner: Arc<RegistryInner>,
}

impl TimerRegistry {
    pub fn new(config: TimerRegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                timers: DashMap::new(),
                next_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Runs `task` every `period`, first execution one period from now.
    ///
    /// Executions never overlap: the next tick waits for the previous callback.
    /// Returns `false` if the registry is shutting down.
    pub fn set_interval<F, Fut>(&self, name: &str, period: Duration, task: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_shutting_down() {
            warn!(timer = name, "Registry shutting down, interval not registered");
            return false;
        }

        // tokio intervals panic on a zero period
        let period = period.max(Duration::from_millis(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let meta = Arc::new(Mutex::new(TimerMetadata::new(
            name,
            TimerKind::Interval,
            period,
        )));
        let weak = Arc::downgrade(&self.inner);
        let task_meta = meta.clone();
        let timer_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if is_stopping(&weak) {
                    break;
                }
                execute(&timer_name, &task_meta, &task).await;
            }
        });

        self.install(name, id, meta, handle);
        debug!(timer = name, period_ms = period.as_millis() as u64, "Interval registered");
        true
    }

    /// Runs `task` once after `delay`, then removes the timer.
    pub fn set_timeout<F, Fut>(&self, name: &str, delay: Duration, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_shutting_down() {
            warn!(timer = name, "Registry shutting down, timeout not registered");
            return false;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let meta = Arc::new(Mutex::new(TimerMetadata::new(
            name,
            TimerKind::Timeout,
            delay,
        )));
        let weak = Arc::downgrade(&self.inner);
        let task_meta = meta.clone();
        let timer_name = name.to_string();
        // Holds the task back until its entry is in the map, so the
        // self-removal below can never run before the insert.
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            if armed_rx.await.is_err() {
                return;
            }
            time::sleep(delay).await;
            if is_stopping(&weak) {
                return;
            }
            execute(&timer_name, &task_meta, task).await;
            if let Some(inner) = weak.upgrade() {
                inner.timers.remove_if(&timer_name, |_, entry| entry.id == id);
            }
        });

        self.install(name, id, meta, handle);
        let _ = armed_tx.send(());
        true
    }

    /// Stops and removes a timer. Returns whether it existed.
    pub fn clear(&self, name: &str) -> bool {
        match self.inner.timers.remove(name) {
            Some((_, entry)) => {
                entry.handle.abort();
                debug!(timer = name, "Timer cleared");
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        let names: Vec<String> = self.inner.timers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.clear(&name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.timers.contains_key(name)
    }

    pub fn metadata(&self, name: &str) -> Option<TimerMetadata> {
        self.inner
            .timers
            .get(name)
            .map(|entry| entry.meta.lock().clone())
    }

    pub fn list(&self) -> Vec<TimerMetadata> {
        self.inner
            .timers
            .iter()
            .map(|entry| entry.meta.lock().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.timers.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Stops scheduling, waits up to the grace period for running callbacks,
    /// then aborts every remaining timer.
    ///
    /// Returns `true` if all callbacks finished within the grace period.
    pub async fn shutdown(&self) -> bool {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Timer registry already shutting down");
        }

        let grace = self.inner.config.shutdown_grace;
        info!(
            timers = self.len(),
            grace_ms = grace.as_millis() as u64,
            "Timer registry shutting down"
        );

        let drained = time::timeout(grace, async {
            while self.executing_count() > 0 {
                time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                still_running = self.executing_count(),
                "Grace period elapsed, force-clearing timers"
            );
        }

        self.clear_all();
        drained
    }

    fn executing_count(&self) -> usize {
        self.inner
            .timers
            .iter()
            .filter(|entry| entry.meta.lock().is_executing)
            .count()
    }

    fn install(&self, name: &str, id: u64, meta: Arc<Mutex<TimerMetadata>>, handle: JoinHandle<()>) {
        let entry = TimerEntry { id, meta, handle };
        if let Some(previous) = self.inner.timers.insert(name.to_string(), entry) {
            debug!(timer = name, "Replacing existing timer");
            previous.handle.abort();
        }
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new(TimerRegistryConfig::default())
    }
}

fn is_stopping(weak: &Weak<RegistryInner>) -> bool {
    weak.upgrade()
        .map(|inner| inner.shutting_down.load(Ordering::SeqCst))
        .unwrap_or(true)
}

/// Runs one callback, containing errors and panics.
///
/// A panic while building the future counts the same as one while polling it.
async fn execute<M, Fut>(name: &str, meta: &Mutex<TimerMetadata>, make: M)
where
    M: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    meta.lock().is_executing = true;
    let outcome = match panic::catch_unwind(AssertUnwindSafe(make)) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(payload) => Err(payload),
    };

    let mut m = meta.lock();
    m.is_executing = false;
    m.execution_count += 1;
    m.last_executed = Some(Utc::now());
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            m.error_count += 1;
            warn!(timer = name, error = %e, errors = m.error_count, "Timer callback failed");
        }
        Err(_) => {
            m.error_count += 1;
            error!(timer = name, errors = m.error_count, "Timer callback panicked");
        }
    }
}
