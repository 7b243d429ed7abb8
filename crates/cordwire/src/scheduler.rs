//! Task scheduler shared by the ratelimiter and the gateway controller.
//!
//! Work is either detached ([`TaskScheduler::spawn`]) or submitted to a
//! keyed lane ([`TaskScheduler::spawn_serial`]). A lane runs its jobs one at
//! a time in submission order; different lanes run in parallel. Jobs that
//! panic are logged and counted, and the lane keeps draining.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::route::RouteKey;

/// How long an empty lane is kept before its worker exits.
pub const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(60);

type Job = BoxFuture<'static, ()>;

/// Key of a serial lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaneKey(String);

impl LaneKey {
    /// Lane for one rate-limit bucket.
    #[must_use]
    pub fn bucket(route: &RouteKey) -> Self {
        Self(format!("bucket:{route}"))
    }

    /// Lane carrying inbound gateway events, in receipt order.
    #[must_use]
    pub fn events() -> Self {
        Self("gateway:events".to_string())
    }

    /// Lane for an arbitrary caller-chosen key.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Inner {
    lanes: Mutex<HashMap<LaneKey, mpsc::UnboundedSender<Job>>>,
    shutdown: CancellationToken,
    idle_timeout: Duration,
    failures: AtomicU64,
}

/// Executes units of work without blocking the submitter.
///
/// Cloning is cheap; clones share lanes and shutdown state.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("lanes", &self.lane_count())
            .field("failures", &self.failures())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    /// Create a scheduler with the default lane idle timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_LANE_IDLE)
    }

    /// Create a scheduler whose empty lanes exit after `idle_timeout`.
    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                idle_timeout,
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Run `fut` concurrently with everything else.
    ///
    /// The task stops early when the scheduler shuts down.
    pub fn spawn<F>(&self, label: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let shutdown = inner.shutdown.clone();
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = run_guarded(&inner, label, fut) => {}
            }
        })
    }

    /// Queue `fut` on the lane for `key`.
    ///
    /// Returns `false` if the scheduler has shut down and the work was
    /// discarded.
    pub fn spawn_serial<F>(&self, key: LaneKey, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        let job: Job = Box::pin(fut);
        let mut lanes = self.inner.lanes.lock();
        let job = if let Some(tx) = lanes.get(&key) {
            match tx.send(job) {
                Ok(()) => return true,
                Err(mpsc::error::SendError(job)) => job,
            }
        } else {
            job
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(job);
        lanes.insert(key.clone(), tx);
        drop(lanes);

        debug!(lane = %key, "lane started");
        tokio::spawn(run_lane(Arc::clone(&self.inner), key, rx));
        true
    }

    /// Number of live lanes.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.inner.lanes.lock().len()
    }

    /// Number of units of work that panicked.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Stop all lanes and detached tasks.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.lanes.lock().clear();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

async fn run_lane(inner: Arc<Inner>, key: LaneKey, mut rx: mpsc::UnboundedReceiver<Job>) {
    let shutdown = inner.shutdown.clone();
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = tokio::time::timeout(inner.idle_timeout, rx.recv()) => next,
        };

        match next {
            Ok(Some(job)) => {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = run_guarded(&inner, key.as_str(), job) => {}
                }
            }
            Ok(None) => break,
            Err(_) => {
                // Submitters send while holding the map lock, so an empty
                // queue observed under the lock stays empty.
                let mut lanes = inner.lanes.lock();
                if rx.is_empty() {
                    lanes.remove(&key);
                    debug!(lane = %key, "idle lane released");
                    break;
                }
            }
        }
    }
}

async fn run_guarded<F>(inner: &Inner, label: &str, fut: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        inner.failures.fetch_add(1, Ordering::SeqCst);
        error!(task = label, reason = panic_message(panic.as_ref()), "unit of work panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
