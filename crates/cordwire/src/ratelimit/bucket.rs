//! Client-side rate-limit state per route, plus the global lock.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ratelimit::handle::PendingRequest;
use crate::ratelimit::transport::{MAX_RATELIMIT_DELAY, RatelimitHeaders};
use crate::route::RouteKey;

/// Tracked state of one bucket.
#[derive(Debug)]
struct Bucket {
    remaining: Option<u32>,
    limit: Option<u32>,
    reset_at: Option<Instant>,
    pending: VecDeque<PendingRequest>,
    dispatching: bool,
    last_used: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self {
            remaining: None,
            limit: None,
            reset_at: None,
            pending: VecDeque::new(),
            dispatching: false,
            last_used: now,
        }
    }

    /// Refill an expired window from the known limit.
    fn refresh(&mut self, now: Instant) {
        if self.reset_at.is_some_and(|reset| now >= reset) {
            self.reset_at = None;
            self.remaining = self.limit;
        }
    }

    fn snapshot(&self) -> BucketState {
        BucketState {
            remaining: self.remaining,
            limit: self.limit,
            reset_at: self.reset_at,
            pending: self.pending.len(),
            dispatching: self.dispatching,
        }
    }
}

/// A point-in-time view of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Requests left in the window; `None` until the server reports it.
    pub remaining: Option<u32>,
    /// Window size; `None` until the server reports it.
    pub limit: Option<u32>,
    /// When the window resets.
    pub reset_at: Option<Instant>,
    /// Requests waiting in the queue.
    pub pending: usize,
    /// Whether a dispatch loop currently owns the bucket.
    pub dispatching: bool,
}

impl BucketState {
    /// Whether the server has reported limits for this bucket.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some()
    }
}

/// Service-wide throttle overriding every bucket while active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalLock {
    resume_at: Option<Instant>,
}

impl GlobalLock {
    /// Whether the lock holds at `now`.
    #[must_use]
    pub fn is_active(&self, now: Instant) -> bool {
        self.resume_at.is_some_and(|resume| now < resume)
    }

    /// When requests may resume, if the lock was armed.
    #[must_use]
    pub const fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    fn arm(&mut self, until: Instant) {
        // Never shorten an armed lock.
        if self.resume_at.is_none_or(|current| until > current) {
            self.resume_at = Some(until);
        }
    }
}

/// Outcome of asking a bucket for permission to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Dispatch now; one unit of `remaining` has been consumed.
    Ready,
    /// Check again at the given instant.
    WaitUntil(Instant),
}

/// Maps routes to their bucket state.
///
/// Only the ratelimit scheduler mutates the registry, and it runs at most
/// one dispatch loop per bucket.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: Mutex<HashMap<RouteKey, Bucket>>,
    global: Mutex<GlobalLock>,
}

impl BucketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The state of the bucket for `route`, created on first use.
    pub fn resolve(&self, route: &RouteKey) -> BucketState {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        buckets
            .entry(route.clone())
            .or_insert_with(|| Bucket::new(now))
            .snapshot()
    }

    /// Number of tracked buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether no bucket is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// The current global lock.
    #[must_use]
    pub fn global_lock(&self) -> GlobalLock {
        *self.global.lock()
    }

    /// Fold a server response into the bucket.
    ///
    /// A response whose reset lies before the bucket's current, still
    /// pending reset is older than the state already applied and is
    /// ignored.
    pub fn apply_response(&self, route: &RouteKey, headers: &RatelimitHeaders, now: Instant) {
        if headers.global {
            if let Some(reset_at) = headers.reset_at {
                if headers.remaining == Some(0) {
                    warn!(route = %route, "global ratelimit reported");
                    self.global.lock().arm(reset_at);
                }
            }
        }

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(route.clone())
            .or_insert_with(|| Bucket::new(now));
        bucket.last_used = now;

        if let (Some(incoming), Some(current)) = (headers.reset_at, bucket.reset_at) {
            if incoming < current && current > now {
                debug!(route = %route, "ignoring stale ratelimit headers");
                return;
            }
        }

        if headers.limit.is_some() {
            bucket.limit = headers.limit;
        }
        if headers.remaining.is_some() {
            bucket.remaining = headers.remaining;
        }
        if headers.reset_at.is_some() {
            bucket.reset_at = headers.reset_at;
        }

        debug!(
            route = %route,
            remaining = ?bucket.remaining,
            limit = ?bucket.limit,
            "bucket updated"
        );
    }

    /// Record an explicit over-limit answer from the server.
    pub fn apply_too_many_requests(
        &self,
        route: &RouteKey,
        retry_after: Duration,
        global: bool,
        now: Instant,
    ) {
        let until = now
            .checked_add(retry_after.min(MAX_RATELIMIT_DELAY))
            .unwrap_or(now);
        if global {
            self.global.lock().arm(until);
        }

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(route.clone())
            .or_insert_with(|| Bucket::new(now));
        bucket.remaining = Some(0);
        bucket.reset_at = Some(until);
        bucket.last_used = now;
    }

    /// Ask whether one request may be dispatched on `route` at `now`.
    ///
    /// Buckets whose limits are still unknown are treated as having one
    /// request left. This avoids a round-trip before the first request of a
    /// kind, at the price of one possible over-limit answer if the true limit
    /// is zero.
    pub fn acquire(&self, route: &RouteKey, now: Instant) -> Acquire {
        {
            let mut global = self.global.lock();
            if let Some(resume) = global.resume_at {
                if now < resume {
                    return Acquire::WaitUntil(resume);
                }
                global.resume_at = None;
                debug!("global ratelimit lifted");
            }
        }

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(route.clone())
            .or_insert_with(|| Bucket::new(now));
        bucket.refresh(now);
        bucket.last_used = now;

        match (bucket.remaining, bucket.reset_at) {
            (Some(0), Some(reset)) => Acquire::WaitUntil(reset),
            (Some(0), None) => {
                // Exhausted without a reset time: nothing to wait for.
                bucket.remaining = None;
                Acquire::Ready
            }
            (Some(left), _) => {
                bucket.remaining = Some(left.saturating_sub(1));
                Acquire::Ready
            }
            (None, _) => Acquire::Ready,
        }
    }

    /// Queue a request; returns `true` if the caller must start a dispatch
    /// loop for the bucket.
    pub(crate) fn enqueue(&self, route: &RouteKey, request: PendingRequest) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(route.clone())
            .or_insert_with(|| Bucket::new(now));
        bucket.pending.push_back(request);
        bucket.last_used = now;
        if bucket.dispatching {
            false
        } else {
            bucket.dispatching = true;
            true
        }
    }

    /// Take the next queued request, or release the bucket's dispatch loop
    /// when the queue is empty.
    pub(crate) fn next_pending(&self, route: &RouteKey) -> Option<PendingRequest> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.get_mut(route)?;
        let next = bucket.pending.pop_front();
        if next.is_none() {
            bucket.dispatching = false;
        }
        next
    }

    /// Drain every queued request of `route`, releasing its dispatch loop.
    pub(crate) fn take_pending(&self, route: &RouteKey) -> Vec<PendingRequest> {
        let mut buckets = self.buckets.lock();
        buckets.get_mut(route).map_or_else(Vec::new, |bucket| {
            bucket.dispatching = false;
            bucket.pending.drain(..).collect()
        })
    }

    /// Drain the queues of every bucket, releasing all dispatch loops.
    pub(crate) fn take_all_pending(&self) -> Vec<PendingRequest> {
        let mut buckets = self.buckets.lock();
        buckets
            .values_mut()
            .flat_map(|bucket| {
                bucket.dispatching = false;
                bucket.pending.drain(..)
            })
            .collect()
    }

    /// Forget buckets idle for at least `idle_for`. Returns how many were
    /// dropped.
    pub fn evict_idle(&self, idle_for: Duration, now: Instant) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket.dispatching
                || !bucket.pending.is_empty()
                || now.saturating_duration_since(bucket.last_used) < idle_for
        });
        before - buckets.len()
    }
}
