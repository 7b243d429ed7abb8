//! Dispatches queued commands against their buckets.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::error::{CordError, CordResult};
use crate::ratelimit::bucket::{Acquire, BucketRegistry, BucketState};
use crate::ratelimit::handle::{CompletionHandle, PendingRequest};
use crate::ratelimit::transport::{CommandResponse, CommandTransport, TransportError};
use crate::route::{Command, RouteKey};
use crate::scheduler::{LaneKey, TaskScheduler};

struct Inner {
    registry: BucketRegistry,
    transport: Arc<dyn CommandTransport>,
    tasks: TaskScheduler,
}

/// Throttles outbound commands per bucket.
///
/// Each bucket is drained by at most one dispatch loop, running on the
/// bucket's serial lane of the shared [`TaskScheduler`], so a bucket has at
/// most one request in flight and sends in submission order. Unrelated
/// buckets drain in parallel.
#[derive(Clone)]
pub struct RatelimitScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for RatelimitScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatelimitScheduler")
            .field("buckets", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl RatelimitScheduler {
    /// Create a scheduler sending through `transport`.
    pub fn new(transport: Arc<dyn CommandTransport>, tasks: TaskScheduler) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: BucketRegistry::new(),
                transport,
                tasks,
            }),
        }
    }

    /// Queue `command` on the bucket its route maps to.
    pub fn submit(&self, command: Command) -> CompletionHandle {
        let route = command.route();
        self.submit_to(route, command)
    }

    /// Queue `command` on an explicit bucket.
    ///
    /// Never blocks; the returned handle resolves once the command has been
    /// sent, has failed, or was canceled.
    pub fn submit_to(&self, route: RouteKey, command: Command) -> CompletionHandle {
        let (request, handle) = PendingRequest::new(route.clone(), command);
        if self.inner.tasks.is_shut_down() {
            request.complete(Err(CordError::Canceled));
            return handle;
        }
        trace!(route = %route, "command queued");

        if self.inner.registry.enqueue(&route, request) {
            let inner = Arc::clone(&self.inner);
            let lane_route = route.clone();
            let started = self
                .inner
                .tasks
                .spawn_serial(LaneKey::bucket(&route), async move {
                    drain(&inner, &lane_route).await;
                });
            if !started {
                debug!(route = %route, "scheduler shut down, failing queued commands");
                for request in self.inner.registry.take_pending(&route) {
                    request.complete(Err(CordError::Canceled));
                }
            }
        }
        handle
    }

    /// The bucket state for `route`.
    pub fn bucket(&self, route: &RouteKey) -> BucketState {
        self.inner.registry.resolve(route)
    }

    /// Stop every dispatch loop and fail all queued commands with
    /// [`CordError::Canceled`].
    pub fn shutdown(&self) {
        self.inner.tasks.shutdown();
        let pending = self.inner.registry.take_all_pending();
        if !pending.is_empty() {
            debug!(count = pending.len(), "canceling queued commands");
        }
        for request in pending {
            request.complete(Err(CordError::Canceled));
        }
    }

    /// The shared bucket registry.
    #[must_use]
    pub fn registry(&self) -> &BucketRegistry {
        &self.inner.registry
    }
}

/// Send every queued request of `route`, one at a time.
///
/// A transport that panics fails only the command it was sending; the loop
/// keeps draining so the bucket never stays marked as dispatching.
async fn drain(inner: &Inner, route: &RouteKey) {
    while let Some(request) = inner.registry.next_pending(route) {
        let result = AssertUnwindSafe(dispatch(inner, route, &request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(route = %route, "transport panicked while sending");
                Err(CordError::Transport("transport panicked".to_string()))
            });
        request.complete(result);
    }
    debug!(route = %route, "bucket drained");
}

async fn dispatch(
    inner: &Inner,
    route: &RouteKey,
    request: &PendingRequest,
) -> CordResult<CommandResponse> {
    loop {
        if request.is_canceled() {
            debug!(route = %route, "skipping canceled command");
            return Err(CordError::Canceled);
        }

        if let Acquire::WaitUntil(at) = inner.registry.acquire(route, Instant::now()) {
            trace!(route = %route, wait = ?at.saturating_duration_since(Instant::now()), "bucket exhausted");
            tokio::time::sleep_until(at).await;
            continue;
        }

        match inner.transport.send(route, request.command()).await {
            Ok(response) => {
                inner
                    .registry
                    .apply_response(route, &response.ratelimit, Instant::now());
                if response.is_success() {
                    return Ok(response);
                }
                return Err(CordError::Status {
                    status: response.status,
                    message: response.failure_message(),
                });
            }
            Err(TransportError::TooManyRequests {
                retry_after,
                global,
            }) => {
                warn!(
                    route = %route,
                    retry_after = ?retry_after,
                    global,
                    "ratelimited, retrying"
                );
                inner
                    .registry
                    .apply_too_many_requests(route, retry_after, global, Instant::now());
            }
            Err(TransportError::Failed(reason)) => {
                debug!(route = %route, %reason, "command failed");
                return Err(CordError::Transport(reason));
            }
        }
    }
}
