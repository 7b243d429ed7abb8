//! Per-bucket request rate limiting.
//!
//! Commands are queued on the bucket their [`RouteKey`](crate::route::RouteKey)
//! maps to. The [`RatelimitScheduler`] drains each bucket through an abstract
//! [`CommandTransport`], folding the server's limit reports back into the
//! [`BucketRegistry`] and retrying over-limit answers transparently.

mod bucket;
mod handle;
mod http;
mod scheduler;
mod transport;

pub use bucket::{Acquire, BucketRegistry, BucketState, GlobalLock};
pub use handle::{CompletionHandle, PendingRequest};
pub use http::{
    HEADER_GLOBAL, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET_AFTER, HttpTransport,
    parse_ratelimit_headers, too_many_requests,
};
pub use scheduler::RatelimitScheduler;
pub use transport::{
    CommandResponse, CommandTransport, MAX_RATELIMIT_DELAY, RatelimitHeaders, TransportError,
};
