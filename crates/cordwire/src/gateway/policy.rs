//! Reconnect ceiling over a sliding window, with exponential backoff.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Default number of attempts allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// Default delay before the second attempt in a window.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default upper bound for the backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Answer to a reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptDecision {
    /// Whether the attempt may proceed. A denial is fatal.
    pub allowed: bool,
    /// How long to wait before attempting. Zero when denied.
    pub delay: Duration,
    /// Attempts inside the window, this one included.
    pub attempts: usize,
}

/// Calculate the un-jittered backoff for the `n`th attempt in a window.
///
/// The first attempt goes out immediately; each later one doubles the delay,
/// starting from `initial`, up to `max`.
#[must_use]
pub fn calculate_backoff(n: usize, initial: Duration, max: Duration) -> Duration {
    if n <= 1 {
        return Duration::ZERO;
    }
    let exponent = u32::try_from(n - 2).unwrap_or(u32::MAX).min(31);
    initial.saturating_mul(1 << exponent).min(max)
}

/// Decides whether another connection attempt is permitted.
///
/// Attempts are timestamped into a log bounded to the window; an attempt is
/// allowed while the log, including it, holds at most `max_attempts`
/// entries. Denied attempts are not kept, so the window reopens once the
/// earliest allowed attempt ages out.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: usize,
    window: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    log: VecDeque<Instant>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW)
    }
}

impl ReconnectPolicy {
    /// Create a policy allowing `max_attempts` per `window`.
    #[must_use]
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            log: VecDeque::new(),
        }
    }

    /// Set the backoff range.
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Replace the thresholds. Recorded attempts are kept and judged against
    /// the new values from the next attempt on.
    pub fn configure(&mut self, max_attempts: usize, window: Duration) {
        self.max_attempts = max_attempts;
        self.window = window;
    }

    /// Maximum attempts per window.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Attempts currently recorded.
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.log.len()
    }

    /// Record an attempt now.
    pub fn attempt(&mut self) -> AttemptDecision {
        self.attempt_at(Instant::now())
    }

    /// Record an attempt at `now`.
    pub fn attempt_at(&mut self, now: Instant) -> AttemptDecision {
        let window = self.window;
        while self
            .log
            .front()
            .is_some_and(|&at| now.saturating_duration_since(at) >= window)
        {
            self.log.pop_front();
        }

        self.log.push_back(now);
        let attempts = self.log.len();
        if attempts > self.max_attempts {
            self.log.pop_back();
            return AttemptDecision {
                allowed: false,
                delay: Duration::ZERO,
                attempts,
            };
        }

        let base = calculate_backoff(attempts, self.initial_backoff, self.max_backoff);
        AttemptDecision {
            allowed: true,
            delay: base + jitter(base),
            attempts,
        }
    }
}

/// Up to a quarter of `base`, at random.
fn jitter(base: Duration) -> Duration {
    let spread = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
    if spread == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}
