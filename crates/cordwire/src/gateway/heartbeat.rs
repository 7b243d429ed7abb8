//! Heartbeat acknowledgement tracking.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// What to do when the heartbeat interval elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Send a heartbeat.
    Send,
    /// The previous heartbeat was never acknowledged; the connection is dead.
    Missed,
}

/// Tracks heartbeats for one connection.
///
/// The ack timeout equals the interval: a heartbeat still unacknowledged one
/// full interval after it was sent is a failure. A beat the server asked for
/// shortly before a regular tick therefore gets its own interval to be
/// acknowledged.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    awaiting_ack: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl Heartbeat {
    /// Track heartbeats at `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            awaiting_ack: false,
            last_sent: None,
            latency: None,
        }
    }

    /// The negotiated interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// A ticker for this interval; the first tick fires one interval from now.
    #[must_use]
    pub fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Called when the interval elapses, with the instant the tick was due.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatTick {
        if self.awaiting_ack {
            let overdue = self
                .last_sent
                .is_none_or(|sent| now.saturating_duration_since(sent) >= self.interval);
            if overdue {
                return HeartbeatTick::Missed;
            }
            // Beat on schedule; the outstanding ack keeps its deadline.
            return HeartbeatTick::Send;
        }
        self.mark_sent(now);
        HeartbeatTick::Send
    }

    /// Record a heartbeat sent outside the regular schedule.
    ///
    /// An earlier unacknowledged heartbeat keeps its deadline.
    pub fn mark_sent(&mut self, now: Instant) {
        if !self.awaiting_ack {
            self.last_sent = Some(now);
        }
        self.awaiting_ack = true;
    }

    /// Called on a heartbeat acknowledgement.
    pub fn on_ack(&mut self, now: Instant) {
        self.awaiting_ack = false;
        self.latency = self.last_sent.map(|sent| now.saturating_duration_since(sent));
    }

    /// Whether a heartbeat is waiting for its ack.
    #[must_use]
    pub const fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Round-trip time of the last acknowledged heartbeat.
    #[must_use]
    pub const fn latency(&self) -> Option<Duration> {
        self.latency
    }
}
