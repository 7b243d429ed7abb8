//! Command transport that writes gateway-scoped commands to the live session.

use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::controller::ConnectionController;
use super::frame::GatewayFrame;
use crate::error::CordError;
use crate::ratelimit::{CommandResponse, CommandTransport, RatelimitHeaders, TransportError};
use crate::route::{Command, GatewayCommand, RouteKey};

/// Default number of gateway commands per window.
pub const DEFAULT_COMMANDS_PER_WINDOW: u32 = 5;

/// Default command window.
pub const DEFAULT_COMMAND_WINDOW: Duration = Duration::from_secs(60);

/// Status reported for a command deferred to the next identify.
pub const STATUS_DEFERRED: u16 = 202;

/// Send timestamps within the window.
#[derive(Debug)]
struct SlidingWindow {
    timestamps: VecDeque<Instant>,
    window_size: Duration,
    max_requests: u32,
}

impl SlidingWindow {
    fn new(max_requests: u32, window_size: Duration) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(max_requests as usize + 1),
            window_size,
            max_requests,
        }
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window_size;
        while self
            .timestamps
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= window)
        {
            self.timestamps.pop_front();
        }
    }

    fn record(&mut self, now: Instant) {
        self.prune(now);
        self.timestamps.push_back(now);
    }

    /// The window's state in the form the bucket registry understands.
    fn headers(&mut self, now: Instant) -> RatelimitHeaders {
        self.prune(now);
        let used = u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX);
        RatelimitHeaders {
            remaining: Some(self.max_requests.saturating_sub(used)),
            limit: Some(self.max_requests),
            // A slot frees up when the oldest send leaves the window.
            reset_at: self.timestamps.front().map(|&t| t + self.window_size),
            global: false,
        }
    }
}

/// Routes gateway commands (presence updates) onto the controller's session.
///
/// The session has no server-reported limits, so the transport keeps its own
/// budget and reports it as rate-limit headers; the ratelimit scheduler then
/// throttles gateway commands exactly like REST ones. A command issued while
/// the session is down is reported as accepted: the desired state it carries
/// is re-sent by the next identify.
#[derive(Debug)]
pub struct GatewayCommandTransport {
    controller: ConnectionController,
    window: Mutex<SlidingWindow>,
}

impl GatewayCommandTransport {
    /// Create a transport with the default budget.
    #[must_use]
    pub fn new(controller: ConnectionController) -> Self {
        Self::with_budget(controller, DEFAULT_COMMANDS_PER_WINDOW, DEFAULT_COMMAND_WINDOW)
    }

    /// Create a transport allowing `per_window` commands per `window`.
    #[must_use]
    pub fn with_budget(controller: ConnectionController, per_window: u32, window: Duration) -> Self {
        Self {
            controller,
            window: Mutex::new(SlidingWindow::new(per_window, window)),
        }
    }

    async fn write(&self, command: &GatewayCommand) -> Result<CommandResponse, TransportError> {
        let frame = GatewayFrame::new(command.op, command.data.clone());
        match self.controller.send(frame).await {
            Ok(()) => {
                let now = Instant::now();
                let mut window = self.window.lock();
                window.record(now);
                Ok(CommandResponse::ok().with_ratelimit(window.headers(now)))
            }
            Err(CordError::NotConnected) => {
                debug!(op = command.op, "not connected, deferring to next identify");
                let headers = self.window.lock().headers(Instant::now());
                let mut response = CommandResponse::ok().with_ratelimit(headers);
                response.status = STATUS_DEFERRED;
                Ok(response)
            }
            Err(e) => Err(TransportError::Failed(e.to_string())),
        }
    }
}

impl CommandTransport for GatewayCommandTransport {
    fn send<'a>(
        &'a self,
        _route: &'a RouteKey,
        command: &'a Command,
    ) -> BoxFuture<'a, Result<CommandResponse, TransportError>> {
        Box::pin(async move {
            match command {
                Command::Gateway(gateway) => self.write(gateway).await,
                Command::Rest(rest) => Err(TransportError::Failed(format!(
                    "{} {} cannot be sent over the gateway",
                    rest.method, rest.path
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_reports_remaining() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(5, Duration::from_secs(60));
        let empty = window.headers(start);
        assert_eq!(empty.remaining, Some(5));
        assert!(empty.reset_at.is_none());

        window.record(start);
        window.record(start + Duration::from_secs(10));
        let headers = window.headers(start + Duration::from_secs(10));
        assert_eq!(headers.remaining, Some(3));
        assert_eq!(headers.limit, Some(5));
        assert_eq!(headers.reset_at, Some(start + Duration::from_secs(60)));
    }

    #[test]
    fn test_window_expires_old_sends() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2, Duration::from_secs(60));
        window.record(start);
        window.record(start + Duration::from_secs(30));
        assert_eq!(window.headers(start + Duration::from_secs(30)).remaining, Some(0));

        let later = window.headers(start + Duration::from_secs(60));
        assert_eq!(later.remaining, Some(1));
        assert_eq!(later.reset_at, Some(start + Duration::from_secs(90)));
    }
}
