//! Gateway connection lifecycle.
//!
//! One run loop per [`ConnectionController::connect`] owns the socket and is
//! the only writer of the connection state and session while it runs. It
//! opens the transport, waits for hello, identifies or resumes, heartbeats,
//! and on failure reconnects through the [`ReconnectPolicy`]. Events are
//! published on the scheduler's event lane so listeners see them in receipt
//! order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::events::GatewayEvent;
use super::frame::{EVENT_READY, EVENT_RESUMED, GatewayFrame, op};
use super::heartbeat::{Heartbeat, HeartbeatTick};
use super::policy::{AttemptDecision, ReconnectPolicy};
use super::session::Session;
use super::state::{AtomicConnectionState, ConnectionState};
use super::transport::{SocketConnection, SocketTransport};
use crate::error::{CordError, CordResult};
use crate::presence::Presence;
use crate::scheduler::{LaneKey, TaskScheduler};

/// How long a closing socket may take before it is abandoned.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a [`ConnectionController`].
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Token sent with identify and resume.
    pub token: String,
    /// Gateway intents bitfield.
    pub intents: u64,
    /// Reconnect ceiling.
    pub policy: ReconnectPolicy,
    /// Initial desired presence.
    pub presence: Presence,
}

impl ControllerOptions {
    /// Options for `token` with default policy and presence.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Set the intents bitfield.
    #[must_use]
    pub const fn with_intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the initial presence.
    #[must_use]
    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = presence;
        self
    }
}

type Callback = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

/// Event consumers.
#[derive(Default)]
struct Listeners {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<GatewayEvent>>>,
    callbacks: Mutex<Vec<Callback>>,
}

impl Listeners {
    fn deliver(&self, event: &GatewayEvent) {
        let callbacks = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(event);
        }
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// The presence the user wants, and whether the server may not have it.
#[derive(Debug)]
struct DesiredPresence {
    presence: Presence,
    unsent: bool,
}

/// A frame waiting to be written by the run loop.
struct Outbound {
    frame: GatewayFrame,
    done: oneshot::Sender<CordResult<()>>,
}

struct Shared {
    transport: Arc<dyn SocketTransport>,
    tasks: TaskScheduler,
    token: String,
    intents: u64,
    state: AtomicConnectionState,
    session: Mutex<Option<Session>>,
    presence: Mutex<DesiredPresence>,
    policy: Mutex<ReconnectPolicy>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    listeners: Arc<Listeners>,
}

impl Shared {
    fn transition(&self, to: ConnectionState) {
        let from = self.state.swap(to);
        if from != to {
            info!(from = %from, to = %to, "gateway state changed");
        }
    }

    fn publish(&self, event: GatewayEvent) {
        trace!(event = event.kind(), "publishing gateway event");
        let listeners = Arc::clone(&self.listeners);
        let queued = self.tasks.spawn_serial(LaneKey::events(), async move {
            listeners.deliver(&event);
        });
        if !queued {
            debug!("scheduler shut down, gateway event dropped");
        }
    }

    fn attempt(&self) -> AttemptDecision {
        let mut policy = self.policy.lock();
        let decision = policy.attempt();
        debug!(
            attempts = decision.attempts,
            max_attempts = policy.max_attempts(),
            allowed = decision.allowed,
            "connection attempt recorded"
        );
        decision
    }

    fn give_up(&self, decision: AttemptDecision) {
        let window = self.policy.lock().window();
        self.transition(ConnectionState::FatallyDisconnected);
        error!(
            attempts = decision.attempts,
            window = ?window,
            "reconnect attempts exhausted, giving up"
        );
        self.publish(GatewayEvent::FatallyDisconnected {
            attempts: decision.attempts,
            window,
        });
    }

    fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    fn seq(&self) -> Option<u64> {
        self.session.lock().as_ref().and_then(|s| s.seq)
    }

    /// The presence to identify with; identify delivers it.
    fn presence_for_identify(&self) -> Presence {
        let mut desired = self.presence.lock();
        desired.unsent = false;
        desired.presence.clone()
    }

    /// The desired presence, if a change has not reached the server.
    fn unsent_presence(&self) -> Option<Presence> {
        let desired = self.presence.lock();
        desired.unsent.then(|| desired.presence.clone())
    }

    /// A presence update went out; it settles the desired presence if it
    /// carried the latest one.
    fn presence_written(&self, payload: &serde_json::Value) {
        let mut desired = self.presence.lock();
        if desired.presence.to_payload() == *payload {
            desired.unsent = false;
        }
    }

    fn close_outbound(&self) {
        *self.outbound.lock() = None;
    }
}

struct RunHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Drives the gateway session.
///
/// Cloning is cheap; clones control the same connection.
#[derive(Clone)]
pub struct ConnectionController {
    shared: Arc<Shared>,
    run: Arc<Mutex<Option<RunHandle>>>,
}

impl fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.state())
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

impl ConnectionController {
    /// Create a disconnected controller.
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        tasks: TaskScheduler,
        options: ControllerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                tasks,
                token: options.token,
                intents: options.intents,
                state: AtomicConnectionState::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                presence: Mutex::new(DesiredPresence {
                    presence: options.presence,
                    unsent: false,
                }),
                policy: Mutex::new(options.policy),
                outbound: Mutex::new(None),
                listeners: Arc::new(Listeners::default()),
            }),
            run: Arc::new(Mutex::new(None)),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// The resumable session, if one exists.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.shared.session.lock().clone()
    }

    /// The desired presence. It may not be visible remotely yet.
    #[must_use]
    pub fn presence(&self) -> Presence {
        self.shared.presence.lock().presence.clone()
    }

    /// Replace the desired presence.
    ///
    /// Sending it on a live session is the caller's job. A change the
    /// server has not seen when a session next becomes live is sent then:
    /// with identify, or as a presence update right after resuming or after
    /// a READY that raced the change.
    pub fn set_presence(&self, presence: Presence) {
        let mut desired = self.shared.presence.lock();
        desired.presence = presence;
        desired.unsent = true;
    }

    /// Change the reconnect ceiling for subsequent attempts.
    ///
    /// Both opening a connection and identifying on it count as attempts,
    /// so a healthy connect uses two; a resume uses one.
    pub fn set_reconnect_ratelimit(&self, max_attempts: usize, window: Duration) {
        self.shared.policy.lock().configure(max_attempts, window);
    }

    /// Connection attempts the reconnect policy currently holds in its window.
    #[must_use]
    pub fn reconnect_attempts(&self) -> usize {
        self.shared.policy.lock().recorded()
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GatewayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.subscribers.lock().push(tx);
        rx
    }

    /// Call `callback` for every event published from now on.
    pub fn on<F>(&self, callback: F)
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.callbacks.lock().push(Arc::new(callback));
    }

    /// Start connecting. Does nothing if a run loop is already active.
    ///
    /// Also the only way out of [`ConnectionState::FatallyDisconnected`].
    /// Attempts recorded by the policy are kept.
    pub fn connect(&self) {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(|r| !r.join.is_finished()) {
            debug!("connect ignored, already running");
            return;
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let join = self.shared.tasks.spawn("gateway", async move {
            drive(&shared, &token).await;
        });
        *run = Some(RunHandle { cancel, join });
    }

    /// Close the connection and discard the session.
    ///
    /// Always ends in [`ConnectionState::Disconnected`], whatever the state
    /// before.
    pub async fn disconnect(&self) {
        let run = self.run.lock().take();
        if let Some(run) = run {
            run.cancel.cancel();
            if let Err(e) = run.join.await {
                warn!(error = %e, "gateway run loop ended abnormally");
            }
        }

        self.shared.close_outbound();
        *self.shared.session.lock() = None;
        self.shared.transition(ConnectionState::Disconnected);
        self.shared.publish(GatewayEvent::Disconnected);
    }

    /// Send a frame on the live session.
    ///
    /// # Errors
    ///
    /// Returns [`CordError::NotConnected`] unless the session is connected,
    /// or if the connection drops before the frame is written.
    pub async fn send(&self, frame: GatewayFrame) -> CordResult<()> {
        let tx = self
            .shared
            .outbound
            .lock()
            .clone()
            .ok_or(CordError::NotConnected)?;
        let (done, rx) = oneshot::channel();
        tx.send(Outbound { frame, done })
            .map_err(|_| CordError::NotConnected)?;
        rx.await.unwrap_or(Err(CordError::NotConnected))
    }
}

/// Why a connection ended.
enum ConnectionEnd {
    /// Lost; reconnect.
    Dropped(String),
    /// The policy refused a transition.
    Fatal(AttemptDecision),
    /// `disconnect()` was called.
    Canceled,
}

/// Where the connection stands after hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Identifying,
    Resuming,
    Connected,
}

async fn drive(shared: &Shared, cancel: &CancellationToken) {
    let mut last_drop: Option<String> = None;

    loop {
        let resume = shared.has_session();
        shared.transition(if resume {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let decision = shared.attempt();
        if !decision.allowed {
            shared.give_up(decision);
            return;
        }
        if let Some(reason) = last_drop.take() {
            shared.publish(GatewayEvent::Reconnecting {
                reason,
                delay: decision.delay,
                resume,
            });
        }
        if !decision.delay.is_zero() {
            debug!(delay = ?decision.delay, attempts = decision.attempts, "backing off");
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(decision.delay) => {}
            }
        }

        match run_connection(shared, cancel, resume).await {
            ConnectionEnd::Canceled => return,
            ConnectionEnd::Fatal(decision) => {
                shared.give_up(decision);
                return;
            }
            ConnectionEnd::Dropped(reason) => {
                warn!(%reason, "gateway connection lost");
                last_drop = Some(reason);
            }
        }
    }
}

async fn run_connection(
    shared: &Shared,
    cancel: &CancellationToken,
    resume: bool,
) -> ConnectionEnd {
    let opened = tokio::select! {
        () = cancel.cancelled() => return ConnectionEnd::Canceled,
        opened = shared.transport.open() => opened,
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(e) => return ConnectionEnd::Dropped(e.to_string()),
    };

    let end = run_session(shared, cancel, conn.as_mut(), resume).await;
    shared.close_outbound();
    if tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await.is_err() {
        debug!("socket close timed out");
    }
    end
}

async fn send_frame(conn: &mut dyn SocketConnection, frame: &GatewayFrame) -> CordResult<()> {
    conn.send(frame.to_json()?).await
}

/// Enter identifying and send identify with the current presence.
async fn begin_identify(
    shared: &Shared,
    conn: &mut dyn SocketConnection,
) -> Result<(), ConnectionEnd> {
    shared.transition(ConnectionState::Identifying);
    let decision = shared.attempt();
    if !decision.allowed {
        return Err(ConnectionEnd::Fatal(decision));
    }
    let presence = shared.presence_for_identify();
    let identify = GatewayFrame::identify(&shared.token, shared.intents, &presence);
    send_frame(conn, &identify)
        .await
        .map_err(|e| ConnectionEnd::Dropped(e.to_string()))
}

async fn await_hello(
    cancel: &CancellationToken,
    conn: &mut dyn SocketConnection,
) -> Result<Duration, ConnectionEnd> {
    let received = tokio::select! {
        () = cancel.cancelled() => return Err(ConnectionEnd::Canceled),
        received = conn.recv() => received,
    };
    match received {
        Some(Ok(text)) => GatewayFrame::from_json(&text)
            .and_then(|frame| frame.heartbeat_interval())
            .map_err(|e| ConnectionEnd::Dropped(e.to_string())),
        Some(Err(e)) => Err(ConnectionEnd::Dropped(e.to_string())),
        None => Err(ConnectionEnd::Dropped("closed before hello".to_string())),
    }
}

async fn run_session(
    shared: &Shared,
    cancel: &CancellationToken,
    conn: &mut dyn SocketConnection,
    resume: bool,
) -> ConnectionEnd {
    let interval = match await_hello(cancel, conn).await {
        Ok(interval) => interval,
        Err(end) => return end,
    };
    debug!(interval = ?interval, "hello received");
    let mut heartbeat = Heartbeat::new(interval);
    let mut ticker = heartbeat.ticker();

    let mut phase = if resume {
        let session = shared.session.lock().clone();
        let Some(session) = session else {
            return ConnectionEnd::Dropped("session vanished before resume".to_string());
        };
        let frame = GatewayFrame::resume(&shared.token, &session.session_id, session.seq);
        if let Err(e) = send_frame(conn, &frame).await {
            return ConnectionEnd::Dropped(e.to_string());
        }
        shared.transition(ConnectionState::Resuming);
        Phase::Resuming
    } else {
        if let Err(end) = begin_identify(shared, conn).await {
            return end;
        }
        Phase::Identifying
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    loop {
        tokio::select! {
            () = cancel.cancelled() => return ConnectionEnd::Canceled,

            due = ticker.tick() => match heartbeat.on_tick(due) {
                HeartbeatTick::Send => {
                    trace!("sending heartbeat");
                    if let Err(e) = send_frame(conn, &GatewayFrame::heartbeat(shared.seq())).await {
                        return ConnectionEnd::Dropped(e.to_string());
                    }
                }
                HeartbeatTick::Missed => {
                    return ConnectionEnd::Dropped("heartbeat not acknowledged".to_string());
                }
            },

            Some(outbound) = outbound_rx.recv() => {
                let result = send_frame(conn, &outbound.frame).await;
                if result.is_ok() && outbound.frame.op == op::PRESENCE_UPDATE {
                    shared.presence_written(&outbound.frame.d);
                }
                let failed = result.as_ref().err().map(ToString::to_string);
                let _ = outbound.done.send(result);
                if let Some(reason) = failed {
                    return ConnectionEnd::Dropped(reason);
                }
            }

            received = conn.recv() => {
                let text = match received {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => return ConnectionEnd::Dropped(e.to_string()),
                    None => return ConnectionEnd::Dropped("closed by remote".to_string()),
                };
                let frame = match GatewayFrame::from_json(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "ignoring malformed gateway frame");
                        continue;
                    }
                };

                match frame.op {
                    op::DISPATCH => {
                        if let Some(next) = handle_dispatch(shared, phase, frame) {
                            if next == Phase::Connected && phase != Phase::Connected {
                                if let Some(presence) = shared.unsent_presence() {
                                    debug!("sending presence changed while the session was down");
                                    let update = GatewayFrame::presence_update(&presence);
                                    if let Err(e) = send_frame(conn, &update).await {
                                        return ConnectionEnd::Dropped(e.to_string());
                                    }
                                    shared.presence_written(&update.d);
                                }
                                *shared.outbound.lock() = Some(outbound_tx.clone());
                            }
                            phase = next;
                        }
                    }
                    op::HEARTBEAT => {
                        heartbeat.mark_sent(Instant::now());
                        if let Err(e) = send_frame(conn, &GatewayFrame::heartbeat(shared.seq())).await {
                            return ConnectionEnd::Dropped(e.to_string());
                        }
                    }
                    op::HEARTBEAT_ACK => heartbeat.on_ack(Instant::now()),
                    op::RECONNECT => {
                        return ConnectionEnd::Dropped("server requested reconnect".to_string());
                    }
                    op::INVALID_SESSION => match phase {
                        Phase::Resuming => {
                            info!("resume rejected, identifying");
                            *shared.session.lock() = None;
                            if let Err(end) = begin_identify(shared, conn).await {
                                return end;
                            }
                            phase = Phase::Identifying;
                        }
                        Phase::Identifying => {
                            return ConnectionEnd::Dropped("identify rejected".to_string());
                        }
                        Phase::Connected => {
                            *shared.session.lock() = None;
                            return ConnectionEnd::Dropped("session invalidated".to_string());
                        }
                    },
                    other => trace!(op = other, "ignoring gateway opcode"),
                }
            }
        }
    }
}

/// Apply a dispatch; returns the new phase if it changed.
fn handle_dispatch(shared: &Shared, phase: Phase, frame: GatewayFrame) -> Option<Phase> {
    let GatewayFrame { d, s, t, .. } = frame;
    let name = t.unwrap_or_default();

    if name == EVENT_READY {
        let Some(session_id) = d.get("session_id").and_then(|v| v.as_str()) else {
            warn!("READY without session id");
            return None;
        };
        *shared.session.lock() = Some(Session::new(session_id, s));
        shared.transition(ConnectionState::Connected);
        shared.publish(GatewayEvent::Ready {
            session_id: session_id.to_string(),
        });
        return Some(Phase::Connected);
    }

    if let Some(seq) = s {
        if let Some(session) = shared.session.lock().as_mut() {
            session.observe(seq);
        }
    }

    if name == EVENT_RESUMED {
        if phase != Phase::Resuming {
            debug!("unexpected RESUMED");
        }
        shared.transition(ConnectionState::Connected);
        shared.publish(GatewayEvent::Resumed);
        return Some(Phase::Connected);
    }

    shared.publish(GatewayEvent::Dispatch {
        name,
        seq: s,
        data: d,
    });
    None
}
