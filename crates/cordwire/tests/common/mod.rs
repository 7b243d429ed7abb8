//! Shared test doubles: an in-memory gateway and a scripted REST service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cordwire::gateway::frame::op;
use cordwire::gateway::{GatewayFrame, SocketConnection, SocketTransport};
use cordwire::{
    Command, CommandResponse, CommandTransport, CordError, CordResult, GatewayEvent, RouteKey,
    TransportError,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

/// Upper bound for any single wait in a test. Time is usually paused, so
/// this only trips when something hangs.
pub const WAIT: Duration = Duration::from_secs(600);

// ============================================================================
// In-memory gateway
// ============================================================================

/// Hands out connections whose far end is a [`ServerSide`] owned by the test.
pub struct MockGateway {
    accepted: Mutex<Option<mpsc::UnboundedSender<ServerSide>>>,
    refuse: AtomicUsize,
    opened: AtomicUsize,
}

impl MockGateway {
    /// A gateway plus the receiver on which accepted connections arrive.
    pub fn new() -> (Arc<Self>, Acceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            accepted: Mutex::new(Some(tx)),
            refuse: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
        });
        (gateway, Acceptor { rx })
    }

    /// Fail the next `count` opens.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Connections opened so far, refused ones included.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SocketTransport for MockGateway {
    fn open(&self) -> BoxFuture<'_, CordResult<Box<dyn SocketConnection>>> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(CordError::Gateway("connection refused".to_string()));
            }

            let (to_client, from_server) = mpsc::unbounded_channel();
            let (to_server, from_client) = mpsc::unbounded_channel();
            let server = ServerSide {
                to_client: Some(to_client),
                from_client,
            };
            let accepted = self.accepted.lock().clone();
            match accepted {
                Some(tx) if tx.send(server).is_ok() => {}
                _ => return Err(CordError::Gateway("gateway gone".to_string())),
            }
            let conn: Box<dyn SocketConnection> = Box::new(MockConnection {
                to_server,
                from_server,
            });
            Ok(conn)
        })
    }
}

/// Receives the server side of each connection the client opens.
pub struct Acceptor {
    rx: mpsc::UnboundedReceiver<ServerSide>,
}

impl Acceptor {
    /// Wait for the client to open a connection.
    pub async fn accept(&mut self) -> ServerSide {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("no connection opened")
            .expect("gateway dropped")
    }
}

struct MockConnection {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
}

impl SocketConnection for MockConnection {
    fn send(&mut self, frame: String) -> BoxFuture<'_, CordResult<()>> {
        let sent = self
            .to_server
            .send(frame)
            .map_err(|_| CordError::Gateway("server hung up".to_string()));
        Box::pin(async move { sent })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<CordResult<String>>> {
        Box::pin(async move { self.from_server.recv().await.map(Ok) })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.from_server.close();
        Box::pin(async {})
    }
}

/// The gateway's end of one connection.
pub struct ServerSide {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerSide {
    /// Push a raw frame to the client.
    pub fn send(&self, frame: &GatewayFrame) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(frame.to_json().expect("frame serializes"));
        }
    }

    /// Send hello with the given heartbeat interval.
    pub fn hello(&self, interval_ms: u64) {
        self.send(&GatewayFrame::new(
            op::HELLO,
            json!({ "heartbeat_interval": interval_ms }),
        ));
    }

    /// Complete an identify with a READY for `session_id`.
    pub fn ready(&self, session_id: &str, seq: u64) {
        self.send(&GatewayFrame::dispatch(
            "READY",
            seq,
            json!({ "session_id": session_id, "v": 6 }),
        ));
    }

    /// Complete a resume.
    pub fn resumed(&self, seq: u64) {
        self.send(&GatewayFrame::dispatch("RESUMED", seq, json!({})));
    }

    /// Send an arbitrary dispatch.
    pub fn dispatch(&self, name: &str, seq: u64, data: Value) {
        self.send(&GatewayFrame::dispatch(name, seq, data));
    }

    /// Send a bare opcode.
    pub fn op(&self, code: u8, data: Value) {
        self.send(&GatewayFrame::new(code, data));
    }

    /// Stop delivering frames; the client sees the connection close.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next frame from the client, heartbeats included.
    pub async fn next_frame(&mut self) -> GatewayFrame {
        let text = timeout(WAIT, self.from_client.recv())
            .await
            .expect("client sent nothing")
            .expect("client closed the connection");
        GatewayFrame::from_json(&text).expect("client sent a valid frame")
    }

    /// Next frame from the client with opcode `code`, skipping heartbeats
    /// unless a heartbeat is what is expected.
    pub async fn expect_op(&mut self, code: u8) -> GatewayFrame {
        loop {
            let frame = self.next_frame().await;
            if frame.op == code {
                return frame;
            }
            assert_eq!(
                frame.op,
                op::HEARTBEAT,
                "expected op {code}, got {frame:?}"
            );
        }
    }

    /// Whether the client has closed its end.
    pub async fn is_closed(&mut self) -> bool {
        loop {
            match timeout(WAIT, self.from_client.recv()).await {
                Ok(Some(_)) => {}
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }
}

/// Wait for the first event matching `pred`, returning everything seen up to
/// and including it.
pub async fn wait_for<F>(
    events: &mut mpsc::UnboundedReceiver<GatewayEvent>,
    pred: F,
) -> Vec<GatewayEvent>
where
    F: Fn(&GatewayEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

// ============================================================================
// Scripted REST service
// ============================================================================

/// One request as the scripted service saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub route: RouteKey,
    pub command: Command,
    pub at: Instant,
}

type Handler = Box<dyn Fn(usize, Instant) -> Result<CommandResponse, TransportError> + Send + Sync>;

/// A command transport answering from a closure, with optional latency.
pub struct ScriptedRest {
    handler: Handler,
    latency: Duration,
    received: Mutex<Vec<Received>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    replies: Mutex<VecDeque<Result<CommandResponse, TransportError>>>,
}

impl ScriptedRest {
    /// Answer request `n` (zero-based) sent at `now` with `handler(n, now)`.
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(usize, Instant) -> Result<CommandResponse, TransportError> + Send + Sync + 'static,
    {
        Self::with_latency(Duration::ZERO, handler)
    }

    /// Like [`new`](Self::new), but every exchange takes `latency`.
    pub fn with_latency<F>(latency: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(usize, Instant) -> Result<CommandResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            latency,
            received: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            replies: Mutex::new(VecDeque::new()),
        })
    }

    /// Answer the next requests with `replies`, in order, before falling
    /// back to the handler.
    pub fn queue_replies(&self, replies: Vec<Result<CommandResponse, TransportError>>) {
        self.replies.lock().extend(replies);
    }

    /// Everything received so far.
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    /// Send times so far.
    pub fn sent_at(&self) -> Vec<Instant> {
        self.received.lock().iter().map(|r| r.at).collect()
    }

    /// Most requests ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CommandTransport for ScriptedRest {
    fn send<'a>(
        &'a self,
        route: &'a RouteKey,
        command: &'a Command,
    ) -> BoxFuture<'a, Result<CommandResponse, TransportError>> {
        Box::pin(async move {
            let now = Instant::now();
            let n = {
                let mut received = self.received.lock();
                received.push(Received {
                    route: route.clone(),
                    command: command.clone(),
                    at: now,
                });
                received.len() - 1
            };

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let queued = self.replies.lock().pop_front();
            queued.unwrap_or_else(|| (self.handler)(n, now))
        })
    }
}
