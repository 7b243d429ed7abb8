//! The client façade wiring the ratelimiter and the gateway together.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::entity::{Channel, EntityCache, Server, Snowflake};
use crate::error::CordResult;
use crate::gateway::frame::op;
use crate::gateway::{
    ConnectionController, ConnectionState, ControllerOptions, GatewayCommandTransport,
    GatewayEvent, Session, SocketTransport, WsTransport,
};
use crate::presence::{Game, Presence};
use crate::ratelimit::{
    CommandResponse, CommandTransport, CompletionHandle, HttpTransport, RatelimitScheduler,
    TransportError,
};
use crate::route::{Command, RouteKey};
use crate::scheduler::TaskScheduler;

/// Sends gateway routes over the session and everything else over REST.
struct RoutingTransport {
    rest: Arc<dyn CommandTransport>,
    gateway: Arc<dyn CommandTransport>,
}

impl CommandTransport for RoutingTransport {
    fn send<'a>(
        &'a self,
        route: &'a RouteKey,
        command: &'a Command,
    ) -> BoxFuture<'a, Result<CommandResponse, TransportError>> {
        if route.is_gateway() {
            self.gateway.send(route, command)
        } else {
            self.rest.send(route, command)
        }
    }
}

/// A bot client.
///
/// Commands go through a per-bucket ratelimiter; the gateway session is
/// kept alive by a connection controller. Both share one task scheduler.
pub struct Client {
    token: String,
    bucket_idle: Duration,
    tasks: TaskScheduler,
    ratelimit: RatelimitScheduler,
    gateway: ConnectionController,
    cache: Arc<EntityCache>,
    janitor_started: AtomicBool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("ratelimit", &self.ratelimit)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client talking to the configured websocket gateway and HTTP
    /// API.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ClientConfig) -> CordResult<Self> {
        config.validate()?;
        let socket = WsTransport::new(&config.gateway_url)?;
        let rest = HttpTransport::new(
            &config.api_base_url,
            authorization(&config.token),
            config.request_timeout(),
        )?;
        Ok(Self::with_transports(config, Arc::new(socket), Arc::new(rest)))
    }

    /// Build a client over the given transports.
    pub fn with_transports(
        config: &ClientConfig,
        socket: Arc<dyn SocketTransport>,
        rest: Arc<dyn CommandTransport>,
    ) -> Self {
        let tasks = TaskScheduler::with_idle_timeout(config.lane_idle());
        let options = ControllerOptions::new(config.token.clone())
            .with_intents(config.intents)
            .with_policy(config.reconnect.policy());
        let gateway = ConnectionController::new(socket, tasks.clone(), options);

        let commands = GatewayCommandTransport::with_budget(
            gateway.clone(),
            config.presence_limit.per_window,
            config.presence_window(),
        );
        let routing = RoutingTransport {
            rest,
            gateway: Arc::new(commands),
        };
        let ratelimit = RatelimitScheduler::new(Arc::new(routing), tasks.clone());

        let cache = Arc::new(EntityCache::new());
        let sink = Arc::clone(&cache);
        gateway.on(move |event| {
            if let GatewayEvent::Dispatch { name, data, .. } = event {
                sink.ingest(name, data);
            }
        });

        Self {
            token: config.token.clone(),
            bucket_idle: config.bucket_idle(),
            tasks,
            ratelimit,
            gateway,
            cache,
            janitor_started: AtomicBool::new(false),
        }
    }

    /// The token with its `Bot ` prefix, as sent in `Authorization` headers.
    #[must_use]
    pub fn token(&self) -> String {
        authorization(&self.token)
    }

    /// Queue a command. See [`RatelimitScheduler::submit`].
    pub fn submit(&self, command: Command) -> CompletionHandle {
        self.ratelimit.submit(command)
    }

    /// The ratelimiter, for inspecting bucket state.
    #[must_use]
    pub fn ratelimiter(&self) -> &RatelimitScheduler {
        &self.ratelimit
    }

    /// The gateway controller.
    #[must_use]
    pub fn gateway(&self) -> &ConnectionController {
        &self.gateway
    }

    /// Start connecting to the gateway.
    pub fn connect(&self) {
        self.start_janitor();
        self.gateway.connect();
    }

    /// Close the gateway connection. See [`ConnectionController::disconnect`].
    pub async fn disconnect(&self) {
        self.gateway.disconnect().await;
    }

    /// Disconnect, then cancel every queued command and stop all background
    /// work. The client cannot be used afterwards.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.ratelimit.shutdown();
        info!("client shut down");
    }

    /// Current gateway state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.gateway.state()
    }

    /// The resumable session, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.gateway.session()
    }

    /// Change the reconnect ceiling; see [`crate::gateway::ReconnectPolicy`].
    ///
    /// A fresh connection costs two attempts, one to open and one to
    /// identify; a resume costs one.
    pub fn set_reconnect_ratelimit(&self, max_attempts: usize, window_secs: u64) {
        self.gateway
            .set_reconnect_ratelimit(max_attempts, Duration::from_secs(window_secs));
    }

    /// Receive gateway events.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GatewayEvent> {
        self.gateway.subscribe()
    }

    /// Call `callback` for every gateway event.
    pub fn on<F>(&self, callback: F)
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.gateway.on(callback);
    }

    /// The desired presence.
    #[must_use]
    pub fn presence(&self) -> Presence {
        self.gateway.presence()
    }

    /// The desired game. It may not be visible to others yet.
    #[must_use]
    pub fn game(&self) -> Option<Game> {
        self.presence().game
    }

    /// Replace the presence.
    ///
    /// The update is a ratelimited command: it may be delayed but is never
    /// dropped, and if the session is down the next identify carries it.
    pub fn update_presence(&self, presence: Presence) -> CompletionHandle {
        let payload = presence.to_payload();
        self.gateway.set_presence(presence);
        self.ratelimit
            .submit(Command::gateway(op::PRESENCE_UPDATE, payload))
    }

    /// Show "Playing `name`", or clear the game with `None`.
    pub fn update_game(&self, name: Option<&str>) -> CompletionHandle {
        let mut presence = self.presence();
        presence.game = name.map(Game::playing);
        self.update_presence(presence)
    }

    /// Show "Streaming `name`" linking to `url`.
    pub fn update_streaming(&self, name: &str, url: &str) -> CompletionHandle {
        let mut presence = self.presence();
        presence.game = Some(Game::streaming(name, url));
        self.update_presence(presence)
    }

    /// The entity cache fed by gateway events.
    #[must_use]
    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// A server by id.
    #[must_use]
    pub fn server_by_id(&self, id: Snowflake) -> Option<Server> {
        self.cache.server_by_id(id)
    }

    /// A channel of any kind by id.
    #[must_use]
    pub fn channel_by_id(&self, id: Snowflake) -> Option<Channel> {
        self.cache.channel_by_id(id)
    }

    /// Periodically forget idle buckets.
    fn start_janitor(&self) {
        if self.janitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let ratelimit = self.ratelimit.clone();
        let idle = self.bucket_idle;
        self.tasks.spawn("bucket-janitor", async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + idle, idle);
            loop {
                ticker.tick().await;
                let evicted = ratelimit.registry().evict_idle(idle, Instant::now());
                if evicted > 0 {
                    debug!(evicted, "idle buckets released");
                }
            }
        });
    }
}

fn authorization(token: &str) -> String {
    format!("Bot {token}")
}
