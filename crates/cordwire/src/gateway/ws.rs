//! Websocket transport over `tokio-tungstenite`.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::error::{CordError, CordResult};
use crate::gateway::transport::{SocketConnection, SocketTransport};

/// Protocol version requested from the gateway.
pub const GATEWAY_VERSION: u8 = 6;

/// Connects to the gateway over a websocket.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    /// Create a transport for `gateway_url`, adding the version and encoding
    /// query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`CordError::Config`] for a malformed or non-websocket URL.
    pub fn new(gateway_url: &str) -> CordResult<Self> {
        let mut url = Url::parse(gateway_url)
            .map_err(|e| CordError::Config(format!("invalid gateway url {gateway_url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(CordError::Config(format!(
                "gateway url must use ws or wss, got {}",
                url.scheme()
            )));
        }
        url.query_pairs_mut()
            .append_pair("v", &GATEWAY_VERSION.to_string())
            .append_pair("encoding", "json");
        Ok(Self { url })
    }

    /// The URL connections are opened to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl SocketTransport for WsTransport {
    fn open(&self) -> BoxFuture<'_, CordResult<Box<dyn SocketConnection>>> {
        Box::pin(async move {
            debug!(url = %self.url, "opening gateway socket");
            let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| CordError::Gateway(format!("connect failed: {e}")))?;
            Ok(Box::new(WsConnection { stream }) as Box<dyn SocketConnection>)
        })
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SocketConnection for WsConnection {
    fn send(&mut self, frame: String) -> BoxFuture<'_, CordResult<()>> {
        Box::pin(async move {
            self.stream
                .send(Message::text(frame))
                .await
                .map_err(|e| CordError::Gateway(format!("write failed: {e}")))
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<CordResult<String>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "gateway closed the socket");
                        return None;
                    }
                    Ok(other) => {
                        // Ping/pong are answered by tungstenite; binary is unused.
                        trace!(len = other.len(), "ignoring non-text frame");
                    }
                    Err(e) => return Some(Err(CordError::Gateway(format!("read failed: {e}")))),
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.stream.close(None).await;
        })
    }
}
