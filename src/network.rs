//! Thin, uniform, replaceable transport: a REST request function
//! returning parsed JSON, and a duplex WebSocket assistant. Injectable so
//! the core can run against the mock server, a real exchange, or a host
//! environment's shared HTTP stack.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Error, Result};

/// REST + WebSocket transport contract. The default implementation wraps
/// `reqwest` and `tokio-tungstenite`; a host process may supply its own
/// implementation (e.g. sharing a connection pool already in use
/// elsewhere) as long as it honors this shape.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Issue a GET request with the given query parameters and return the
    /// decoded JSON body.
    async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value>;

    /// Open a duplex WebSocket connection to `url`. Returns a boxed sink
    /// half (accepts outgoing text frames) and a boxed stream half
    /// (yields decoded text frames, or transport errors).
    async fn ws_connect(&self, url: &str) -> Result<(WsSink, WsStream)>;
}

pub type WsStream = std::pin::Pin<Box<dyn Stream<Item = Result<WsFrame>> + Send>>;

/// A decoded frame as handed to adapters. Control frames (ping/pong/close)
/// are surfaced so the streaming strategy can react to them; adapters
/// only ever see `Text`.
#[derive(Debug, Clone)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// Outgoing half of a WebSocket connection.
#[async_trait]
pub trait WsSinkHandle: Send + Sync {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn send_ping(&mut self) -> Result<()>;
    async fn send_pong(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

pub type WsSink = Box<dyn WsSinkHandle>;

/// Default transport: `reqwest` for REST, `tokio-tungstenite` for
/// WebSocket. Timeouts are configurable; defaults favor never hanging
/// forever on a dead peer over squeezing out the last millisecond.
pub struct DefaultNetworkClient {
    http: reqwest::Client,
    rest_timeout: Duration,
    ws_open_timeout: Duration,
}

impl DefaultNetworkClient {
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(10), Duration::from_secs(10))
    }

    pub fn with_timeouts(rest_timeout: Duration, ws_open_timeout: Duration) -> Self {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        Self {
            http: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(rest_timeout)
                .build()
                .expect("failed to build HTTP client"),
            rest_timeout,
            ws_open_timeout,
        }
    }
}

impl Default for DefaultNetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkClient for DefaultNetworkClient {
    async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(Error::from)?;

        if resp.status().as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(Error::RateLimit {
                retry_after_secs: retry_after,
            });
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Protocol(format!("HTTP {status}: {body}")));
        }

        resp.json::<Value>().await.map_err(Error::from)
    }

    async fn ws_connect(&self, url: &str) -> Result<(WsSink, WsStream)> {
        let connect = tokio_tungstenite::connect_async(url);
        let (ws_stream, _resp) = tokio::time::timeout(self.ws_open_timeout, connect)
            .await
            .map_err(|_| Error::Transport("WebSocket open timed out".into()))?
            .map_err(Error::from)?;

        let (sink, stream) = ws_stream.split();

        let decoded = stream.map(|item| match item {
            Ok(WsMessage::Text(t)) => Ok(WsFrame::Text(t)),
            Ok(WsMessage::Binary(b)) => Ok(WsFrame::Binary(b)),
            Ok(WsMessage::Ping(_)) => Ok(WsFrame::Ping),
            Ok(WsMessage::Pong(_)) => Ok(WsFrame::Pong),
            Ok(WsMessage::Close(_)) => Ok(WsFrame::Close),
            Ok(WsMessage::Frame(_)) => Ok(WsFrame::Binary(Vec::new())),
            Err(e) => Err(Error::from(e)),
        });

        Ok((
            Box::new(TungsteniteSink(sink)),
            Box::pin(decoded) as WsStream,
        ))
    }
}

struct TungsteniteSink(
    futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        WsMessage,
    >,
);

#[async_trait]
impl WsSinkHandle for TungsteniteSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        use futures_util::SinkExt;
        self.0.send(WsMessage::Text(text)).await.map_err(Error::from)
    }

    async fn send_ping(&mut self) -> Result<()> {
        use futures_util::SinkExt;
        self.0
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(Error::from)
    }

    async fn send_pong(&mut self) -> Result<()> {
        use futures_util::SinkExt;
        self.0
            .send(WsMessage::Pong(Vec::new()))
            .await
            .map_err(Error::from)
    }

    async fn close(&mut self) -> Result<()> {
        use futures_util::SinkExt;
        self.0.close().await.map_err(Error::from)
    }
}
