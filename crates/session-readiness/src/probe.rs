//! Single-shot readiness checks against the worker's display endpoint.
//!
//! Every strategy reports `Result<(), ProbeError>` internally; [`probe`] is the
//! boundary that applies the hard deadline and folds every failure into
//! `false`. Sockets are owned by the strategy's future, so they are released
//! whether the check completes, fails or is dropped by the deadline.
//!
//! The strategies differ in how much they prove. [`TcpHandshakeProbe`] and
//! [`WebSocketProbe`] require the service to accept a connection (the latter
//! also requires it to complete the upgrade the embedded viewer performs).
//! [`HttpReachabilityProbe`] accepts any completed HTTP exchange, including
//! error statuses, so it can report ready while the display service is still
//! answering with a placeholder.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

pub const DEFAULT_PROBE_HOST: &str = "localhost";
pub const DEFAULT_PROBE_PORT: u16 = 5800;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Where the display service is expected to listen. Fixed for an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeTarget {
    host: String,
    port: u16,
    path: String,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self, scheme: &str) -> Result<url::Url, ProbeError> {
        let raw = format!("{scheme}://{}{}", self.authority(), self.path);
        url::Url::parse(&raw).map_err(|err| ProbeError::InvalidTarget(format!("{raw}: {err}")))
    }
}

impl Default for ProbeTarget {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_HOST, DEFAULT_PROBE_PORT)
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.authority(), self.path)
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe target {0}")]
    InvalidTarget(String),
    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no answer within {0:?}")]
    TimedOut(Duration),
}

impl ProbeError {
    fn kind(&self) -> &'static str {
        match self {
            ProbeError::InvalidTarget(_) => "invalid_target",
            ProbeError::Connect(_) => "connect",
            ProbeError::Handshake(_) => "handshake",
            ProbeError::Http(_) => "http",
            ProbeError::TimedOut(_) => "timeout",
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, target: &ProbeTarget) -> Result<(), ProbeError>;
}

/// Runs one check under a hard deadline measured from the call. Never fails:
/// refusal, transport errors and the deadline all yield `false`.
pub async fn probe(probe: &dyn Probe, target: &ProbeTarget, timeout: Duration) -> bool {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, probe.check(target)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::TimedOut(timeout)),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            counter!("readiness_probe_total", 1, "strategy" => probe.name(), "outcome" => "ready");
            debug!(
                target = "readiness.probe",
                strategy = probe.name(),
                endpoint = %target,
                elapsed_ms,
                "display endpoint ready"
            );
            true
        }
        Err(err) => {
            counter!("readiness_probe_total", 1, "strategy" => probe.name(), "outcome" => err.kind());
            debug!(
                target = "readiness.probe",
                strategy = probe.name(),
                endpoint = %target,
                elapsed_ms,
                error = %err,
                "display endpoint not ready"
            );
            false
        }
    }
}

/// Opens and immediately closes a TCP connection.
#[derive(Debug, Default, Clone)]
pub struct TcpHandshakeProbe;

#[async_trait]
impl Probe for TcpHandshakeProbe {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn check(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
        let mut stream = TcpStream::connect(target.authority()).await?;
        if let Err(err) = stream.shutdown().await {
            trace!(target = "readiness.probe", error = %err, "tcp shutdown after probe failed");
        }
        Ok(())
    }
}

/// Performs the WebSocket upgrade the embedded viewer would, then closes.
#[derive(Debug, Default, Clone)]
pub struct WebSocketProbe;

#[async_trait]
impl Probe for WebSocketProbe {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn check(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
        let url = target.url("ws")?;
        let (mut socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| ProbeError::Handshake(err.to_string()))?;
        if let Err(err) = socket.close(None).await {
            trace!(target = "readiness.probe", error = %err, "websocket close after probe failed");
        }
        Ok(())
    }
}

/// Treats any completed HTTP exchange as reachable, whatever the status code.
#[derive(Debug, Clone)]
pub struct HttpReachabilityProbe {
    client: reqwest::Client,
}

impl HttpReachabilityProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpReachabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for HttpReachabilityProbe {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn check(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
        let url = target.url("http")?;
        let response = self.client.get(url).send().await?;
        trace!(
            target = "readiness.probe",
            status = %response.status(),
            "http probe completed"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeStrategy {
    #[default]
    Tcp,
    #[serde(alias = "ws", alias = "websocket")]
    WebSocket,
    Http,
}

impl ProbeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeStrategy::Tcp => "tcp",
            ProbeStrategy::WebSocket => "web-socket",
            ProbeStrategy::Http => "http",
        }
    }

    pub fn build(self) -> Arc<dyn Probe> {
        match self {
            ProbeStrategy::Tcp => Arc::new(TcpHandshakeProbe),
            ProbeStrategy::WebSocket => Arc::new(WebSocketProbe),
            ProbeStrategy::Http => Arc::new(HttpReachabilityProbe::new()),
        }
    }
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(ProbeStrategy::Tcp),
            "ws" | "websocket" | "web-socket" => Ok(ProbeStrategy::WebSocket),
            "http" => Ok(ProbeStrategy::Http),
            other => Err(format!(
                "unknown probe strategy '{other}' (expected tcp, websocket or http)"
            )),
        }
    }
}
