//! Transport module for the relay connection.
//!
//! A session talks to the companion relay over one message-oriented
//! connection. The connection is split into two halves so the input
//! forwarder and the flusher can own them independently:
//!
//! - [`FrameSource`]: inbound frames whose payload goes to the shell
//! - [`FrameSink`]: outbound text frames carrying batched shell output
//!
//! [`Dialer`] opens a [`Connection`] for a relay URL built by
//! [`RelayEndpoint::url_for`].

pub mod websocket;

use std::fmt;
use std::future::Future;
use std::net::Ipv6Addr;
use std::pin::Pin;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use url::Url;

use crate::session::SessionKey;

pub use websocket::WebSocketDialer;

/// Errors raised by a transport connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The relay URL could not be built.
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    /// The connection is closed and can no longer carry frames.
    #[error("connection closed")]
    Closed,

    /// WebSocket protocol or I/O error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::InvalidUrl(err.to_string())
    }
}

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Receiving half of a relay connection.
pub trait FrameSource: Send {
    /// Receives the payload of the next data frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    /// Control frames are handled internally and never surface here.
    fn recv(&mut self) -> TransportFuture<'_, Option<Vec<u8>>>;
}

/// Sending half of a relay connection.
pub trait FrameSink: Send {
    /// Sends one text frame.
    fn send_text(&mut self, text: String) -> TransportFuture<'_, ()>;

    /// Closes the connection. Calling it more than once is harmless.
    fn close(&mut self) -> TransportFuture<'_, ()>;
}

/// An established relay connection, split into its two halves.
pub struct Connection {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens relay connections.
pub trait Dialer: Send + Sync {
    /// Connects to the given relay URL.
    fn dial<'a>(&'a self, url: &'a Url) -> TransportFuture<'a, Connection>;
}

/// Address of the relay that sessions connect to.
///
/// Built once from configuration and the discovered host address, then
/// handed to every session establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    /// URL scheme, `ws` or `wss`.
    pub scheme: String,
    /// Host name or IP address of the relay.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// First path segment before the session identifiers.
    pub path_prefix: String,
}

impl RelayEndpoint {
    /// Creates an endpoint with the default `container` path prefix.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            path_prefix: "container".to_string(),
        }
    }

    /// Builds `<scheme>://<host>:<port>/<prefix>/<task_manager_id>/<session_id>`.
    ///
    /// Identifiers are pushed as path segments, so characters such as `/`
    /// are percent-encoded rather than changing the path structure.
    pub fn url_for(&self, key: &SessionKey) -> Result<Url, TransportError> {
        let host = if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        let mut url = Url::parse(&format!("{}://{}:{}/", self.scheme, host, self.port))?;
        let no_path = TransportError::InvalidUrl(format!("{} cannot carry a path", url));
        url.path_segments_mut()
            .map_err(|_| no_path)?
            .pop_if_empty()
            .push(&self.path_prefix)
            .push(key.task_manager_id())
            .push(key.session_id());

        Ok(url)
    }
}
