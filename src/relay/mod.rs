//! Client surface of the external relay library.
//!
//! The relay wire protocol -- token acquisition, control-channel and
//! rendezvous negotiation, the listener and client session objects -- lives
//! in an external client library. This module defines the trait boundary the
//! rest of the tool programs against: namespace endpoint lifecycle, listener
//! accept/close, client streams, and request/response exchange. The
//! [`loopback`] module provides an in-process implementation of the same
//! traits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod loopback;

/// Errors surfaced by the relay client library.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay endpoint '{0}' not found")]
    EndpointNotFound(String),

    #[error("relay endpoint '{0}' already exists")]
    EndpointExists(String),

    #[error("a listener is already open on '{0}'")]
    ListenerActive(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("listener is closed")]
    ListenerClosed,

    #[error("no request handler installed on listener")]
    NoHandler,

    #[error("request failed with status {0}")]
    Status(u16),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection state changes reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Online,
    Offline,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Online => write!(f, "online"),
            ConnectionStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Which transport path served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPath {
    /// Persistent lightweight connection for small request/response traffic.
    Control,
    /// Dedicated connection negotiated on demand for larger payloads.
    Rendezvous,
}

impl fmt::Display for ChannelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelPath::Control => write!(f, "control"),
            ChannelPath::Rendezvous => write!(f, "rendezvous"),
        }
    }
}

/// A request issued through the relay.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub body: Bytes,
}

impl RelayRequest {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }
}

/// A response produced by the listener's request handler.
///
/// `via` is filled in by the transport, not the handler.
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Bytes,
    pub via: ChannelPath,
}

impl RelayResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            via: ChannelPath::Control,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Handler invoked for each request arriving at a listener.
pub type RequestHandler =
    Arc<dyn Fn(RelayRequest) -> BoxFuture<'static, RelayResponse> + Send + Sync>;

/// Handler invoked on connection state changes.
pub type StatusHandler = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Options for opening a listener.
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Bind the endpoint dynamically for the lifetime of the listener.
    /// When the endpoint is known to pre-exist, callers request a
    /// non-dynamic binding instead.
    pub dynamic_endpoint: bool,
}

/// An open duplex byte-stream session tunneled through the relay.
pub trait RelayStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Transport-assigned id for correlating both ends in traces.
    fn tracking_id(&self) -> &str;
}

/// A relay namespace: a named remote service boundary hosting zero or more
/// addressable endpoints.
#[async_trait]
pub trait RelayNamespace: Send + Sync {
    async fn endpoint_exists(&self, path: &str) -> Result<bool, RelayError>;

    async fn create_endpoint(&self, path: &str) -> Result<(), RelayError>;

    async fn delete_endpoint(&self, path: &str) -> Result<(), RelayError>;

    /// Open a listener on an endpoint, bounded by `timeout`.
    async fn open_listener(
        &self,
        path: &str,
        options: ListenerOptions,
        timeout: Duration,
    ) -> Result<Arc<dyn RelayListener>, RelayError>;

    /// Connect a client to an endpoint.
    async fn connect_client(&self, path: &str) -> Result<Arc<dyn RelayClient>, RelayError>;
}

/// Listener side of a relay endpoint.
#[async_trait]
pub trait RelayListener: Send + Sync {
    /// Accept the next inbound stream. Returns `Ok(None)` once the listener
    /// has shut down.
    async fn accept_stream(&self) -> Result<Option<Box<dyn RelayStream>>, RelayError>;

    /// Install the request handler. Replaces any previous handler.
    fn set_request_handler(&self, handler: RequestHandler);

    /// Install the status handler. The handler is immediately invoked with
    /// the current state so late subscribers observe it.
    fn set_status_handler(&self, handler: StatusHandler);

    /// Close the listener, bounded by `timeout`. After close, pending and
    /// future `accept_stream` calls resolve to `Ok(None)`.
    async fn close(&self, timeout: Duration) -> Result<(), RelayError>;
}

/// Client side of a relay endpoint.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Open a new duplex stream to the listener.
    async fn create_stream(&self) -> Result<Box<dyn RelayStream>, RelayError>;

    /// Issue a request and await the handler's response. Small bodies travel
    /// over the control channel; large ones over a rendezvous channel. The
    /// returned response records which path served it.
    async fn request(&self, request: RelayRequest) -> Result<RelayResponse, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionStatus::Online.to_string(), "online");
        assert_eq!(ConnectionStatus::Offline.to_string(), "offline");
    }

    #[test]
    fn test_channel_path_display() {
        assert_eq!(ChannelPath::Control.to_string(), "control");
        assert_eq!(ChannelPath::Rendezvous.to_string(), "rendezvous");
    }

    #[test]
    fn test_response_success_range() {
        assert!(RelayResponse::ok(Bytes::new()).is_success());
        assert!(RelayResponse::with_status(204, Bytes::new()).is_success());
        assert!(!RelayResponse::with_status(400, Bytes::new()).is_success());
        assert!(!RelayResponse::with_status(500, Bytes::new()).is_success());
    }

    #[test]
    fn test_listener_options_default_is_non_dynamic() {
        assert!(!ListenerOptions::default().dynamic_endpoint);
    }
}
