//! In-process relay fabric.
//!
//! Implements the relay client traits over [`tokio::io::duplex`] pipes so
//! the conformance suite and the integration tests can run without a live
//! relay deployment. Contracts match the external library: `accept_stream`
//! drains to `None` after close, endpoint create/delete/exists semantics are
//! enforced, and request routing picks the control or rendezvous path by
//! body size.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{
    ChannelPath, ConnectionStatus, ListenerOptions, RelayClient, RelayError, RelayListener,
    RelayNamespace, RelayRequest, RelayResponse, RelayStream, RequestHandler, StatusHandler,
};

/// Per-direction buffer of a loopback stream.
const STREAM_BUFFER_BYTES: usize = 64 * 1024;

/// Bodies above this size are served over the rendezvous path.
const RENDEZVOUS_THRESHOLD_BYTES: usize = 16 * 1024;

/// Backlog of accepted-but-unclaimed streams per listener.
const ACCEPT_BACKLOG: usize = 16;

type HandlerSlot = Arc<StdMutex<Option<RequestHandler>>>;

/// Listener-side hooks stored in the endpoint registry while a listener is
/// open. Dropping them closes the accept channel.
#[derive(Clone)]
struct ListenerHooks {
    streams: mpsc::Sender<Box<dyn RelayStream>>,
    handler: HandlerSlot,
}

#[derive(Default)]
struct EndpointSlot {
    hooks: Option<ListenerHooks>,
}

/// An in-memory relay namespace.
#[derive(Default)]
pub struct LoopbackRelay {
    endpoints: Arc<Mutex<HashMap<String, EndpointSlot>>>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelayNamespace for LoopbackRelay {
    async fn endpoint_exists(&self, path: &str) -> Result<bool, RelayError> {
        Ok(self.endpoints.lock().await.contains_key(path))
    }

    async fn create_endpoint(&self, path: &str) -> Result<(), RelayError> {
        let mut endpoints = self.endpoints.lock().await;
        if endpoints.contains_key(path) {
            return Err(RelayError::EndpointExists(path.to_string()));
        }
        endpoints.insert(path.to_string(), EndpointSlot::default());
        debug!(path = %path, "endpoint created");
        Ok(())
    }

    async fn delete_endpoint(&self, path: &str) -> Result<(), RelayError> {
        let mut endpoints = self.endpoints.lock().await;
        match endpoints.remove(path) {
            Some(_) => {
                debug!(path = %path, "endpoint deleted");
                Ok(())
            }
            None => Err(RelayError::EndpointNotFound(path.to_string())),
        }
    }

    async fn open_listener(
        &self,
        path: &str,
        options: ListenerOptions,
        timeout: Duration,
    ) -> Result<Arc<dyn RelayListener>, RelayError> {
        let open = async {
            let mut endpoints = self.endpoints.lock().await;

            let created_dynamic = if !endpoints.contains_key(path) {
                if !options.dynamic_endpoint {
                    return Err(RelayError::EndpointNotFound(path.to_string()));
                }
                endpoints.insert(path.to_string(), EndpointSlot::default());
                true
            } else {
                false
            };

            let slot = endpoints
                .get_mut(path)
                .ok_or_else(|| RelayError::EndpointNotFound(path.to_string()))?;
            if slot.hooks.is_some() {
                return Err(RelayError::ListenerActive(path.to_string()));
            }

            let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
            let handler: HandlerSlot = Arc::new(StdMutex::new(None));
            slot.hooks = Some(ListenerHooks {
                streams: tx,
                handler: handler.clone(),
            });

            debug!(path = %path, created_dynamic, "listener open");
            Ok(Arc::new(LoopbackListener {
                path: path.to_string(),
                endpoints: Arc::clone(&self.endpoints),
                inbound: Mutex::new(rx),
                handler,
                status: StdMutex::new(None),
                online: AtomicBool::new(true),
                created_dynamic,
            }) as Arc<dyn RelayListener>)
        };

        tokio::time::timeout(timeout, open)
            .await
            .map_err(|_| RelayError::Timeout(timeout))?
    }

    async fn connect_client(&self, path: &str) -> Result<Arc<dyn RelayClient>, RelayError> {
        if !self.endpoints.lock().await.contains_key(path) {
            return Err(RelayError::EndpointNotFound(path.to_string()));
        }
        Ok(Arc::new(LoopbackClient {
            path: path.to_string(),
            endpoints: Arc::clone(&self.endpoints),
        }))
    }
}

/// Listener half of a loopback endpoint.
pub struct LoopbackListener {
    path: String,
    endpoints: Arc<Mutex<HashMap<String, EndpointSlot>>>,
    inbound: Mutex<mpsc::Receiver<Box<dyn RelayStream>>>,
    handler: HandlerSlot,
    status: StdMutex<Option<StatusHandler>>,
    online: AtomicBool,
    /// The endpoint was registered by this listener and is removed on close.
    created_dynamic: bool,
}

impl LoopbackListener {
    fn emit_status(&self, status: ConnectionStatus) {
        let handler = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(status);
        }
    }
}

#[async_trait]
impl RelayListener for LoopbackListener {
    async fn accept_stream(&self) -> Result<Option<Box<dyn RelayStream>>, RelayError> {
        Ok(self.inbound.lock().await.recv().await)
    }

    fn set_request_handler(&self, handler: RequestHandler) {
        *self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    fn set_status_handler(&self, handler: StatusHandler) {
        let current = if self.online.load(Ordering::SeqCst) {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        handler(current);
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    async fn close(&self, timeout: Duration) -> Result<(), RelayError> {
        let close = async {
            let mut endpoints = self.endpoints.lock().await;
            if let Some(slot) = endpoints.get_mut(&self.path) {
                // Dropping the hooks drops the accept-channel sender, which
                // drains pending accept_stream calls to None.
                slot.hooks = None;
            }
            if self.created_dynamic {
                endpoints.remove(&self.path);
                debug!(path = %self.path, "dynamic endpoint removed on close");
            }
        };

        tokio::time::timeout(timeout, close)
            .await
            .map_err(|_| RelayError::Timeout(timeout))?;

        self.online.store(false, Ordering::SeqCst);
        self.emit_status(ConnectionStatus::Offline);
        debug!(path = %self.path, "listener closed");
        Ok(())
    }
}

/// Client half of a loopback endpoint.
pub struct LoopbackClient {
    path: String,
    endpoints: Arc<Mutex<HashMap<String, EndpointSlot>>>,
}

impl LoopbackClient {
    async fn hooks(&self) -> Result<ListenerHooks, RelayError> {
        let endpoints = self.endpoints.lock().await;
        let slot = endpoints
            .get(&self.path)
            .ok_or_else(|| RelayError::EndpointNotFound(self.path.clone()))?;
        slot.hooks.clone().ok_or(RelayError::ListenerClosed)
    }
}

#[async_trait]
impl RelayClient for LoopbackClient {
    async fn create_stream(&self) -> Result<Box<dyn RelayStream>, RelayError> {
        let hooks = self.hooks().await?;

        let (client_io, listener_io) = tokio::io::duplex(STREAM_BUFFER_BYTES);
        let tracking_id = uuid::Uuid::new_v4().to_string();

        let listener_end: Box<dyn RelayStream> =
            Box::new(LoopbackStream::new(listener_io, tracking_id.clone()));
        hooks
            .streams
            .send(listener_end)
            .await
            .map_err(|_| RelayError::ListenerClosed)?;

        debug!(path = %self.path, tracking_id = %tracking_id, "stream connected");
        Ok(Box::new(LoopbackStream::new(client_io, tracking_id)))
    }

    async fn request(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let hooks = self.hooks().await?;
        let handler = hooks
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(RelayError::NoHandler)?;

        let request_len = request.body.len();
        let mut response = handler(request).await;

        response.via = if request_len > RENDEZVOUS_THRESHOLD_BYTES
            || response.body.len() > RENDEZVOUS_THRESHOLD_BYTES
        {
            ChannelPath::Rendezvous
        } else {
            ChannelPath::Control
        };

        debug!(
            path = %self.path,
            status = response.status,
            via = %response.via,
            "request served"
        );
        Ok(response)
    }
}

/// One end of a loopback duplex stream.
pub struct LoopbackStream {
    io: DuplexStream,
    tracking_id: String,
}

impl LoopbackStream {
    fn new(io: DuplexStream, tracking_id: String) -> Self {
        Self { io, tracking_id }
    }
}

impl RelayStream for LoopbackStream {
    fn tracking_id(&self) -> &str {
        &self.tracking_id
    }
}

impl AsyncRead for LoopbackStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for LoopbackStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
