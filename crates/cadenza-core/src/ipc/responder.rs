//! Responder-side handler registry and server loop.
//!
//! The privileged process registers at most one handler per channel,
//! then starts the listener. Each connection runs in its own task and
//! processes requests strictly in arrival order, which gives the
//! per-channel ordering guarantee for a single initiator connection.
//!
//! An async handler failure is caught and marshaled into an error
//! envelope reply. A missing handler or a failing sync handler is a
//! protocol error: it indicates a wiring defect, is logged at error
//! level, and is reported to the initiator as a `ProtocolError` envelope
//! rather than a result.

use super::codec::{self, RemoteError};
use super::protocol::{read_frame, write_frame, Request, Response};
use crate::config::TransportConfig;
use crate::error::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

type AsyncHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, RemoteError>> + Send + Sync>;
type SyncHandler =
    Arc<dyn Fn(Vec<Value>) -> std::result::Result<Value, RemoteError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    async_handlers: HashMap<String, AsyncHandler>,
    sync_handlers: HashMap<String, SyncHandler>,
}

/// Handle to a running responder. Dropping shuts it down.
pub struct ResponderHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ResponderHandle {
    /// Address the responder is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the responder is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting new connections and signal active ones to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for ResponderHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Builder-style responder: register handlers, then start the listener.
#[derive(Default)]
pub struct Responder {
    registry: Registry,
}

impl Responder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate an async handler with a channel.
    ///
    /// A failure returned by the handler is marshaled into an error
    /// envelope reply instead of crossing the boundary unhandled.
    /// Registering a second handler for the same channel replaces the
    /// first and logs a warning.
    pub fn register_async_handler<F, Fut>(&mut self, channel: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, RemoteError>> + Send + 'static,
    {
        let channel = channel.into();
        self.warn_if_registered(&channel);
        self.registry.async_handlers.insert(
            channel,
            Arc::new(
                move |args| -> BoxFuture<'static, std::result::Result<Value, RemoteError>> {
                    Box::pin(handler(args))
                },
            ),
        );
    }

    /// Associate a synchronous handler with a channel.
    ///
    /// Sync handlers serve the initiator's blocking call path and are
    /// expected to be infallible in normal operation; a failure here is
    /// treated as a fatal protocol error, not a recoverable condition.
    pub fn register_sync_handler<F>(&mut self, channel: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, RemoteError> + Send + Sync + 'static,
    {
        let channel = channel.into();
        self.warn_if_registered(&channel);
        self.registry.sync_handlers.insert(channel, Arc::new(handler));
    }

    fn warn_if_registered(&self, channel: &str) {
        if self.registry.async_handlers.contains_key(channel)
            || self.registry.sync_handlers.contains_key(channel)
        {
            warn!(channel, "replacing existing handler");
        }
    }

    /// Bind `127.0.0.1` on the given port (0 = OS-assigned) and start
    /// serving in background tasks.
    pub async fn start(self) -> Result<ResponderHandle> {
        self.start_on(0).await
    }

    /// Bind a specific port and start serving.
    pub async fn start_on(self, port: u16) -> Result<ResponderHandle> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;

        info!("responder listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(self.registry);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            registry,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(ResponderHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        registry: Arc<Registry>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("responder shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            // Reserve the slot in one atomic step so
                            // concurrent accepts cannot overshoot the cap.
                            let previous = active_connections.fetch_add(1, Ordering::Relaxed);
                            if previous >= TransportConfig::MAX_CONNECTIONS {
                                active_connections.fetch_sub(1, Ordering::Relaxed);
                                warn!(
                                    "rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    TransportConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            let registry = registry.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("connection from {}", peer_addr);
                                if let Err(e) =
                                    Self::handle_connection(stream, &registry, &mut conn_shutdown).await
                                {
                                    debug!("connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        registry: &Registry,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.split();

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()), // Clean disconnect
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            let response = Self::process_request(&frame, registry).await;
            let response_bytes = serde_json::to_vec(&response)?;
            write_frame(&mut writer, &response_bytes).await?;
        }
    }

    async fn process_request(frame: &[u8], registry: &Registry) -> Response {
        let request: Request = match serde_json::from_slice(frame) {
            Ok(req) => req,
            Err(e) => {
                error!("malformed request frame: {}", e);
                let envelope = codec::marshal(&RemoteError::new(
                    "ProtocolError",
                    format!("malformed request: {e}"),
                ));
                return Response {
                    id: 0,
                    body: serde_json::to_value(envelope).unwrap_or(Value::Null),
                };
            }
        };

        let id = request.id;
        debug!(channel = %request.channel, id, "dispatching");

        let body = if let Some(handler) = registry.async_handlers.get(&request.channel) {
            match handler(request.args).await {
                Ok(value) => value,
                Err(remote) => {
                    debug!(channel = %request.channel, error = %remote, "handler failed");
                    envelope_value(&remote)
                }
            }
        } else if let Some(handler) = registry.sync_handlers.get(&request.channel) {
            match handler(request.args) {
                Ok(value) => value,
                Err(remote) => {
                    // Sync handlers back the initiator's blocking path;
                    // a failure here is a wiring defect, not a runtime
                    // condition to recover from.
                    error!(channel = %request.channel, error = %remote, "sync handler failed");
                    envelope_value(&RemoteError::new(
                        "ProtocolError",
                        format!("sync handler for {:?} failed: {remote}", request.channel),
                    ))
                }
            }
        } else {
            error!(channel = %request.channel, "no handler registered");
            envelope_value(&RemoteError::new(
                "ProtocolError",
                format!("no handler registered for channel {:?}", request.channel),
            ))
        };

        Response { id, body }
    }
}

fn envelope_value(remote: &RemoteError) -> Value {
    serde_json::to_value(codec::marshal(remote)).unwrap_or(Value::Null)
}
