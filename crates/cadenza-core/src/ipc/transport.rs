//! Initiator-side transport.
//!
//! Two call primitives over localhost TCP: an async call whose caller
//! suspends only at the await point, and a synchronous call that blocks
//! the calling thread until the responder replies inline. Each primitive
//! owns a dedicated connection; per-connection FIFO gives in-order
//! delivery per channel. There is no retry and no timeout: a hung
//! responder hangs the caller, and a consumer wanting a deadline must
//! wrap the call itself.

use super::codec;
use super::protocol::{
    read_frame, read_frame_blocking, write_frame, write_frame_blocking, Request, Response,
};
use crate::error::{CoreError, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Connection to the privileged responder process.
#[derive(Debug)]
pub struct Transport {
    /// Stream for the async call path, serialized across tasks.
    async_stream: Mutex<TcpStream>,
    /// Dedicated blocking stream for the sync call path.
    sync_stream: StdMutex<std::net::TcpStream>,
    next_id: AtomicU64,
    addr: SocketAddr,
}

impl Transport {
    /// Connect both call paths to a responder.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let async_stream = TcpStream::connect(addr).await?;
        async_stream.set_nodelay(true)?;

        let sync_stream = tokio::task::spawn_blocking(move || {
            let stream = std::net::TcpStream::connect(addr)?;
            stream.set_nodelay(true)?;
            Ok::<_, std::io::Error>(stream)
        })
        .await
        .map_err(|e| CoreError::Other(format!("connect task failed: {e}")))??;

        debug!("transport connected to {}", addr);

        Ok(Self {
            async_stream: Mutex::new(async_stream),
            sync_stream: StdMutex::new(sync_stream),
            next_id: AtomicU64::new(1),
            addr,
        })
    }

    /// Address of the connected responder.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Issue an asynchronous call and await its result.
    ///
    /// A reply matching the error envelope shape fails the call with the
    /// reconstructed [`RemoteError`](super::RemoteError) instead of
    /// returning the envelope as data.
    pub async fn send_async(&self, channel: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request_bytes = serde_json::to_vec(&Request::new(id, channel, args))?;

        let mut stream = self.async_stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &request_bytes).await?;
        let response_bytes = read_frame(&mut reader)
            .await?
            .ok_or(CoreError::ConnectionClosed)?;
        drop(stream);

        Self::interpret(id, &response_bytes)
    }

    /// Issue a synchronous call, blocking the calling thread until the
    /// responder replies inline.
    ///
    /// Used only for operations the initiator cannot proceed without,
    /// such as registering a collection before its first query. A
    /// `ProtocolError` reply (no handler registered) surfaces as an error
    /// the caller must treat as fatal to its code path.
    pub fn send_sync(&self, channel: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request_bytes = serde_json::to_vec(&Request::new(id, channel, args))?;

        let mut stream = self
            .sync_stream
            .lock()
            .map_err(|_| CoreError::Other("sync stream lock poisoned".to_string()))?;

        write_frame_blocking(&mut *stream, &request_bytes)?;
        let response_bytes =
            read_frame_blocking(&mut *stream)?.ok_or(CoreError::ConnectionClosed)?;
        drop(stream);

        Self::interpret(id, &response_bytes)
    }

    fn interpret(id: u64, response_bytes: &[u8]) -> Result<Value> {
        let response: Response = serde_json::from_slice(response_bytes)?;
        if response.id != id {
            return Err(CoreError::IdMismatch {
                expected: id,
                got: response.id,
            });
        }

        match codec::envelope_from_value(&response.body) {
            Some(remote) => Err(CoreError::Remote(remote)),
            None => Ok(response.body),
        }
    }
}
