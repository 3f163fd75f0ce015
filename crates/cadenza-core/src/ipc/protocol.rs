//! Wire format and framing for the IPC channel.
//!
//! Every call is an ordered argument list addressed to a channel; every
//! reply is a single JSON value (which may be an error envelope, see
//! [`super::codec`]). Frames are a 4-byte big-endian length prefix
//! followed by the UTF-8 JSON payload:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Both async (tokio) and blocking (std) variants of the framing exist:
//! the blocking pair backs the transport's synchronous call path.

use crate::config::TransportConfig;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A call addressed to one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub channel: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(id: u64, channel: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            channel: channel.into(),
            args,
        }
    }
}

/// The reply to a [`Request`].
///
/// `body` is plain data unless it matches the error envelope shape, in
/// which case the receiving side reconstructs the failure instead of
/// returning the envelope as data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub body: Value,
}

fn check_len(len: usize) -> Result<()> {
    if len > TransportConfig::MAX_MESSAGE_SIZE {
        return Err(CoreError::Frame {
            message: format!(
                "frame size {} exceeds maximum {}",
                len,
                TransportConfig::MAX_MESSAGE_SIZE
            ),
        });
    }
    Ok(())
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed the connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(len)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking variant of [`read_frame`] for the synchronous call path.
pub fn read_frame_blocking<R: std::io::Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(len)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    Ok(Some(payload))
}

/// Blocking variant of [`write_frame`] for the synchronous call path.
pub fn write_frame_blocking<W: std::io::Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}
