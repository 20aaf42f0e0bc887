//! Coordination store wire protocol
//!
//! Frames are a 4-byte big-endian length prefix followed by a bincode body.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SharedError, SharedResult};

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreRequest {
    SetValue { key: String, value: String },
    GetValue { key: String },
    Delete { key: String },
    AddToSet { key: String, member: String },
    RemoveFromSet { key: String, member: String },
    Members { key: String },
    AppendToLog { key: String, entry: String },
    ReadLog { key: String },
    SetExpiry { key: String, ttl_ms: u64 },
    Increment { key: String, by: i64 },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreResponse {
    Ok,
    Value(Option<String>),
    Flag(bool),
    Members(Vec<String>),
    Log(Vec<String>),
    Counter(i64),
    Error(String),
}

/// Write one length-prefixed bincode frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(message)?;
    if data.len() > MAX_FRAME_LEN {
        return Err(SharedError::protocol(format!("Frame too large: {} bytes", data.len())));
    }

    let len = data.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| SharedError::unavailable(format!("Write length failed: {e}")))?;
    writer
        .write_all(&data)
        .await
        .map_err(|e| SharedError::unavailable(format!("Write data failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| SharedError::unavailable(format!("Flush failed: {e}")))?;
    Ok(())
}

/// Read one frame; `Ok(None)` means the peer closed the connection cleanly
pub async fn read_frame<R, T>(reader: &mut R) -> SharedResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(SharedError::unavailable(format!("Read length failed: {e}"))),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SharedError::protocol(format!("Frame too large: {len} bytes")));
    }

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| SharedError::unavailable(format!("Read data failed: {e}")))?;

    Ok(Some(bincode::deserialize(&data)?))
}
