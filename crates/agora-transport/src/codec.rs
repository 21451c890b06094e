//! Length-prefixed JSON framing
//!
//! Wire format: `[4-byte big-endian length][JSON body]`.

use crate::error::{TransportError, TransportResult};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes
pub const FRAME_HEADER_SIZE_BYTES: usize = 4;

/// Encode one frame (header + body)
pub fn encode_frame<T: Serialize>(value: &T, frame_size_bytes_max: usize) -> TransportResult<Vec<u8>> {
    let body = serde_json::to_vec(value).map_err(|e| TransportError::codec(e.to_string()))?;
    if body.len() > frame_size_bytes_max {
        return Err(TransportError::FrameTooLarge {
            size: body.len(),
            limit: frame_size_bytes_max,
        });
    }

    let len = u32::try_from(body.len()).map_err(|_| TransportError::FrameTooLarge {
        size: body.len(),
        limit: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE_BYTES + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one frame and flush
pub async fn write_frame<W, T>(
    writer: &mut W,
    value: &T,
    frame_size_bytes_max: usize,
) -> TransportResult<()>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + Sync,
{
    let frame = encode_frame(value, frame_size_bytes_max)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame
///
/// Returns `Ok(None)` when the peer closed the stream between frames. A body
/// that is not valid JSON yields a codec error; the stream stays aligned on
/// the next frame boundary, so the caller may keep reading.
pub async fn read_frame<R, T>(reader: &mut R, frame_size_bytes_max: usize) -> TransportResult<Option<T>>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned,
{
    let mut header = [0u8; FRAME_HEADER_SIZE_BYTES];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > frame_size_bytes_max {
        // The body is not consumed, so the stream cannot be resynchronized
        return Err(TransportError::io(format!(
            "inbound frame of {} bytes exceeds limit of {} bytes",
            len, frame_size_bytes_max
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| TransportError::codec(e.to_string()))
}
