//! Frame codec for the IPC wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ type(1B) │   msgpack payload      │
//! │ u32 BE   │ u8       │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(type byte) + sizeof(payload), NOT including the 4-byte prefix.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Message type: request from client.
pub const MSG_REQUEST: u8 = 0x01;
/// Message type: response to client.
pub const MSG_RESPONSE: u8 = 0x02;
/// Message type: error response to client.
pub const MSG_ERROR: u8 = 0xFF;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Bytes,
}

fn invalid(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

/// Read one frame from the stream.
///
/// Returns `None` on clean EOF. `max_frame_bytes` caps the accepted frame size.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> std::io::Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(invalid(format!("frame too large: {} bytes", frame_len)));
    }
    if frame_len < 1 {
        return Err(invalid("frame too short: missing type byte".to_string()));
    }

    let mut frame_data = BytesMut::zeroed(frame_len as usize);
    reader.read_exact(&mut frame_data).await?;

    let mut payload = frame_data.freeze();
    let msg_type = payload[0];
    let payload = payload.split_off(1);
    Ok(Some(Frame { msg_type, payload }))
}

/// Encode a frame into a contiguous buffer (length prefix included).
pub fn encode_frame(msg_type: u8, payload: &[u8]) -> std::io::Result<Bytes> {
    let frame_len = u32::try_from(payload.len() + 1)
        .map_err(|_| invalid(format!("payload too large: {} bytes", payload.len())))?;
    let mut buf = BytesMut::with_capacity(4 + frame_len as usize);
    buf.put_u32(frame_len);
    buf.put_u8(msg_type);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Write one frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let frame = encode_frame(msg_type, payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode a JSON value to named msgpack.
pub fn encode_msgpack(value: &serde_json::Value) -> std::io::Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| {
        tracing::error!("msgpack encoding failed: {}", e);
        invalid(e.to_string())
    })
}
