//! Length-prefixed bincode framing.
//!
//! Each frame is a 4-byte big-endian body length followed by the bincode
//! encoding of exactly one [`Message`].

use harbor_messages::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::CodecError;

/// Largest frame body accepted by default (10 MiB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Serialize `message` and write it as one frame, then flush.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = bincode::serialize(message).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if body.len() > u32::MAX as usize {
        return Err(CodecError::FrameTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }
    let len_bytes = (body.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it. Frames larger than `max_size` are rejected
/// before the body is read.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Message, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let body_len = u32::from_be_bytes(len_buf) as usize;
    if body_len > max_size {
        return Err(CodecError::FrameTooLarge {
            size: body_len,
            max: max_size,
        });
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(|e| CodecError::Malformed(e.to_string()))
}
