//! Length-prefixed frame codec.
//!
//! Every message travels as a u32 big-endian length followed by that many
//! bytes of UTF-8 JSON. The prefix keeps message boundaries intact over a
//! byte stream, which is all the protocol asks of its transport.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Upper bound on a single frame. A shopping list is tiny; anything near
/// this limit is a protocol violation, not data.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Serialize one message and write it as a single frame.
pub async fn write_frame<W, T>(io: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::Oversized(body.len()));
    }
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    io.write_all(&frame).await?;
    io.flush().await?;
    Ok(())
}

/// Read one frame and deserialize it.
///
/// A clean EOF before or inside a frame reports [`ProtocolError::Closed`].
pub async fn read_frame<R, T>(io: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    read_exact_or_closed(io, &mut prefix).await?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::Oversized(len));
    }
    let mut body = vec![0u8; len];
    read_exact_or_closed(io, &mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn read_exact_or_closed<R>(io: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match io.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Closed),
        Err(err) => Err(err.into()),
    }
}
