// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing: one message per read of up to [`MAX_MESSAGE_BYTES`] bytes.
//!
//! Deliberately not length-prefixed. The control plane reads a single
//! `recv(1024)`-sized chunk, decodes it as one JSON object, and writes a
//! single JSON reply before waiting on the next request. A [`Packet`] is
//! expected to fit in one read; callers that need to send larger payloads
//! (task bodies, logs) go through the object storage facade instead of the
//! control-plane socket.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::packet::Packet;

pub const MAX_MESSAGE_BYTES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("message exceeds {MAX_MESSAGE_BYTES} byte frame")]
    MessageTooLarge,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Encode a packet to the JSON bytes that go on the wire.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(packet)?;
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::MessageTooLarge);
    }
    Ok(bytes)
}

/// Decode one frame's worth of bytes into a packet. Trailing NUL padding
/// (present when the caller read a fixed-size buffer and didn't trim it)
/// is stripped before parsing.
pub fn decode(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    let trimmed = trim_trailing_zeros(bytes);
    Ok(serde_json::from_slice(trimmed)?)
}

fn trim_trailing_zeros(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Read exactly one frame from `reader` and decode it.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, ProtocolError> {
    let mut buf = vec![0u8; MAX_MESSAGE_BYTES];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    decode(&buf[..n])
}

/// Write one frame to `writer` and flush it.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), ProtocolError> {
    let bytes = encode(packet)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
