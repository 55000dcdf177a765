// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound request/reply helper shared by the dispatcher's and worker's
//! upward heartbeat clients: connect, write one frame, read the reply,
//! close. Every tick opens a fresh connection rather than holding one open,
//! matching the one-request/one-reply discipline the whole wire protocol
//! is built around.

use tokio::net::TcpStream;

use cf_wire::{read_packet, write_packet, Packet, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Send `packet` to `addr` and return the single reply frame. Connection
/// failures and protocol errors are both treated as transient by callers:
/// log and retry on the next scheduled tick.
pub async fn send_request(addr: &str, packet: &Packet) -> Result<Packet, TransportError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_packet(&mut stream, packet).await?;
    Ok(read_packet(&mut stream).await?)
}
