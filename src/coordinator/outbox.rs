//! Fire-and-forget outbound half of a connection
//!
//! Every accepted socket gets a writer task that owns the write half and
//! drains an unbounded channel. Handlers push lines into the channel while
//! holding the index lock; they never wait on the network.

use crate::common::ConnectionId;
use std::fmt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Outbox {
    conn_id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    pub fn new(conn_id: ConnectionId, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { conn_id, tx }
    }

    /// Outbox plus the receiving end its writer drains
    pub fn channel(conn_id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(conn_id, tx), rx)
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queue one line. A closed connection is logged and otherwise ignored.
    pub fn send(&self, message: impl fmt::Display) -> bool {
        let line = message.to_string();
        tracing::debug!(conn = self.conn_id, "-> {}", line);
        match self.tx.send(line) {
            Ok(()) => true,
            Err(mpsc::error::SendError(line)) => {
                tracing::warn!(conn = self.conn_id, "Dropping '{}': connection closed", line);
                false
            }
        }
    }
}

/// Drain queued lines onto the socket until the channel closes or a write fails.
pub async fn write_loop(
    mut half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
    conn_id: ConnectionId,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = write_line(&mut half, &line).await {
            tracing::warn!(conn = conn_id, "Send of '{}' failed: {}", line, e);
            break;
        }
    }
    let _ = half.shutdown().await;
}

async fn write_line(half: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    half.write_all(line.as_bytes()).await?;
    half.write_all(b"\n").await?;
    half.flush().await
}
