//! Failure detection for storage peer connections
//!
//! A peer connection carries an inactivity deadline: if no line arrives
//! within the window the peer is treated exactly like one that disconnected.
//! Eviction drops it from membership, fails its outstanding probe and purges
//! every in-progress file that named it as a replica. Stable files it held
//! stay indexed until the next rebalance pass repairs them.

use crate::common::{ConnectionId, Error, PeerId};
use crate::coordinator::cluster::ClusterState;
use std::time::Duration;
use tokio::io::{AsyncBufRead, Lines};

/// Result of waiting for the next line
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    Closed,
    Expired,
}

/// Per-connection inactivity window, armed once the connection is a peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct InactivityDeadline {
    window: Option<Duration>,
}

impl InactivityDeadline {
    pub fn unarmed() -> Self {
        Self { window: None }
    }

    pub fn arm(&mut self, window: Duration) {
        self.window = Some(window);
    }

    /// Read the next line, giving up once the window passes without input.
    pub async fn read_line<R>(&self, lines: &mut Lines<R>) -> std::io::Result<ReadOutcome>
    where
        R: AsyncBufRead + Unpin,
    {
        let next = match self.window {
            Some(window) => match tokio::time::timeout(window, lines.next_line()).await {
                Ok(next) => next?,
                Err(_) => return Ok(ReadOutcome::Expired),
            },
            None => lines.next_line().await?,
        };

        Ok(match next {
            Some(line) => ReadOutcome::Line(line),
            None => ReadOutcome::Closed,
        })
    }
}

/// Remove a dead peer and the in-progress files that depended on it.
///
/// Does nothing if `conn_id` is no longer the peer's registered connection.
/// Returns the purged filenames.
pub fn evict_peer(
    state: &mut ClusterState,
    peer: PeerId,
    conn_id: ConnectionId,
    reason: &Error,
) -> Vec<String> {
    let Some(link) = state.registry.leave(peer, conn_id) else {
        return Vec::new();
    };
    link.close();

    let purged = state.index.purge_in_progress(peer);
    tracing::warn!(
        "Storage peer {} evicted ({}); {} live, purged {:?}",
        peer,
        reason,
        state.registry.live_count(),
        purged
    );
    purged
}
