//! Utility functions for minidfs

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one accepted socket, used to tell a stale connection of a
/// peer apart from its replacement.
pub type ConnectionId = u64;

/// Allocate a process-unique connection id
pub fn next_connection_id() -> ConnectionId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Clear and recreate the storage root directory.
pub async fn prepare_storage_dir(path: impl AsRef<Path>) -> crate::Result<()> {
    let path = path.as_ref();
    if tokio::fs::try_exists(path).await? {
        tokio::fs::remove_dir_all(path).await?;
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}
