//! Module dedicated to folder counter reconciliation.
//!
//! The unread and total counters of a folder are maintained two ways:
//! incrementally during sync passes, and by a full recount after bulk
//! deletions or on explicit repair requests. The full recount is the
//! authoritative drift-correction path.

use std::sync::Arc;

use tracing::debug;

use crate::store::{Result, Store};

/// The folder counter reconciler.
///
/// All counter mutations of the sync engine go through this service
/// rather than through direct arithmetic, so the unread counter can
/// never go negative regardless of call ordering.
#[derive(Clone)]
pub struct CounterReconciler {
    store: Arc<dyn Store>,
}

impl CounterReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Increment the unread counter of the given folder.
    pub async fn increment(&self, folder_id: &str, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let unread = self.store.add_unread(folder_id, n as i64).await?;
        debug!("incremented unread counter of folder {folder_id} by {n} to {unread}");
        Ok(())
    }

    /// Decrement the unread counter of the given folder, clamped at
    /// zero.
    pub async fn decrement(&self, folder_id: &str, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let unread = self.store.add_unread(folder_id, -(n as i64)).await?;
        debug!("decremented unread counter of folder {folder_id} by {n} to {unread}");
        Ok(())
    }

    /// Adjust the unread counter after a read-state transition:
    /// decrement when a message becomes read, increment when it
    /// becomes unread, no-op when the state did not change.
    pub async fn on_read_state_change(
        &self,
        folder_id: &str,
        was_read: bool,
        is_read: bool,
    ) -> Result<()> {
        match (was_read, is_read) {
            (false, true) => self.decrement(folder_id, 1).await,
            (true, false) => self.increment(folder_id, 1).await,
            _ => Ok(()),
        }
    }

    /// Recompute both counters of the given folder by direct
    /// enumeration of the cached messages and overwrite the stored
    /// values.
    pub async fn recalculate(&self, folder_id: &str) -> Result<(u32, u32)> {
        let (total, unread) = self.store.count_messages(folder_id).await?;
        self.store.set_counts(folder_id, total, unread).await?;
        debug!("recalculated counters of folder {folder_id}: total {total}, unread {unread}");
        Ok((total, unread))
    }
}
