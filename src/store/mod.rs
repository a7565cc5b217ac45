//! Module dedicated to the persistence collaborator.
//!
//! The relational layer itself is out of scope: the sync core only
//! needs a keyed store with CRUD operations, guarded counter
//! mutations and a recount query, abstracted behind the [`Store`]
//! trait. The [`memory`] module ships the in-process implementation
//! used by the test suite.

mod error;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{
    account::Account,
    flag::Flags,
    folder::{Folder, FolderKind},
    message::Message,
};

/// The outcome of a message upsert.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageUpsert {
    /// A new row was created.
    Created,

    /// An existing row (same account and message id) was updated.
    Updated,
}

/// The persistence collaborator of the sync core.
///
/// Keys: accounts by id, folders by account and path, messages both
/// by (account, message id) and by (folder, uid). Implementations
/// must cascade: deleting a folder deletes its messages.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_account(&self, account: Account) -> Result<()>;

    async fn find_account(&self, account_id: &str) -> Result<Option<Account>>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Record the date of the last successful full-account sync.
    async fn touch_last_sync(&self, account_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn list_folders(&self, account_id: &str) -> Result<Vec<Folder>>;

    async fn find_folder(&self, account_id: &str, path: &str) -> Result<Option<Folder>>;

    async fn find_folder_by_id(&self, folder_id: &str) -> Result<Option<Folder>>;

    /// Create the folder or refresh its path metadata, leaving the
    /// sync cursor and the counters untouched when the folder already
    /// exists.
    async fn upsert_folder(
        &self,
        account_id: &str,
        path: &str,
        delimiter: &str,
        kind: Option<FolderKind>,
    ) -> Result<Folder>;

    /// Commit a sync pass: persist the cursor and the server-reported
    /// total. The cursor is monotonic, implementations must keep the
    /// maximum of the stored and given values.
    async fn update_folder_cursor(
        &self,
        folder_id: &str,
        last_synced_uid: u32,
        total: u32,
    ) -> Result<()>;

    /// Delete the folder and cascade-delete all its messages.
    async fn delete_folder(&self, folder_id: &str) -> Result<()>;

    /// Insert the message, or update the existing row sharing its
    /// (account, message id) key.
    async fn upsert_message(&self, message: Message) -> Result<MessageUpsert>;

    async fn find_message_by_uid(&self, folder_id: &str, uid: u32) -> Result<Option<Message>>;

    /// Enumerate the UIDs cached for the given folder.
    async fn list_uids(&self, folder_id: &str) -> Result<Vec<u32>>;

    async fn update_flags(&self, folder_id: &str, uid: u32, flags: Flags) -> Result<()>;

    async fn delete_message(&self, folder_id: &str, uid: u32) -> Result<()>;

    /// Atomically adjust the unread counter of the folder, clamped at
    /// zero, and return the new value.
    async fn add_unread(&self, folder_id: &str, delta: i64) -> Result<u32>;

    /// Overwrite both counters of the folder.
    async fn set_counts(&self, folder_id: &str, total: u32, unread: u32) -> Result<()>;

    /// Count cached messages of the folder: `(total, unread)`.
    async fn count_messages(&self, folder_id: &str) -> Result<(u32, u32)>;
}
