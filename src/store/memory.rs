//! Module dedicated to the in-memory store.
//!
//! Used by the test suite as the persistence collaborator, and usable
//! as a plain process-local cache. Everything lives behind one
//! [`RwLock`], which also makes the counter mutations atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Error, MessageUpsert, Result, Store};
use crate::{
    account::Account,
    flag::Flags,
    folder::{Folder, FolderId, FolderKind},
    message::Message,
};

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    folders: HashMap<FolderId, Folder>,
    /// Messages keyed by (account id, message id), the per-account
    /// uniqueness invariant.
    messages: HashMap<(String, String), Message>,
}

/// The in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn folder_id(account_id: &str, path: &str) -> FolderId {
        format!("{account_id}:{path}")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(&self, account: Account) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.insert(account.id().to_owned(), account);
        Ok(())
    }

    async fn find_account(&self, account_id: &str) -> Result<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.get(account_id).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let inner = self.inner.read().await;
        let mut accounts: Vec<_> = inner.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(accounts)
    }

    async fn touch_last_sync(&self, account_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| Error::AccountNotFoundError(account_id.to_owned()))?;
        account.last_sync_at = Some(at);
        Ok(())
    }

    async fn list_folders(&self, account_id: &str) -> Result<Vec<Folder>> {
        let inner = self.inner.read().await;
        let mut folders: Vec<_> = inner
            .folders
            .values()
            .filter(|folder| folder.account_id == account_id)
            .cloned()
            .collect();
        folders.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(folders)
    }

    async fn find_folder(&self, account_id: &str, path: &str) -> Result<Option<Folder>> {
        let inner = self.inner.read().await;
        Ok(inner
            .folders
            .get(&Self::folder_id(account_id, path))
            .cloned())
    }

    async fn find_folder_by_id(&self, folder_id: &str) -> Result<Option<Folder>> {
        let inner = self.inner.read().await;
        Ok(inner.folders.get(folder_id).cloned())
    }

    async fn upsert_folder(
        &self,
        account_id: &str,
        path: &str,
        delimiter: &str,
        kind: Option<FolderKind>,
    ) -> Result<Folder> {
        let mut inner = self.inner.write().await;
        let id = Self::folder_id(account_id, path);
        let folder = inner.folders.entry(id.clone()).or_insert_with(|| Folder {
            id,
            account_id: account_id.to_owned(),
            path: path.to_owned(),
            ..Default::default()
        });
        folder.delimiter = delimiter.to_owned();
        folder.kind = kind;
        Ok(folder.clone())
    }

    async fn update_folder_cursor(
        &self,
        folder_id: &str,
        last_synced_uid: u32,
        total: u32,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let folder = inner
            .folders
            .get_mut(folder_id)
            .ok_or_else(|| Error::FolderNotFoundError(folder_id.to_owned()))?;
        // the cursor never goes backward
        folder.last_synced_uid = folder.last_synced_uid.max(last_synced_uid);
        folder.total_count = total;
        Ok(())
    }

    async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.folders.remove(folder_id);
        inner.messages.retain(|_, msg| msg.folder_id != folder_id);
        Ok(())
    }

    async fn upsert_message(&self, message: Message) -> Result<MessageUpsert> {
        let mut inner = self.inner.write().await;
        let key = (message.account_id.clone(), message.message_id.clone());
        let outcome = if inner.messages.contains_key(&key) {
            MessageUpsert::Updated
        } else {
            MessageUpsert::Created
        };
        inner.messages.insert(key, message);
        Ok(outcome)
    }

    async fn find_message_by_uid(&self, folder_id: &str, uid: u32) -> Result<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .find(|msg| msg.folder_id == folder_id && msg.uid == uid)
            .cloned())
    }

    async fn list_uids(&self, folder_id: &str) -> Result<Vec<u32>> {
        let inner = self.inner.read().await;
        let mut uids: Vec<_> = inner
            .messages
            .values()
            .filter(|msg| msg.folder_id == folder_id)
            .map(|msg| msg.uid)
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn update_flags(&self, folder_id: &str, uid: u32, flags: Flags) -> Result<()> {
        let mut inner = self.inner.write().await;
        let msg = inner
            .messages
            .values_mut()
            .find(|msg| msg.folder_id == folder_id && msg.uid == uid)
            .ok_or_else(|| Error::MessageNotFoundError(folder_id.to_owned(), uid))?;
        msg.flags = flags;
        Ok(())
    }

    async fn delete_message(&self, folder_id: &str, uid: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .messages
            .retain(|_, msg| !(msg.folder_id == folder_id && msg.uid == uid));
        Ok(())
    }

    async fn add_unread(&self, folder_id: &str, delta: i64) -> Result<u32> {
        let mut inner = self.inner.write().await;
        let folder = inner
            .folders
            .get_mut(folder_id)
            .ok_or_else(|| Error::FolderNotFoundError(folder_id.to_owned()))?;
        let unread = (folder.unread_count as i64 + delta).max(0) as u32;
        folder.unread_count = unread;
        Ok(unread)
    }

    async fn set_counts(&self, folder_id: &str, total: u32, unread: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        let folder = inner
            .folders
            .get_mut(folder_id)
            .ok_or_else(|| Error::FolderNotFoundError(folder_id.to_owned()))?;
        folder.total_count = total;
        folder.unread_count = unread;
        Ok(())
    }

    async fn count_messages(&self, folder_id: &str) -> Result<(u32, u32)> {
        let inner = self.inner.read().await;
        let mut total = 0;
        let mut unread = 0;
        for msg in inner.messages.values() {
            if msg.folder_id == folder_id {
                total += 1;
                if !msg.is_seen() {
                    unread += 1;
                }
            }
        }
        Ok((total, unread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::Flag;

    fn message(folder_id: &str, uid: u32, message_id: &str, flags: Flags) -> Message {
        Message {
            account_id: "account".into(),
            folder_id: folder_id.into(),
            uid,
            message_id: message_id.into(),
            flags,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_message_deduplicates_by_message_id() {
        let store = MemoryStore::new();
        let folder = store
            .upsert_folder("account", "INBOX", "/", None)
            .await
            .unwrap();

        let first = store
            .upsert_message(message(&folder.id, 1, "<a@x>", Flags::default()))
            .await
            .unwrap();
        let second = store
            .upsert_message(message(&folder.id, 1, "<a@x>", Flags::from(Flag::Seen)))
            .await
            .unwrap();

        assert_eq!(first, MessageUpsert::Created);
        assert_eq!(second, MessageUpsert::Updated);
        assert_eq!(store.list_uids(&folder.id).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn cursor_is_monotonic() {
        let store = MemoryStore::new();
        let folder = store
            .upsert_folder("account", "INBOX", "/", None)
            .await
            .unwrap();

        store.update_folder_cursor(&folder.id, 10, 5).await.unwrap();
        store.update_folder_cursor(&folder.id, 3, 5).await.unwrap();

        let folder = store.find_folder_by_id(&folder.id).await.unwrap().unwrap();
        assert_eq!(folder.last_synced_uid, 10);
    }

    #[tokio::test]
    async fn delete_folder_cascades_messages() {
        let store = MemoryStore::new();
        let folder = store
            .upsert_folder("account", "INBOX", "/", None)
            .await
            .unwrap();
        store
            .upsert_message(message(&folder.id, 1, "<a@x>", Flags::default()))
            .await
            .unwrap();

        store.delete_folder(&folder.id).await.unwrap();

        assert!(store
            .find_message_by_uid(&folder.id, 1)
            .await
            .unwrap()
            .is_none());
    }
}
