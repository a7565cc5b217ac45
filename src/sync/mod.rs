//! Module dedicated to mailbox synchronization.
//!
//! The [`SyncEngine`] reconciles the local cache with the remote
//! server state, one folder at a time. A folder with no sync cursor
//! gets a full paginated bootstrap, newest messages first; a folder
//! with a cursor gets an incremental three-phase pass: new messages,
//! flag changes, deletions. Both paths are idempotent: re-running a
//! pass with no server-side change yields no local mutation.
//!
//! The engine knows nothing about any delivery transport: progress is
//! reported through an optional event handler that interested layers
//! subscribe to.

mod error;
pub mod report;

use std::{collections::HashSet, future::Future, pin::Pin, sync::Arc};

use chrono::Utc;
use tracing::{debug, info, warn};

#[doc(inline)]
pub use self::error::{Error, Result};
use self::report::{AccountSyncReport, FolderSyncReport};
use crate::{
    account::Account,
    folder::{counter::CounterReconciler, Folder, FolderKind},
    message::Message,
    protocol::{self, Connector, MailboxStatus, ProtocolConnection, RawMessage},
    store::{MessageUpsert, Store},
};

/// The default number of messages fetched per bootstrap batch.
const DEFAULT_BATCH_SIZE: u32 = 100;

/// The status of a background account sync, as exposed to clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Syncing,
    Completed,
    Error,
}

/// The synchronization event.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A bootstrap batch has been processed.
    FolderProgress {
        account_id: String,
        folder: String,
        processed: u32,
        total: u32,
    },

    /// A full-account sync advanced.
    AccountProgress {
        account_id: String,
        status: SyncStatus,
        progress: Option<f32>,
        message: Option<String>,
    },
}

impl SyncEvent {
    /// Emit the event to the given handler, if any.
    pub async fn emit(&self, handler: &Option<Arc<SyncEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            handler(self.clone()).await;
            debug!("emitted sync event {self:?}");
        }
    }
}

/// The synchronization async event handler.
pub type SyncEventHandler =
    dyn Fn(SyncEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// The incremental mailbox synchronization engine.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn Store>,
    counters: CounterReconciler,
    handler: Option<Arc<SyncEventHandler>>,
    batch_size: u32,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            counters: CounterReconciler::new(store.clone()),
            store,
            handler: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn set_handler<F: Future<Output = ()> + Send + 'static>(
        &mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) {
        self.handler = Some(Arc::new(move |evt| Box::pin(handler(evt))));
    }

    pub fn with_handler<F: Future<Output = ()> + Send + 'static>(
        mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one sync pass for the given folder.
    ///
    /// Bootstraps when the folder has no sync cursor, otherwise runs
    /// the incremental three-phase pass. A mailbox missing on the
    /// server is not a failure: the local folder and its messages are
    /// cascade-deleted and the pass reports success. Any other error
    /// aborts the pass and leaves the cursor at its last committed
    /// value, so the next pass safely retries the same range.
    pub async fn sync_folder(
        &self,
        conn: &mut dyn ProtocolConnection,
        account_id: &str,
        folder_path: &str,
    ) -> Result<FolderSyncReport> {
        let status = match conn.select(folder_path).await {
            Ok(status) => status,
            Err(protocol::Error::MailboxNotFound(_)) => {
                info!("mailbox {folder_path} is gone, deleting local folder");
                let mut report = FolderSyncReport {
                    folder: folder_path.to_owned(),
                    folder_deleted: true,
                    ..Default::default()
                };
                if let Some(folder) = self.store.find_folder(account_id, folder_path).await? {
                    report.deleted_messages = self.store.list_uids(&folder.id).await?.len() as u32;
                    self.store.delete_folder(&folder.id).await?;
                }
                return Ok(report);
            }
            Err(err) => return Err(err.into()),
        };

        let folder = match self.store.find_folder(account_id, folder_path).await? {
            Some(folder) => folder,
            None => {
                let kind = FolderKind::from_path(folder_path, "/");
                self.store
                    .upsert_folder(account_id, folder_path, "/", kind)
                    .await?
            }
        };

        if folder.last_synced_uid == 0 {
            self.bootstrap(conn, &folder, &status).await
        } else {
            self.incremental(conn, &folder, &status).await
        }
    }

    /// Full paginated pull of a folder with no sync cursor.
    ///
    /// Pages backward from the highest sequence number so that
    /// recently-received mail is usable before the full history is
    /// pulled.
    async fn bootstrap(
        &self,
        conn: &mut dyn ProtocolConnection,
        folder: &Folder,
        status: &MailboxStatus,
    ) -> Result<FolderSyncReport> {
        info!(
            "bootstrapping folder {} ({} messages)",
            folder.path, status.total
        );

        let mut report = FolderSyncReport {
            folder: folder.path.clone(),
            bootstrapped: true,
            ..Default::default()
        };

        if status.total == 0 {
            debug!("folder {} is empty, nothing to bootstrap", folder.path);
            return Ok(report);
        }

        let mut processed = 0;
        let mut max_uid = 0;
        let mut high = status.total;

        loop {
            let low = if high > self.batch_size {
                high - self.batch_size + 1
            } else {
                1
            };

            let batch = conn.fetch_range_by_seq(low, high).await?;
            let (created, unread) = self.upsert_batch(folder, &batch).await?;
            report.new_messages += created;
            self.counters.increment(&folder.id, unread).await?;

            max_uid = batch.iter().map(|raw| raw.uid).fold(max_uid, u32::max);
            processed += batch.len() as u32;

            SyncEvent::FolderProgress {
                account_id: folder.account_id.clone(),
                folder: folder.path.clone(),
                processed,
                total: status.total,
            }
            .emit(&self.handler)
            .await;

            if low == 1 {
                break;
            }
            high = low - 1;
        }

        self.store
            .update_folder_cursor(&folder.id, max_uid, status.total)
            .await?;
        report.last_synced_uid = max_uid;

        Ok(report)
    }

    /// Incremental three-phase pass: new messages, flag changes,
    /// deletions. Each phase is idempotent on its own.
    async fn incremental(
        &self,
        conn: &mut dyn ProtocolConnection,
        folder: &Folder,
        status: &MailboxStatus,
    ) -> Result<FolderSyncReport> {
        debug!(
            "incremental sync of folder {} (cursor {}, next uid {})",
            folder.path, folder.last_synced_uid, status.next_uid
        );

        let mut report = FolderSyncReport {
            folder: folder.path.clone(),
            ..Default::default()
        };
        let last = folder.last_synced_uid;

        // phase 1: new messages
        if status.next_uid > last + 1 {
            let batch = conn.fetch_uid_range(last + 1, status.next_uid - 1).await?;
            let (created, unread) = self.upsert_batch(folder, &batch).await?;
            report.new_messages += created;
            self.counters.increment(&folder.id, unread).await?;
        }

        // phase 2: flag changes on the already-synced range
        if last > 0 {
            let entries = conn.fetch_flags(1, last).await?;
            for entry in entries {
                let Some(cached) = self
                    .store
                    .find_message_by_uid(&folder.id, entry.uid)
                    .await?
                else {
                    continue;
                };

                if cached.flags == entry.flags {
                    continue;
                }

                let was_read = cached.is_seen();
                let is_read = entry.flags.is_seen();
                self.store
                    .update_flags(&folder.id, entry.uid, entry.flags)
                    .await?;

                if was_read != is_read {
                    // counter mutations go through the reconciler so
                    // the unread count can never go negative
                    self.counters
                        .on_read_state_change(&folder.id, was_read, is_read)
                        .await?;
                    report.flag_updates += 1;
                }
            }
        }

        // phase 3: deletions
        let on_server: HashSet<u32> = conn
            .search_all()
            .await?
            .into_iter()
            .map(|entry| entry.uid)
            .collect();
        for uid in self.store.list_uids(&folder.id).await? {
            if !on_server.contains(&uid) {
                self.store.delete_message(&folder.id, uid).await?;
                report.deleted_messages += 1;
            }
        }
        if report.deleted_messages > 0 {
            // batched deletions are corrected by a full recount rather
            // than per-row arithmetic
            self.counters.recalculate(&folder.id).await?;
        }

        let cursor = last.max(status.next_uid.saturating_sub(1));
        self.store
            .update_folder_cursor(&folder.id, cursor, status.total)
            .await?;
        report.last_synced_uid = cursor;

        Ok(report)
    }

    /// Parse and upsert one batch of fetched messages. Returns the
    /// number of created rows and how many of them are unread. A
    /// message that cannot be parsed is skipped, never fatal to the
    /// pass.
    async fn upsert_batch(
        &self,
        folder: &Folder,
        batch: &[RawMessage],
    ) -> Result<(u32, u32)> {
        let mut created = 0;
        let mut unread = 0;

        for raw in batch {
            let msg = match Message::parse(
                &folder.account_id,
                &folder.id,
                raw.uid,
                raw.flags.clone(),
                raw.size,
                &raw.raw,
            ) {
                Ok(msg) => msg,
                Err(err) => {
                    warn!("skipping unparsable message {}: {err}", raw.uid);
                    continue;
                }
            };

            let seen = msg.is_seen();
            if self.store.upsert_message(msg).await? == MessageUpsert::Created {
                created += 1;
                if !seen {
                    unread += 1;
                }
            }
        }

        Ok((created, unread))
    }

    /// Run a full-account sync: reconcile the folder list, then run
    /// one sync pass per folder sequentially.
    ///
    /// A failed folder pass is recorded and does not abort the other
    /// folders; the account-level status is only `completed` when
    /// every pass succeeded.
    pub async fn sync_account(
        &self,
        connector: &dyn Connector,
        account: &Account,
    ) -> Result<AccountSyncReport> {
        let account_id = account.id().to_owned();
        info!("starting full sync of account {account_id}");

        SyncEvent::AccountProgress {
            account_id: account_id.clone(),
            status: SyncStatus::Syncing,
            progress: Some(0.0),
            message: None,
        }
        .emit(&self.handler)
        .await;

        let mut report = AccountSyncReport {
            account_id: account_id.clone(),
            ..Default::default()
        };

        let res = self.sync_account_inner(connector, account, &mut report).await;

        let (status, message) = match &res {
            Ok(()) if report.is_ok() => (SyncStatus::Completed, None),
            Ok(()) => (
                SyncStatus::Error,
                Some(format!("{} folder(s) failed to sync", report.errors.len())),
            ),
            Err(err) => (SyncStatus::Error, Some(err.to_string())),
        };

        SyncEvent::AccountProgress {
            account_id,
            status,
            progress: Some(1.0),
            message,
        }
        .emit(&self.handler)
        .await;

        res.map(|()| report)
    }

    async fn sync_account_inner(
        &self,
        connector: &dyn Connector,
        account: &Account,
        report: &mut AccountSyncReport,
    ) -> Result<()> {
        let account_id = account.id();
        let mut conn = connector.connect(&account.config).await?;

        // folder-list sync: upsert listed mailboxes, cascade-delete
        // local folders that disappeared from the listing
        let remote = conn.list_mailboxes().await?;
        let mut listed = HashSet::new();
        for mailbox in &remote {
            listed.insert(mailbox.path.clone());
            let kind = mailbox
                .kind
                .clone()
                .or_else(|| FolderKind::from_path(&mailbox.path, &mailbox.delimiter));
            self.store
                .upsert_folder(account_id, &mailbox.path, &mailbox.delimiter, kind)
                .await?;
        }
        for folder in self.store.list_folders(account_id).await? {
            if !listed.contains(&folder.path) {
                info!("folder {} gone from listing, deleting it", folder.path);
                self.store.delete_folder(&folder.id).await?;
                report.deleted_folders.push(folder.path);
            }
        }

        let folders = self.store.list_folders(account_id).await?;
        let count = folders.len() as f32;

        for (i, folder) in folders.into_iter().enumerate() {
            match self.sync_folder(conn.as_mut(), account_id, &folder.path).await {
                Ok(folder_report) => report.folders.push(folder_report),
                Err(err) => {
                    warn!("cannot sync folder {}: {err}", folder.path);
                    report.errors.push((folder.path, err.to_string()));
                }
            }

            SyncEvent::AccountProgress {
                account_id: account_id.to_owned(),
                status: SyncStatus::Syncing,
                progress: Some((i + 1) as f32 / count),
                message: None,
            }
            .emit(&self.handler)
            .await;
        }

        self.store.touch_last_sync(account_id, Utc::now()).await?;

        if let Err(err) = conn.close().await {
            debug!("cannot close sync connection: {err}");
        }

        Ok(())
    }
}
