//! Module dedicated to synchronization reports.

/// The report of one folder sync pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FolderSyncReport {
    /// The path of the synced folder.
    pub folder: String,

    /// `true` when the pass was a full bootstrap rather than an
    /// incremental one.
    pub bootstrapped: bool,

    /// `true` when the mailbox no longer exists on the server and the
    /// local folder was cascade-deleted. The pass still counts as a
    /// success.
    pub folder_deleted: bool,

    /// The number of new messages cached during the pass.
    pub new_messages: u32,

    /// The number of messages whose read-state changed during the
    /// pass.
    pub flag_updates: u32,

    /// The number of messages deleted locally during the pass.
    pub deleted_messages: u32,

    /// The sync cursor committed at the end of the pass.
    pub last_synced_uid: u32,
}

/// The report of one full-account sync.
#[derive(Clone, Debug, Default)]
pub struct AccountSyncReport {
    /// The synced account identifier.
    pub account_id: String,

    /// The per-folder reports, in sync order.
    pub folders: Vec<FolderSyncReport>,

    /// The folders deleted locally because they disappeared from the
    /// server listing.
    pub deleted_folders: Vec<String>,

    /// The folders whose pass failed, with the stringified error. A
    /// failed folder does not abort the account sync.
    pub errors: Vec<(String, String)>,
}

impl AccountSyncReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
