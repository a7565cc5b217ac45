//! Module dedicated to folder (as known as mailbox) management.
//!
//! The main entities are [`FolderKind`] and [`Folder`]. The
//! [`counter`] module maintains the unread and total counters of a
//! folder, both incrementally and by full recount.

pub mod counter;
mod error;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::account::AccountId;

/// The folder identifier, unique across the whole process.
pub type FolderId = String;

pub const INBOX: &str = "INBOX";
pub const SENT: &str = "Sent";
pub const DRAFTS: &str = "Drafts";
pub const TRASH: &str = "Trash";
pub const JUNK: &str = "Junk";
pub const ARCHIVE: &str = "Archive";

/// The folder kind enumeration.
///
/// The folder kind is the semantic role of a folder, detected from
/// the server special-use attributes or from the folder path. It is
/// used internally to pick the right folder for an operation, for
/// example the inbox to watch or the sent folder for save-to-sent.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FolderKind {
    /// The folder that receives incoming mail.
    Inbox,

    /// The folder that keeps a copy of sent mail.
    Sent,

    /// The folder that keeps unfinished drafts.
    Drafts,

    /// The folder that keeps deleted mail.
    Trash,

    /// The folder that receives mail classified as spam.
    Junk,

    /// The folder that keeps archived mail.
    Archive,
}

impl FolderKind {
    /// Return `true` if the current folder kind matches the Inbox
    /// variant.
    pub fn is_inbox(&self) -> bool {
        matches!(self, FolderKind::Inbox)
    }

    /// Return `true` if the given folder path matches the Inbox
    /// variant.
    pub fn matches_inbox(folder: impl AsRef<str>) -> bool {
        folder
            .as_ref()
            .parse::<FolderKind>()
            .map(|kind| kind.is_inbox())
            .unwrap_or_default()
    }

    /// Detect the folder kind from a hierarchical path: only the last
    /// path segment is significant.
    pub fn from_path(path: &str, delimiter: &str) -> Option<Self> {
        let leaf = match path.rsplit_once(delimiter) {
            Some((_, leaf)) if !delimiter.is_empty() => leaf,
            _ => path,
        };
        leaf.parse().ok()
    }

    /// Return the folder kind as string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => INBOX,
            Self::Sent => SENT,
            Self::Drafts => DRAFTS,
            Self::Trash => TRASH,
            Self::Junk => JUNK,
            Self::Archive => ARCHIVE,
        }
    }
}

impl FromStr for FolderKind {
    type Err = Error;

    fn from_str(kind: &str) -> Result<Self> {
        match kind {
            kind if kind.eq_ignore_ascii_case(INBOX) => Ok(Self::Inbox),
            kind if kind.eq_ignore_ascii_case(SENT) => Ok(Self::Sent),
            kind if kind.eq_ignore_ascii_case("draft") => Ok(Self::Drafts),
            kind if kind.eq_ignore_ascii_case(DRAFTS) => Ok(Self::Drafts),
            kind if kind.eq_ignore_ascii_case(TRASH) => Ok(Self::Trash),
            kind if kind.eq_ignore_ascii_case(JUNK) => Ok(Self::Junk),
            kind if kind.eq_ignore_ascii_case("spam") => Ok(Self::Junk),
            kind if kind.eq_ignore_ascii_case(ARCHIVE) => Ok(Self::Archive),
            kind => Err(Error::ParseFolderKindError(kind.to_owned())),
        }
    }
}

impl fmt::Display for FolderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The folder entity, as persisted by the store.
///
/// A folder belongs to exactly one account and carries the sync
/// cursor of the incremental engine: `last_synced_uid` is the highest
/// server UID fully reconciled so far, and never decreases across
/// sync passes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Folder {
    /// The folder identifier.
    pub id: FolderId,

    /// The identifier of the account owning the folder.
    pub account_id: AccountId,

    /// The hierarchical path of the folder on the server.
    pub path: String,

    /// The hierarchy delimiter reported by the server.
    pub delimiter: String,

    /// The optional semantic role of the folder.
    pub kind: Option<FolderKind>,

    /// The highest server UID fully reconciled, `0` when the folder
    /// has never been synced.
    pub last_synced_uid: u32,

    /// The cached total number of messages in the folder.
    pub total_count: u32,

    /// The cached number of unread messages in the folder.
    pub unread_count: u32,
}

impl Folder {
    /// Return `true` if the folder kind matches the Inbox variant.
    pub fn is_inbox(&self) -> bool {
        self.kind
            .as_ref()
            .map(|kind| kind.is_inbox())
            .unwrap_or_default()
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_path_uses_last_segment() {
        assert_eq!(
            FolderKind::from_path("INBOX/Sent", "/"),
            Some(FolderKind::Sent),
        );
        assert_eq!(FolderKind::from_path("inbox", "/"), Some(FolderKind::Inbox));
        assert_eq!(FolderKind::from_path("Clients/Acme", "/"), None);
    }

    #[test]
    fn kind_parsing_accepts_aliases() {
        assert_eq!("spam".parse::<FolderKind>().unwrap(), FolderKind::Junk);
        assert_eq!("Draft".parse::<FolderKind>().unwrap(), FolderKind::Drafts);
        assert!("weird".parse::<FolderKind>().is_err());
    }
}
