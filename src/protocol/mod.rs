//! Module dedicated to the remote mailbox protocol abstraction.
//!
//! The sync core only relies on UID ordering and monotonic next-uid
//! semantics, so the concrete transport (IMAP or anything equivalent)
//! is abstracted behind the [`ProtocolConnection`] trait. A
//! connection is stateful: one mailbox is selected at a time, and
//! operations must not be issued concurrently on the same connection.
//!
//! The [`fake`] module ships an in-memory implementation used by the
//! test suite and usable for local development.

mod error;
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{account::AccountConfig, flag::Flag, flag::Flags, folder::FolderKind};

/// The status of a remote mailbox, as reported by the status and
/// select verbs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MailboxStatus {
    /// The total number of messages in the mailbox.
    pub total: u32,

    /// The number of unread messages in the mailbox.
    pub unread: u32,

    /// The UID the server will assign to the next delivered message.
    pub next_uid: u32,
}

/// One entry of a remote mailbox listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteMailbox {
    /// The hierarchical path of the mailbox.
    pub path: String,

    /// The hierarchy delimiter of the mailbox.
    pub delimiter: String,

    /// The special-use role advertised by the server, when any.
    pub kind: Option<FolderKind>,
}

/// One entry of a UID enumeration: the UID and the flags currently
/// attached to the message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UidEntry {
    /// The server-assigned UID.
    pub uid: u32,

    /// The flags attached to the message.
    pub flags: Flags,
}

/// A fully fetched message: the raw wire form plus the metadata
/// needed to cache it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawMessage {
    /// The server-assigned UID.
    pub uid: u32,

    /// The flags attached to the message.
    pub flags: Flags,

    /// The message size in bytes.
    pub size: u32,

    /// The raw wire form of the message.
    pub raw: Vec<u8>,
}

/// A notification received while the connection is in watch mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IdleEvent {
    /// New mail arrived in the selected mailbox.
    NewMail {
        /// The number of new messages, when the server reports it.
        count: u32,
    },

    /// The flags of a message changed, identified by sequence number.
    FlagsChanged { seqno: u32 },

    /// A message was expunged, identified by sequence number.
    Expunged { seqno: u32 },

    /// The watch period elapsed without any change.
    Timeout,
}

/// A single logical connection to a remote mailbox server.
///
/// The connection is stateful: [`select`](Self::select) must be
/// called before any UID, flag or fetch operation targeting a
/// mailbox, and re-selecting a different mailbox invalidates any
/// assumption about the previous one. Operations must not be issued
/// concurrently: callers serialize access, the library never shares
/// one connection between a watch role and a query role.
#[async_trait]
pub trait ProtocolConnection: Send {
    /// Open the connection. Implementations returned by a
    /// [`Connector`] are already open.
    async fn open(&mut self) -> Result<()>;

    /// Close the connection. Closing an already closed connection is
    /// a non-fatal, expected outcome.
    async fn close(&mut self) -> Result<()>;

    /// Select the given mailbox and return its status.
    ///
    /// A missing mailbox is reported as the distinguished
    /// [`Error::MailboxNotFound`], which drives cascade-delete logic
    /// upstream.
    async fn select(&mut self, folder: &str) -> Result<MailboxStatus>;

    /// List all mailboxes of the account.
    async fn list_mailboxes(&mut self) -> Result<Vec<RemoteMailbox>>;

    /// Return the status of the given mailbox without selecting it.
    async fn status(&mut self, folder: &str) -> Result<MailboxStatus>;

    /// Enumerate UIDs and flags for the inclusive UID range.
    async fn search_uid_range(&mut self, low: u32, high: u32) -> Result<Vec<UidEntry>>;

    /// Enumerate all UIDs and flags of the selected mailbox.
    async fn search_all(&mut self) -> Result<Vec<UidEntry>>;

    /// Fetch full messages for the inclusive sequence number range.
    ///
    /// Used by the bootstrap sync to page backward from the highest
    /// sequence number.
    async fn fetch_range_by_seq(&mut self, low: u32, high: u32) -> Result<Vec<RawMessage>>;

    /// Fetch full messages for the inclusive UID range.
    async fn fetch_uid_range(&mut self, low: u32, high: u32) -> Result<Vec<RawMessage>>;

    /// Fetch one full message by UID.
    async fn fetch_full(&mut self, uid: u32) -> Result<RawMessage>;

    /// Fetch flags only (no body) for the inclusive UID range.
    async fn fetch_flags(&mut self, low: u32, high: u32) -> Result<Vec<UidEntry>>;

    /// Set or clear one flag on the given message.
    async fn set_flag(&mut self, uid: u32, flag: &Flag, on: bool) -> Result<()>;

    /// Permanently remove all messages marked as deleted from the
    /// selected mailbox.
    async fn expunge(&mut self) -> Result<()>;

    /// Move the given message to another mailbox.
    async fn move_message(&mut self, uid: u32, target: &str) -> Result<()>;

    /// Create a new mailbox.
    async fn create_mailbox(&mut self, folder: &str) -> Result<()>;

    /// Rename an existing mailbox.
    async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()>;

    /// Delete an existing mailbox.
    async fn delete_mailbox(&mut self, folder: &str) -> Result<()>;

    /// Append a raw message to the given mailbox and return its
    /// server-assigned UID.
    async fn append(&mut self, folder: &str, raw: &[u8], flags: &Flags) -> Result<u32>;

    /// Return `true` when the server exposes a native long-poll
    /// primitive. Watchers check this capability once per connection
    /// and fall back to keep-alive polling otherwise.
    fn supports_idle(&self) -> bool;

    /// Enter watch mode on the selected mailbox until a change is
    /// pushed by the server or the timeout elapses.
    async fn idle(&mut self, timeout: Duration) -> Result<IdleEvent>;

    /// Issue a keep-alive round trip, collecting any change
    /// notification the server delivered since the last call. The
    /// polling fallback of watchers relies on this.
    async fn noop(&mut self) -> Result<Option<IdleEvent>>;
}

impl std::fmt::Debug for dyn ProtocolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ProtocolConnection")
    }
}

/// The connection factory.
///
/// Opening connections is the seam between this library and the
/// concrete transport: watchers, sessions and the background
/// scheduler all go through a connector, which makes the whole core
/// testable against [`fake::FakeConnector`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new, authenticated connection for the given account.
    async fn connect(&self, config: &AccountConfig) -> Result<Box<dyn ProtocolConnection>>;
}
