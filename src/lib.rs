//! Rust library to keep a local mailbox cache in sync with remote
//! mail servers.
//!
//! The main purpose of this library is to provide the stateful core
//! of a webmail backend: long-lived connections to remote mailbox
//! servers, incremental reconciliation of a local cache (folders,
//! messages, flags) and near-real-time new-mail notifications.
//!
//! The library is organized around a few services:
//!
//! - [`sync::SyncEngine`]: reconciles the local cache with the remote
//!   server state, either by a full paginated bootstrap or by an
//!   incremental three-phase pass (new messages, flag changes,
//!   deletions).
//! - [`watch::Watcher`]: holds one long-lived connection per account
//!   in IDLE (or keep-alive polling) mode and triggers a sync pass on
//!   every server notification.
//! - [`session::SessionManager`]: binds authenticated real-time
//!   client sessions to per-account watch and query connections.
//! - [`scheduler::SyncScheduler`]: bounds concurrent background
//!   full-account syncs and enforces single-flight per account.
//!
//! The remote server is abstracted behind the
//! [`protocol::ProtocolConnection`] trait and the persistence layer
//! behind the [`store::Store`] trait, so the whole core can be tested
//! against the in-memory implementations shipped with the crate
//! ([`protocol::fake`] and [`store::memory`]).

pub mod account;
pub mod flag;
pub mod folder;
pub mod message;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod sync;
pub mod watch;
pub mod wire;

#[doc(inline)]
pub use self::{
    account::{Account, AccountConfig},
    flag::{Flag, Flags},
    folder::{Folder, FolderKind},
    message::Message,
    protocol::{Connector, ProtocolConnection},
    store::Store,
    sync::SyncEngine,
    watch::Watcher,
};
