//! Module dedicated to mail account management.
//!
//! The account is the entry point of the library: it carries the
//! remote server endpoint and the credentials needed to open
//! connections. Accounts are created and updated by an external CRUD
//! layer; the sync core only reads them, except for the last sync
//! timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The account identifier, unique across the whole process.
pub type AccountId = String;

/// The account configuration.
///
/// Carries everything needed to open a connection to the remote
/// mailbox server. The secret is opaque to this library: decryption
/// is handled by an external collaborator before the configuration
/// reaches the sync core.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// The account identifier.
    pub id: AccountId,

    /// The account display name.
    pub name: String,

    /// The remote mailbox server hostname.
    pub host: String,

    /// The remote mailbox server port.
    pub port: u16,

    /// Whether the connection should be wrapped in TLS.
    pub tls: bool,

    /// The login used to authenticate to the remote server.
    pub login: String,

    /// The pre-decrypted secret used to authenticate to the remote
    /// server.
    pub secret: String,
}

/// The account entity, as persisted by the store.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Account {
    /// The connection configuration of the account.
    pub config: AccountConfig,

    /// The identity of the user owning the account.
    ///
    /// Real-time sessions are only allowed to touch accounts owned by
    /// their authenticated identity.
    pub user_id: String,

    /// Whether the account takes part in background sync and watch.
    pub active: bool,

    /// The date of the last successful full-account sync.
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn id(&self) -> &str {
        &self.config.id
    }
}
