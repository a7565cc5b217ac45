use std::result;

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    /// The targeted mailbox does not exist on the server.
    ///
    /// This is a distinguished condition, not a generic failure: the
    /// sync engine reacts to it by cascade-deleting the local folder.
    #[error("mailbox {0} not found on server")]
    MailboxNotFound(String),

    #[error("cannot connect to mail server: {0}")]
    ConnectionError(String),

    #[error("cannot authenticate to mail server: {0}")]
    AuthenticationError(String),

    /// The connection has been closed, either locally or by the
    /// server. Callers tearing down state treat this as an expected,
    /// non-fatal outcome.
    #[error("connection already closed")]
    ConnectionClosed,

    #[error("no mailbox selected")]
    NoMailboxSelected,

    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl Error {
    /// Return `true` when the error only means the connection is
    /// gone, which is expected during teardown.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}
