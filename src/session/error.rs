use std::result;

use thiserror::Error;

use crate::{protocol, store};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find account {0}")]
    AccountNotFoundError(String),
    #[error("user {user} is not allowed to access account {account}")]
    NotAuthorizedError { user: String, account: String },
    #[error("query connection of account {0} is already in use")]
    ConnectionBusyError(String),
    #[error("session error: protocol error")]
    ProtocolError(#[from] protocol::Error),
    #[error("session error: store error")]
    StoreError(#[from] store::Error),
}
