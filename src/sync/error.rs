use std::result;

use thiserror::Error;

use crate::{protocol, store};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot sync: protocol error")]
    ProtocolError(#[from] protocol::Error),
    #[error("cannot sync: store error")]
    StoreError(#[from] store::Error),
    #[error("cannot sync account {0}: account not found")]
    AccountNotFoundError(String),
}
