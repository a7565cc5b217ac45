use std::result;

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find account {0}")]
    AccountNotFoundError(String),
    #[error("cannot find folder {0}")]
    FolderNotFoundError(String),
    #[error("cannot find message {1} in folder {0}")]
    MessageNotFoundError(String, u32),
    #[error("store backend error: {0}")]
    BackendError(String),
}
