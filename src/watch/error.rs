use std::result;

use thiserror::Error;

use crate::{protocol, store, sync};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot watch: protocol error")]
    ProtocolError(#[from] protocol::Error),
    #[error("cannot watch: sync error")]
    SyncError(#[from] sync::Error),
    #[error("cannot watch: store error")]
    StoreError(#[from] store::Error),
}
