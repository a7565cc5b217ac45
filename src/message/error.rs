use std::{io, result};

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse message with uid {0}")]
    ParseMessageError(u32),
    #[error("cannot build raw message")]
    BuildMessageError(#[source] io::Error),
}
