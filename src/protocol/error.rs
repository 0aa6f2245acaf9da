use super::frame::asdu::{CauseOfTransmission, TypeID};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("asdu: [type identifier: {0:?}] doesn't match call or time tag")]
    TypeIdMismatch(TypeID),
    #[error("asdu: [cause of transmission: {0:?}] not allowed for this direction")]
    CauseNotAllowed(CauseOfTransmission),
    #[error("asdu: invalid information object count: {0}")]
    InvalidObjectCount(usize),
    #[error(transparent)]
    Decode(#[from] anyhow::Error),
}
