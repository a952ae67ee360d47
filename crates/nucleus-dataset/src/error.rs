use thiserror::Error;

use crate::lock::DatasetLockKey;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetLockError {
    #[error("{0:?} is not an outstanding read key")]
    UnknownReadKey(DatasetLockKey),
    #[error("{0:?} is not the outstanding write key")]
    UnknownWriteKey(DatasetLockKey),
}
