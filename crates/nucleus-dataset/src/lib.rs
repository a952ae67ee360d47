//! Concurrency guard for a loaded dataset: many readers or one writer.

pub mod error;
pub mod lock;

pub use error::DatasetLockError;
pub use lock::{DatasetLock, DatasetLockEvent, DatasetLockKey, ObserverId, TrackDatasetLocks};
