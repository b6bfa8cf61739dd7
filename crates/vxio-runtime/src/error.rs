use thiserror::Error;

use vxio_core::error::{ConfigError, DataShapeError, RangeError};
use vxio_store::StoreError;

/// Why a producer could not materialize a batch. Stored in the slot in place of the batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Shape(#[from] DataShapeError),
    #[error("batch from producer {thread_id} failed to materialize: {source}")]
    Batch {
        thread_id: usize,
        #[source]
        source: BatchError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[source] std::io::Error),
}
