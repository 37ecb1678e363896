use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("out of memory: buffer pool could not provide a frame")]
    OutOfMemory,

    #[error("buffer pool error: {0}")]
    BufferPool(BufferPoolError),
}

impl From<BufferPoolError> for BTreeError {
    fn from(err: BufferPoolError) -> Self {
        match err {
            BufferPoolError::BufferPoolFull => BTreeError::OutOfMemory,
            other => BTreeError::BufferPool(other),
        }
    }
}
