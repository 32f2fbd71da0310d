use common::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid reference pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("queue lock lost after {processed} items, queue left unchanged")]
    LockLost { processed: usize },
}

pub type SweepResult<T> = Result<T, SweepError>;
