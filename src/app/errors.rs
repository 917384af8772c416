use crate::semantic::{EmbeddingError, SearchError, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("an indexing pass is already running")]
    PassInProgress,

    #[error("embedding client: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index: {0}")]
    Store(#[from] StoreError),

    #[error("search: {0}")]
    Search(#[from] SearchError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
