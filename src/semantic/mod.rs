//! Semantic file search.
//!
//! # Architecture
//!
//! - `embeddings`: HTTP client for the external embedding service
//! - `extract`: Plain-text extraction for documents
//! - `index`: Entry types and cosine similarity ranking
//! - `storage`: Durable in-memory index with atomic JSON persistence
//! - `indexer`: Incremental scan / embed / prune pass
//! - `service`: Query-time search over both modalities

pub mod embeddings;
pub mod extract;
mod index;
pub mod indexer;
mod service;
mod storage;

pub use embeddings::{Embedder, EmbeddingError, HttpEmbedder};
pub use extract::{DocumentExtractor, ExtractError, TextExtractor, EMPTY_TEXT_SENTINEL};
pub use index::{cosine_similarity, rank, IndexEntry, Modality, SearchResult, Snapshot};
pub use indexer::{
    file_mtime, IncrementalIndexer, ModalityReport, PassPlan, PassReport, PruneScope,
};
pub use service::{SearchEngine, SearchError, SearchResults};
pub use storage::{IndexStore, StoreError};
