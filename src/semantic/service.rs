//! Query-time search over the index.
//!
//! A query is embedded twice: once with the text encoder and ranked against
//! document entries, once with the cross-modal encoder and ranked against
//! image entries. Each ranking works on a snapshot, so indexing can continue
//! while a search runs.

use std::sync::Arc;

use serde::Serialize;

use crate::config::{Config, SearchConfig};
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::index::{self, Modality, SearchResult};
use crate::semantic::storage::IndexStore;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("query must be at least {min_chars} characters")]
    QueryTooShort { min_chars: usize },

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub text: Vec<SearchResult>,
    pub images: Vec<SearchResult>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty()
    }
}

pub struct SearchEngine {
    store: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(store: Arc<IndexStore>, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn from_config(config: &Config, store: Arc<IndexStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(store, embedder, config.search.clone())
    }

    /// Search both modalities.
    ///
    /// Queries shorter than the configured minimum are rejected before any
    /// service call. Any embedding failure fails the whole search.
    pub fn search(&self, query: &str) -> Result<SearchResults, SearchError> {
        let query = query.trim();
        if query.chars().count() < self.config.min_query_chars {
            return Err(SearchError::QueryTooShort {
                min_chars: self.config.min_query_chars,
            });
        }

        Ok(SearchResults {
            text: self.search_text(query)?,
            images: self.search_images(query)?,
        })
    }

    fn search_text(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let query_embedding = self.embedder.embed_text(query)?;
        let snapshot = self.store.snapshot_all(Modality::Text);

        Ok(index::rank(
            &snapshot,
            &query_embedding,
            self.config.text_threshold,
            self.config.text_limit,
        ))
    }

    fn search_images(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let query_embedding = self.embedder.embed_query_for_images(query)?;
        let snapshot = self.store.snapshot_all(Modality::Image);

        Ok(index::rank(
            &snapshot,
            &query_embedding,
            self.config.image_threshold,
            self.config.image_limit,
        ))
    }
}
