//! Index entry types and cosine similarity ranking.
//!
//! Ranking runs over a snapshot of one modality's entries, never over the
//! live store.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Category of indexed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Text, Modality::Image];
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Text => f.write_str("text"),
            Modality::Image => f.write_str("images"),
        }
    }
}

/// An entry in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// File modification time (seconds since the Unix epoch) when embedded
    pub mtime: f64,
}

impl IndexEntry {
    pub fn new(embedding: Vec<f32>, mtime: f64) -> Self {
        Self { embedding, mtime }
    }
}

/// A copy of one modality's mapping, taken under a brief read lock.
pub type Snapshot = HashMap<String, Arc<IndexEntry>>;

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    /// Cosine similarity score
    pub score: f32,
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between two vectors.
///
/// Zero-magnitude vectors and vectors of different dimensions score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot_product / (norm_a * norm_b)
}

/// Score every entry against `query`, keep those at or above `threshold`,
/// and return at most `limit` of them, best first. Equal scores are ordered
/// by ascending path.
pub fn rank(snapshot: &Snapshot, query: &[f32], threshold: f32, limit: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = snapshot
        .iter()
        .filter_map(|(path, entry)| {
            let score = cosine_similarity(query, &entry.embedding);
            // NaN never passes this comparison
            if score >= threshold {
                Some(SearchResult {
                    path: path.clone(),
                    score,
                })
            } else {
                None
            }
        })
        .collect();

    results.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.path.cmp(&b.path),
        other => other,
    });

    results.truncate(limit);
    results
}
