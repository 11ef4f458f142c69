//! In-process vector index with brute-force cosine search.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;

use lorebook::{EntryId, UserId};

use super::{ChunkMetadata, VectorIndex, VectorMatch, VectorQuery, KNOWLEDGE_SOURCE_TYPE};
use crate::errors::RetrievalError;

#[derive(Debug, Clone)]
struct StoredChunk {
    id: String,
    user_id: UserId,
    source_type: String,
    vector: Vec<f32>,
    metadata: ChunkMetadata,
}

/// Vector index held in memory, for tests and single-process deployments.
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dims: usize,
    chunks: Mutex<Vec<StoredChunk>>,
}

impl InMemoryVectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            chunks: Mutex::new(Vec::new()),
        }
    }

    /// Store a knowledge chunk, replacing any chunk with the same ID.
    pub fn upsert(
        &self,
        user_id: UserId,
        entry_id: EntryId,
        chunk_index: usize,
        chunk_text: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<(), RetrievalError> {
        if vector.len() != self.dims {
            return Err(RetrievalError::Index(format!(
                "dimension mismatch: expected {}, got {}",
                self.dims,
                vector.len()
            )));
        }

        let id = format!("{entry_id}#{chunk_index}");
        let chunk = StoredChunk {
            id: id.clone(),
            user_id,
            source_type: KNOWLEDGE_SOURCE_TYPE.to_string(),
            vector,
            metadata: ChunkMetadata {
                source_id: entry_id,
                chunk_index,
                chunk_text: chunk_text.into(),
            },
        };

        let mut chunks = self.chunks.lock();
        chunks.retain(|c| c.id != id);
        chunks.push(chunk);
        Ok(())
    }

    /// Remove every chunk of an entry.
    pub fn remove_entry(&self, entry_id: &EntryId) {
        self.chunks.lock().retain(|c| &c.metadata.source_id != entry_id);
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        query: &VectorQuery,
    ) -> Result<Vec<VectorMatch>, RetrievalError> {
        if vector.len() != self.dims {
            return Err(RetrievalError::Index(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dims,
                vector.len()
            )));
        }

        let chunks = self.chunks.lock();
        let mut matches: Vec<VectorMatch> = chunks
            .iter()
            .filter(|c| c.user_id == query.filter.user_id)
            .filter(|c| c.source_type == query.filter.source_type)
            .map(|c| VectorMatch {
                id: c.id.clone(),
                score: cosine_similarity(vector, &c.vector),
                metadata: c.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        matches.truncate(query.top_k);
        Ok(matches)
    }
}

/// Cosine similarity of two equal-length vectors; 0 when either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
