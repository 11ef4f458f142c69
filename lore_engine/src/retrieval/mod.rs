//! Vector retrieval through external embedding and index services.
//!
//! The retriever embeds the recent conversation and asks the index for
//! nearest neighbours. It never computes embeddings itself; both services are
//! injected as trait objects. All failures are [`RetrievalError`]s, which the
//! activation engine treats as "no vector results this turn".

mod memory;

pub use memory::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use lorebook::{ChatMessage, EntryId, UserId};

use crate::errors::RetrievalError;

/// Source type stored in index metadata for knowledge chunks.
pub const KNOWLEDGE_SOURCE_TYPE: &str = "knowledge";

/// Turns text into a vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Nearest-neighbour search by cosine similarity.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `query.top_k` matches, most similar first.
    async fn query(
        &self,
        vector: &[f32],
        query: &VectorQuery,
    ) -> Result<Vec<VectorMatch>, RetrievalError>;
}

/// Index query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub top_k: usize,
    pub filter: VectorFilter,
}

/// Requester scope applied by the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorFilter {
    pub user_id: UserId,
    pub source_type: String,
}

/// Metadata stored with every indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// The knowledge entry this chunk belongs to.
    pub source_id: EntryId,
    pub chunk_index: usize,
    pub chunk_text: String,
}

/// One index hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity, higher is closer.
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// Options for [`VectorRetriever::retrieve_relevant`].
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub user_id: UserId,
    pub similarity_threshold: f64,
    pub max_results: usize,
}

/// A chunk that passed the similarity threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub entry_id: EntryId,
    pub similarity: f64,
    pub chunk_index: usize,
    pub chunk_text: String,
}

/// Stateless wrapper over the embedding service and vector index.
#[derive(Clone)]
pub struct VectorRetriever {
    embeddings: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
}

impl VectorRetriever {
    pub fn new(embeddings: Arc<dyn EmbeddingService>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    /// Join the content of the last `window` messages.
    pub fn build_query(messages: &[ChatMessage], window: usize) -> String {
        let start = messages.len().saturating_sub(window);
        messages[start..]
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Embed the query and return chunks at or above the threshold.
    ///
    /// Twice `max_results` candidates are requested to leave room for the
    /// threshold filter. Results keep the index's order.
    pub async fn retrieve_relevant(
        &self,
        query_text: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if query_text.trim().is_empty() || options.max_results == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed(query_text).await?;
        let query = VectorQuery {
            top_k: options.max_results.saturating_mul(2),
            filter: VectorFilter {
                user_id: options.user_id.clone(),
                source_type: KNOWLEDGE_SOURCE_TYPE.to_string(),
            },
        };
        let matches = self.index.query(&vector, &query).await?;
        let candidates = matches.len();

        let chunks: Vec<RetrievedChunk> = matches
            .into_iter()
            .filter(|m| m.score >= options.similarity_threshold)
            .take(options.max_results)
            .map(|m| RetrievedChunk {
                entry_id: m.metadata.source_id,
                similarity: m.score,
                chunk_index: m.metadata.chunk_index,
                chunk_text: m.metadata.chunk_text,
            })
            .collect();

        debug!(
            candidates,
            kept = chunks.len(),
            threshold = options.similarity_threshold,
            "vector retrieval complete"
        );
        Ok(chunks)
    }
}

impl std::fmt::Debug for VectorRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorRetriever").finish_non_exhaustive()
    }
}
