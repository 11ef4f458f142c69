//! Best-effort activation logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use lorebook::{ActivationMethod, ConversationId, EntryId, ExclusionReason, UserId};

use super::KnowledgeStore;
use crate::activation::ActivatedEntry;

/// One row per processed entry per activation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationLogRecord {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub entry_id: EntryId,
    pub message_index: u32,
    pub activation_method: ActivationMethod,
    pub activation_score: f64,
    pub matched_keywords: Vec<String>,
    pub vector_similarity: Option<f64>,
    /// Position name, or `at_depth:N`.
    pub position: String,
    pub token_cost: u32,
    pub included: bool,
    pub exclusion_reason: Option<ExclusionReason>,
    pub created_at: DateTime<Utc>,
}

impl ActivationLogRecord {
    pub fn from_activated(
        user_id: &UserId,
        conversation_id: &ConversationId,
        message_index: u32,
        activated: &ActivatedEntry,
    ) -> Self {
        Self {
            user_id: user_id.clone(),
            conversation_id: conversation_id.clone(),
            entry_id: activated.id().clone(),
            message_index,
            activation_method: activated.method,
            activation_score: activated.activation_score,
            matched_keywords: activated.matched_keywords.clone(),
            vector_similarity: activated.vector_similarity,
            position: activated.position_label(),
            token_cost: activated.token_cost,
            included: activated.included,
            exclusion_reason: activated.exclusion_reason,
            created_at: Utc::now(),
        }
    }
}

/// Writes activation log rows, swallowing every failure.
#[derive(Clone)]
pub struct ActivationLogger {
    store: Arc<dyn KnowledgeStore>,
    collection: String,
}

impl ActivationLogger {
    pub fn new(store: Arc<dyn KnowledgeStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Write every record and return how many were stored.
    pub async fn write_all(&self, records: Vec<ActivationLogRecord>) -> usize {
        let total = records.len();
        let mut written = 0;
        for record in records {
            let document = match serde_json::to_value(&record) {
                Ok(document) => document,
                Err(e) => {
                    warn!(entry_id = %record.entry_id, error = %e, "activation log encode failed");
                    continue;
                }
            };
            match self.store.create(&self.collection, document).await {
                Ok(_) => written += 1,
                Err(e) => {
                    warn!(entry_id = %record.entry_id, error = %e, "activation log write failed");
                }
            }
        }
        debug!(written, total, collection = %self.collection, "activation log flushed");
        written
    }
}

impl std::fmt::Debug for ActivationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationLogger")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}
