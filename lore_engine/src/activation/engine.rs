//! The activation engine.
//!
//! One call to [`ActivationEngine::activate`] runs, in order: fetch, keyword /
//! vector / constant activation, merge, filters, timed effects, probability,
//! group scoring, budget, state update and logging. Only the entry fetch and
//! the state store can fail the call; the vector path and log writes degrade
//! silently.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use lorebook::{
    ActivationMethod, ActivationMode, ChatMessage, ConversationId, KnowledgeEntry, UserId,
};

use super::pipeline::{
    apply_filters, apply_group_scoring, apply_probability, apply_timed_effects,
    merge_activations, update_conversation_state,
};
use super::probability::{ProbabilitySource, RandomProbability};
use super::state::{ConversationState, ConversationStateStore, InMemoryConversationStore};
use super::types::{ActivatedEntry, ActivationContext, ActivationResult, ActivationSummary};
use crate::budget::BudgetManager;
use crate::config::{EngineConfig, LogMode};
use crate::errors::{ActivationError, Result, RetrievalError};
use crate::knowledge_base::{ActivationLogRecord, ActivationLogger, KnowledgeStore};
use crate::matching::{KeywordMatcher, ScanConfig};
use crate::retrieval::{EmbeddingService, RetrievalOptions, VectorIndex, VectorRetriever};

/// Score of a constant entry.
pub const CONSTANT_SCORE: f64 = 100.0;

/// Multiplier turning a cosine similarity into an activation score.
pub const VECTOR_SCORE_SCALE: f64 = 100.0;

/// Orchestrates one activation call per conversation turn.
pub struct ActivationEngine {
    store: Arc<dyn KnowledgeStore>,
    state_store: Arc<dyn ConversationStateStore>,
    retriever: Option<VectorRetriever>,
    probability: Arc<dyn ProbabilitySource>,
    matcher: KeywordMatcher,
    budget: BudgetManager,
    logger: ActivationLogger,
    config: EngineConfig,
}

impl ActivationEngine {
    /// Create an engine with in-memory conversation state and no vector
    /// services.
    pub fn new(store: Arc<dyn KnowledgeStore>, config: EngineConfig) -> Self {
        let state_store = Arc::new(InMemoryConversationStore::new(
            config.state.max_conversations,
        ));
        let logger = ActivationLogger::new(store.clone(), config.activation_log_collection.clone());
        Self {
            store,
            state_store,
            retriever: None,
            probability: Arc::new(RandomProbability),
            matcher: KeywordMatcher::new(),
            budget: BudgetManager::new(config.budget.include_formatting_overhead),
            logger,
            config,
        }
    }

    pub fn with_state_store(mut self, state_store: Arc<dyn ConversationStateStore>) -> Self {
        self.state_store = state_store;
        self
    }

    pub fn with_vector_services(
        mut self,
        embeddings: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        self.retriever = Some(VectorRetriever::new(embeddings, index));
        self
    }

    pub fn with_probability(mut self, probability: Arc<dyn ProbabilitySource>) -> Self {
        self.probability = probability;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decide which entries are injected this turn.
    pub async fn activate(&self, context: &ActivationContext) -> Result<ActivationResult> {
        let entries = self.load_entries(&context.user_id).await?;
        let mut state = self
            .state_store
            .load(&context.conversation_id)
            .await
            .map_err(ActivationError::State)?
            .unwrap_or_default();
        let index = context.current_index;

        let (keyword, vector) = tokio::join!(
            async { self.keyword_activations(&entries, context) },
            self.vector_activations(&entries, context),
        );
        let constant = self.constant_activations(&entries);

        let mut processed = merge_activations(keyword, vector, constant);
        self.carry_over_sticky(&mut processed, &entries, &state, index);

        apply_filters(
            &mut processed,
            context.bot_id.as_ref(),
            context.persona_id.as_ref(),
        );
        apply_timed_effects(&mut processed, &state, index);
        apply_probability(&mut processed, self.probability.as_ref());
        apply_group_scoring(&mut processed);

        let (eligible, mut excluded): (Vec<_>, Vec<_>) =
            processed.into_iter().partition(|a| a.included);
        let total_budget = context.budget.knowledge_budget();
        let allocation = self.budget.apply_budget_with_min(
            eligible,
            total_budget,
            context.budget.min_activations,
        );

        update_conversation_state(&mut state, &allocation.included, index);
        self.state_store
            .save(&context.conversation_id, state)
            .await
            .map_err(ActivationError::State)?;

        let mut summary = ActivationSummary {
            total_tokens: allocation.total_tokens(),
            total_budget,
            budget_remaining: allocation.budget_remaining(),
            ..ActivationSummary::default()
        };
        excluded.extend(allocation.excluded);
        for record in &excluded {
            if let Some(reason) = record.exclusion_reason {
                summary.record_exclusion(reason);
            }
        }

        self.write_logs(context, &allocation.included, &excluded).await;

        debug!(
            user_id = %context.user_id,
            conversation_id = %context.conversation_id,
            message_index = index,
            candidates = entries.len(),
            included = allocation.included.len(),
            excluded = summary.total_excluded(),
            total_tokens = summary.total_tokens,
            budget_remaining = summary.budget_remaining,
            "knowledge activation complete"
        );

        Ok(ActivationResult {
            activated_entries: allocation.included,
            summary,
        })
    }

    /// Like [`activate`](Self::activate), but a failed call yields an empty
    /// result so the chat message can still be sent.
    pub async fn activate_or_empty(&self, context: &ActivationContext) -> ActivationResult {
        match self.activate(context).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    code = e.code(),
                    error = %e,
                    conversation_id = %context.conversation_id,
                    "activation failed, continuing without knowledge"
                );
                ActivationResult::empty(context.budget.knowledge_budget())
            }
        }
    }

    /// A turn context whose budget comes from `budget.defaults` in the
    /// engine configuration.
    pub fn context(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        messages: Vec<ChatMessage>,
        current_index: u32,
    ) -> ActivationContext {
        ActivationContext::new(user_id, conversation_id, messages, current_index)
            .with_budget(self.config.budget.defaults)
    }

    /// Forget all timed-effect state of a conversation.
    pub async fn reset_conversation(&self, id: &ConversationId) -> Result<bool> {
        let removed = self
            .state_store
            .remove(id)
            .await
            .map_err(ActivationError::State)?;
        if removed {
            info!(conversation_id = %id, "conversation state reset");
        }
        Ok(removed)
    }

    /// Current timed-effect state of a conversation.
    pub async fn conversation_state(&self, id: &ConversationId) -> Result<Option<ConversationState>> {
        self.state_store.load(id).await.map_err(ActivationError::State)
    }

    async fn load_entries(&self, user_id: &UserId) -> Result<Vec<Arc<KnowledgeEntry>>> {
        let limit = self.config.entry_fetch_limit;
        let filter = json!({ "user_id": user_id.as_str() });
        let mut documents = self
            .store
            .find(&self.config.entries_collection, &filter, limit.saturating_add(1))
            .await
            .map_err(ActivationError::EntryFetch)?;

        if documents.len() > limit {
            warn!(
                user_id = %user_id,
                limit,
                "knowledge entry limit reached, remaining entries ignored this turn"
            );
            documents.truncate(limit);
        }

        let mut entries = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("<unknown>")
                .to_string();
            let entry: KnowledgeEntry = serde_json::from_value(document)
                .map_err(|source| ActivationError::MalformedEntry { id, source })?;
            if entry.is_enabled() {
                entries.push(Arc::new(entry));
            }
        }
        Ok(entries)
    }

    fn keyword_activations(
        &self,
        entries: &[Arc<KnowledgeEntry>],
        context: &ActivationContext,
    ) -> Vec<ActivatedEntry> {
        entries
            .iter()
            .filter(|e| e.activation_settings.mode.uses_keywords())
            .filter_map(|entry| {
                let scan = ScanConfig::from(&entry.activation_settings);
                let found = self.matcher.match_entry(entry, &context.messages, &scan);
                if !found.matched {
                    return None;
                }
                let cost = self.budget.entry_cost(entry);
                let mut activated =
                    ActivatedEntry::new(entry.clone(), ActivationMethod::Keyword, found.score, cost);
                activated.matched_keywords = found.matched_keywords;
                Some(activated)
            })
            .collect()
    }

    fn vector_retriever(&self) -> std::result::Result<&VectorRetriever, RetrievalError> {
        self.retriever.as_ref().ok_or(RetrievalError::NotConfigured)
    }

    async fn vector_activations(
        &self,
        entries: &[Arc<KnowledgeEntry>],
        context: &ActivationContext,
    ) -> Vec<ActivatedEntry> {
        let candidates: HashMap<_, _> = entries
            .iter()
            .filter(|e| e.activation_settings.mode.uses_vectors())
            .map(|e| (e.id.clone(), e))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let vector = &self.config.vector;
        if !vector.enabled {
            debug!("vector path disabled by configuration");
            return Vec::new();
        }
        let retriever = match self.vector_retriever() {
            Ok(retriever) => retriever,
            Err(e) => {
                warn!(error = %e, candidates = candidates.len(), "skipping vector activation");
                return Vec::new();
            }
        };

        let threshold = candidates
            .values()
            .map(|e| e.activation_settings.similarity_threshold)
            .fold(vector.similarity_threshold, f64::min);
        let options = RetrievalOptions {
            user_id: context.user_id.clone(),
            similarity_threshold: threshold,
            max_results: vector.max_results,
        };
        let query = VectorRetriever::build_query(&context.messages, vector.query_window);

        let chunks = match retriever.retrieve_relevant(&query, &options).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "vector retrieval failed, continuing without vector results");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut activated = Vec::new();
        for chunk in chunks {
            let Some(entry) = candidates.get(&chunk.entry_id) else {
                continue;
            };
            if chunk.similarity < entry.activation_settings.similarity_threshold {
                continue;
            }
            if !seen.insert(chunk.entry_id.clone()) {
                continue;
            }
            let cost = self.budget.entry_cost(entry);
            let mut hit = ActivatedEntry::new(
                Arc::clone(entry),
                ActivationMethod::Vector,
                chunk.similarity * VECTOR_SCORE_SCALE,
                cost,
            );
            hit.vector_similarity = Some(chunk.similarity);
            activated.push(hit);
        }
        activated
    }

    fn constant_activations(&self, entries: &[Arc<KnowledgeEntry>]) -> Vec<ActivatedEntry> {
        entries
            .iter()
            .filter(|e| e.activation_settings.mode == ActivationMode::Constant)
            .map(|entry| {
                let cost = self.budget.entry_cost(entry);
                ActivatedEntry::new(entry.clone(), ActivationMethod::Constant, CONSTANT_SCORE, cost)
            })
            .collect()
    }

    /// Re-add entries inside a sticky window that matched nothing this turn.
    fn carry_over_sticky(
        &self,
        processed: &mut Vec<ActivatedEntry>,
        entries: &[Arc<KnowledgeEntry>],
        state: &ConversationState,
        index: u32,
    ) {
        let present: HashSet<_> = processed.iter().map(|a| a.id().clone()).collect();
        let sticky: HashSet<_> = state
            .sticky_entries(index)
            .filter(|id| !present.contains(*id))
            .collect();
        if sticky.is_empty() {
            return;
        }

        for entry in entries.iter().filter(|e| sticky.contains(&e.id)) {
            let cost = self.budget.entry_cost(entry);
            let mut carried = ActivatedEntry::new(entry.clone(), ActivationMethod::Sticky, 0.0, cost);
            carried.sticky_forced = true;
            processed.push(carried);
        }
    }

    async fn write_logs(
        &self,
        context: &ActivationContext,
        included: &[ActivatedEntry],
        excluded: &[ActivatedEntry],
    ) {
        let logging = &self.config.logging;
        if !logging.enabled {
            return;
        }

        let records: Vec<ActivationLogRecord> = included
            .iter()
            .chain(excluded)
            .map(|activated| {
                ActivationLogRecord::from_activated(
                    &context.user_id,
                    &context.conversation_id,
                    context.current_index,
                    activated,
                )
            })
            .collect();
        if records.is_empty() {
            return;
        }

        match logging.mode {
            LogMode::Inline => {
                self.logger.write_all(records).await;
            }
            LogMode::Background => {
                let logger = self.logger.clone();
                tokio::spawn(async move {
                    logger.write_all(records).await;
                });
            }
        }
    }
}

impl std::fmt::Debug for ActivationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationEngine")
            .field("vector_services", &self.retriever.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
