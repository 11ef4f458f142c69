//! Per-call activation records.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use lorebook::{
    ActivationMethod, BotId, ChatMessage, ConversationId, EntryId, ExclusionReason,
    InsertionPosition, KnowledgeEntry, MessageRole, PersonaId, UserId,
};

use crate::budget::BudgetConfig;

/// Everything the engine needs to know about the current turn.
#[derive(Debug, Clone)]
pub struct ActivationContext {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    /// Recent conversation history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Monotonic index of the current message in the conversation.
    pub current_index: u32,
    pub bot_id: Option<BotId>,
    pub persona_id: Option<PersonaId>,
    pub budget: BudgetConfig,
}

impl ActivationContext {
    pub fn new(
        user_id: UserId,
        conversation_id: ConversationId,
        messages: Vec<ChatMessage>,
        current_index: u32,
    ) -> Self {
        Self {
            user_id,
            conversation_id,
            messages,
            current_index,
            bot_id: None,
            persona_id: None,
            budget: BudgetConfig::default(),
        }
    }

    pub fn with_bot(mut self, bot_id: BotId) -> Self {
        self.bot_id = Some(bot_id);
        self
    }

    pub fn with_persona(mut self, persona_id: PersonaId) -> Self {
        self.persona_id = Some(persona_id);
        self
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }
}

/// One knowledge entry that matched at least one activation path this turn.
#[derive(Debug, Clone)]
pub struct ActivatedEntry {
    pub entry: Arc<KnowledgeEntry>,
    pub method: ActivationMethod,
    pub activation_score: f64,
    pub matched_keywords: Vec<String>,
    pub vector_similarity: Option<f64>,
    pub position: InsertionPosition,
    pub depth: usize,
    pub role: MessageRole,
    pub order: i32,
    pub token_cost: u32,
    pub ignore_budget: bool,
    pub group: Option<String>,
    pub group_weight: f64,
    pub included: bool,
    pub exclusion_reason: Option<ExclusionReason>,
    /// Kept in by an active sticky window rather than by its own match.
    pub sticky_forced: bool,
}

impl ActivatedEntry {
    /// Create an included record, resolving placement from the entry.
    pub fn new(
        entry: Arc<KnowledgeEntry>,
        method: ActivationMethod,
        activation_score: f64,
        token_cost: u32,
    ) -> Self {
        let positioning = entry.positioning;
        let ignore_budget = entry.budget_control.ignore_budget;
        let group = entry.group_settings.competing_group().map(str::to_string);
        let group_weight = entry.group_settings.group_weight;
        Self {
            entry,
            method,
            activation_score,
            matched_keywords: Vec::new(),
            vector_similarity: None,
            position: positioning.position,
            depth: positioning.depth,
            role: positioning.role,
            order: positioning.order,
            token_cost,
            ignore_budget,
            group,
            group_weight,
            included: true,
            exclusion_reason: None,
            sticky_forced: false,
        }
    }

    pub fn id(&self) -> &EntryId {
        &self.entry.id
    }

    /// Mark the record excluded.
    pub fn exclude(&mut self, reason: ExclusionReason) {
        self.included = false;
        self.exclusion_reason = Some(reason);
    }

    /// Restore an excluded record.
    pub fn include(&mut self) {
        self.included = true;
        self.exclusion_reason = None;
    }

    /// Score used when entries of one group compete.
    pub fn group_score(&self) -> f64 {
        self.activation_score * self.group_weight
    }

    /// Position as recorded in activation logs.
    pub fn position_label(&self) -> String {
        match self.position {
            InsertionPosition::AtDepth => format!("at_depth:{}", self.depth),
            other => other.as_str().to_string(),
        }
    }
}

/// Outcome of an activation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationSummary {
    pub total_tokens: u32,
    pub total_budget: u32,
    pub budget_remaining: u32,
    pub entries_excluded_by_budget: usize,
    pub entries_excluded_by_filter: usize,
    pub entries_excluded_by_probability: usize,
    pub entries_excluded_by_cooldown: usize,
    pub entries_excluded_by_delay: usize,
    pub entries_excluded_by_group_scoring: usize,
}

impl ActivationSummary {
    /// Count one exclusion.
    pub fn record_exclusion(&mut self, reason: ExclusionReason) {
        let counter = match reason {
            ExclusionReason::BudgetExceeded => &mut self.entries_excluded_by_budget,
            ExclusionReason::FilterExcluded => &mut self.entries_excluded_by_filter,
            ExclusionReason::ProbabilityFailed => &mut self.entries_excluded_by_probability,
            ExclusionReason::CooldownActive => &mut self.entries_excluded_by_cooldown,
            ExclusionReason::DelayNotMet => &mut self.entries_excluded_by_delay,
            ExclusionReason::GroupScoringLost => &mut self.entries_excluded_by_group_scoring,
        };
        *counter += 1;
    }

    /// Total number of excluded entries.
    pub fn total_excluded(&self) -> usize {
        self.entries_excluded_by_budget
            + self.entries_excluded_by_filter
            + self.entries_excluded_by_probability
            + self.entries_excluded_by_cooldown
            + self.entries_excluded_by_delay
            + self.entries_excluded_by_group_scoring
    }
}

/// Included entries plus aggregate counts.
#[derive(Debug, Clone, Default)]
pub struct ActivationResult {
    /// Entries to inject, in admission order.
    pub activated_entries: Vec<ActivatedEntry>,
    pub summary: ActivationSummary,
}

impl ActivationResult {
    /// A result carrying no knowledge, used when activation degrades.
    pub fn empty(total_budget: u32) -> Self {
        Self {
            activated_entries: Vec::new(),
            summary: ActivationSummary {
                total_budget,
                budget_remaining: total_budget,
                ..ActivationSummary::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.activated_entries.is_empty()
    }

    /// Look up an included entry by ID.
    pub fn get(&self, id: &EntryId) -> Option<&ActivatedEntry> {
        self.activated_entries.iter().find(|a| a.id() == id)
    }
}
