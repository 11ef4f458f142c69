//! Token estimation and budget admission.
//!
//! Costs use a fixed heuristic of one token per four characters, plus a flat
//! formatting overhead when requested. Budget admission is greedy by
//! activation score; a score-per-token variant is available as an alternate
//! strategy.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use lorebook::{ExclusionReason, KnowledgeEntry};

use crate::activation::ActivatedEntry;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Tokens added per entry for formatting when requested.
pub const FORMATTING_OVERHEAD_TOKENS: u32 = 10;

/// Per-call token budget parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_context_tokens: u32,
    /// Share of the context window given to knowledge, 0 - 100.
    pub budget_percentage: u32,
    /// Hard cap regardless of the percentage.
    pub budget_cap_tokens: u32,
    pub reserved_for_conversation: u32,
    /// Entries admitted even past the budget.
    pub min_activations: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8192,
            budget_percentage: 25,
            budget_cap_tokens: 2048,
            reserved_for_conversation: 0,
            min_activations: 0,
        }
    }
}

impl BudgetConfig {
    /// `floor(min(max_context_tokens * pct / 100, cap))`.
    pub fn knowledge_budget(&self) -> u32 {
        let share = u64::from(self.max_context_tokens) * u64::from(self.budget_percentage) / 100;
        // bounded by the u32 cap
        share.min(u64::from(self.budget_cap_tokens)) as u32
    }
}

/// Result of budget admission.
#[derive(Debug, Clone, Default)]
pub struct BudgetAllocation {
    /// Admitted entries: budget-exempt ones first, then in admission order.
    pub included: Vec<ActivatedEntry>,
    /// Entries excluded with `budget_exceeded`.
    pub excluded: Vec<ActivatedEntry>,
    pub total_budget: u32,
    /// Tokens of admitted entries that count against the budget.
    pub budgeted_tokens: u32,
    /// Tokens of budget-exempt entries, reported only.
    pub unbudgeted_tokens: u32,
}

impl BudgetAllocation {
    pub fn total_tokens(&self) -> u32 {
        self.budgeted_tokens.saturating_add(self.unbudgeted_tokens)
    }

    pub fn budget_remaining(&self) -> u32 {
        self.total_budget.saturating_sub(self.budgeted_tokens)
    }
}

/// Estimates token costs and admits entries into a budget.
#[derive(Debug, Clone, Copy)]
pub struct BudgetManager {
    include_formatting_overhead: bool,
}

impl Default for BudgetManager {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BudgetManager {
    pub fn new(include_formatting_overhead: bool) -> Self {
        Self {
            include_formatting_overhead,
        }
    }

    /// `ceil(chars / 4)`, plus the formatting overhead when requested.
    pub fn estimate_tokens(text: &str, include_formatting: bool) -> u32 {
        let chars = text.chars().count();
        let base = chars.div_ceil(CHARS_PER_TOKEN) as u32;
        if include_formatting {
            base + FORMATTING_OVERHEAD_TOKENS
        } else {
            base
        }
    }

    /// Token cost of an entry: its explicit override, or the estimate.
    pub fn entry_cost(&self, entry: &KnowledgeEntry) -> u32 {
        entry
            .budget_control
            .token_cost
            .unwrap_or_else(|| Self::estimate_tokens(&entry.content, self.include_formatting_overhead))
    }

    /// Knowledge budget after the conversation reservation, floored at 0.
    pub fn calculate_budget(config: &BudgetConfig) -> u32 {
        config
            .knowledge_budget()
            .saturating_sub(config.reserved_for_conversation)
    }

    /// Greedy admission by descending score.
    pub fn apply_budget(&self, entries: Vec<ActivatedEntry>, budget: u32) -> BudgetAllocation {
        self.apply_budget_with_min(entries, budget, 0)
    }

    /// Greedy admission by descending score with a guaranteed floor.
    ///
    /// Budget-exempt entries are always admitted. The rest are admitted in
    /// score order until the next one would overflow the budget, except that
    /// the first `min_activations` are admitted unconditionally.
    pub fn apply_budget_with_min(
        &self,
        entries: Vec<ActivatedEntry>,
        budget: u32,
        min_activations: usize,
    ) -> BudgetAllocation {
        let (mut allocation, mut candidates) = split_exempt(entries, budget);
        candidates.sort_by(by_score_desc);

        let mut admitted = 0usize;
        let mut overflowed = false;
        for mut candidate in candidates {
            let next_total = allocation.budgeted_tokens.saturating_add(candidate.token_cost);
            if !overflowed && (admitted < min_activations || next_total <= budget) {
                allocation.budgeted_tokens = next_total;
                admitted += 1;
                candidate.include();
                allocation.included.push(candidate);
            } else {
                overflowed = true;
                candidate.exclude(ExclusionReason::BudgetExceeded);
                allocation.excluded.push(candidate);
            }
        }

        allocation
    }

    /// Knapsack approximation: admit by descending score per token, skipping
    /// entries that do not fit and continuing with smaller ones.
    pub fn optimize_budget_allocation(
        &self,
        entries: Vec<ActivatedEntry>,
        budget: u32,
    ) -> BudgetAllocation {
        let (mut allocation, mut candidates) = split_exempt(entries, budget);
        candidates.sort_by(|a, b| {
            score_per_token(b)
                .partial_cmp(&score_per_token(a))
                .unwrap_or(Ordering::Equal)
        });

        for mut candidate in candidates {
            let next_total = allocation.budgeted_tokens.saturating_add(candidate.token_cost);
            if next_total <= budget {
                allocation.budgeted_tokens = next_total;
                candidate.include();
                allocation.included.push(candidate);
            } else {
                candidate.exclude(ExclusionReason::BudgetExceeded);
                allocation.excluded.push(candidate);
            }
        }

        allocation
    }
}

fn split_exempt(entries: Vec<ActivatedEntry>, budget: u32) -> (BudgetAllocation, Vec<ActivatedEntry>) {
    let mut allocation = BudgetAllocation {
        total_budget: budget,
        ..BudgetAllocation::default()
    };
    let mut candidates = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.ignore_budget {
            allocation.unbudgeted_tokens = allocation.unbudgeted_tokens.saturating_add(entry.token_cost);
            allocation.included.push(entry);
        } else {
            candidates.push(entry);
        }
    }
    (allocation, candidates)
}

fn by_score_desc(a: &ActivatedEntry, b: &ActivatedEntry) -> Ordering {
    b.activation_score
        .partial_cmp(&a.activation_score)
        .unwrap_or(Ordering::Equal)
}

fn score_per_token(entry: &ActivatedEntry) -> f64 {
    if entry.token_cost == 0 {
        f64::INFINITY
    } else {
        entry.activation_score / f64::from(entry.token_cost)
    }
}
