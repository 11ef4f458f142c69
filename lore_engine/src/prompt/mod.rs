//! Prompt assembly from activated entries.
//!
//! Text positions are spliced into the base prompt by a [`PositionStrategy`]
//! each. `at_depth` entries never touch the text; they are inserted into the
//! message array instead.

mod strategies;

pub use strategies::*;

use std::collections::HashMap;

use lorebook::{Bot, ChatMessage, InsertionPosition, Persona};

use crate::activation::ActivatedEntry;

/// Splices activated entries into prompts and message arrays.
pub struct PromptBuilder {
    strategies: HashMap<InsertionPosition, Box<dyn PositionStrategy>>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        let mut strategies: HashMap<InsertionPosition, Box<dyn PositionStrategy>> =
            HashMap::new();
        strategies.insert(InsertionPosition::BeforeCharacter, Box::new(BeforeCharacter));
        strategies.insert(InsertionPosition::AfterCharacter, Box::new(AfterCharacter));
        strategies.insert(InsertionPosition::BeforeExamples, Box::new(BeforeExamples));
        strategies.insert(InsertionPosition::AfterExamples, Box::new(AfterExamples));
        strategies.insert(InsertionPosition::SystemTop, Box::new(SystemTop));
        strategies.insert(InsertionPosition::SystemBottom, Box::new(SystemBottom));
        Self { strategies }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the strategy of one text position.
    ///
    /// A strategy registered for `at_depth` is never consulted.
    pub fn with_strategy(
        mut self,
        position: InsertionPosition,
        strategy: impl PositionStrategy + 'static,
    ) -> Self {
        self.strategies.insert(position, Box::new(strategy));
        self
    }

    /// Entry text, prefixed with `[first tag]` when tagged.
    pub fn format_entry(activated: &ActivatedEntry) -> String {
        match activated.entry.first_tag() {
            Some(tag) => format!("[{}] {}", tag, activated.entry.content),
            None => activated.entry.content.clone(),
        }
    }

    /// Separate text-position entries from `at_depth` entries.
    pub fn split_depth_entries(
        entries: &[ActivatedEntry],
    ) -> (Vec<&ActivatedEntry>, Vec<&ActivatedEntry>) {
        entries
            .iter()
            .filter(|e| e.included)
            .partition(|e| e.position != InsertionPosition::AtDepth)
    }

    /// Splice every included text-position entry into `base_prompt`.
    ///
    /// Entries are grouped by position and ordered by ascending `order`
    /// within a group; each group is one block of newline-joined entries.
    pub fn build_prompt(
        &self,
        base_prompt: &str,
        entries: &[ActivatedEntry],
        bot: Option<&Bot>,
        persona: Option<&Persona>,
    ) -> String {
        let (text_entries, _) = Self::split_depth_entries(entries);
        if text_entries.is_empty() {
            return base_prompt.to_string();
        }

        let context = PromptContext {
            bot_name: bot.map(|b| b.name.as_str()),
            persona_name: persona.map(|p| p.name.as_str()),
        };

        let mut prompt = base_prompt.to_string();
        for position in InsertionPosition::TEXT_POSITIONS {
            let mut group: Vec<&ActivatedEntry> = text_entries
                .iter()
                .copied()
                .filter(|e| e.position == position)
                .collect();
            if group.is_empty() {
                continue;
            }
            group.sort_by_key(|e| e.order);

            let block = group
                .iter()
                .map(|e| Self::format_entry(e))
                .collect::<Vec<_>>()
                .join("\n");

            if let Some(strategy) = self.strategies.get(&position) {
                prompt = strategy.insert(&prompt, &block, &context);
            }
        }
        prompt
    }

    /// Insert `at_depth` entries into a copy of the message array.
    ///
    /// Each entry lands before index `max(0, len - depth)` of the original
    /// array, as a message with the entry's role. Entries sharing an index
    /// keep ascending `order`.
    pub fn build_messages_with_depth_entries(
        messages: &[ChatMessage],
        entries: &[ActivatedEntry],
    ) -> Vec<ChatMessage> {
        let (_, mut depth_entries) = Self::split_depth_entries(entries);
        if depth_entries.is_empty() {
            return messages.to_vec();
        }
        depth_entries.sort_by_key(|e| e.order);

        let len = messages.len();
        let mut inserts: Vec<(usize, ChatMessage)> = depth_entries
            .iter()
            .map(|e| {
                let at = len.saturating_sub(e.depth);
                (at, ChatMessage::new(e.role, Self::format_entry(e)))
            })
            .collect();
        // stable: keeps order within one index
        inserts.sort_by_key(|(at, _)| *at);

        let mut out = Vec::with_capacity(len + inserts.len());
        let mut pending = inserts.into_iter().peekable();
        for (index, message) in messages.iter().enumerate() {
            while let Some((_, injected)) = pending.next_if(|(at, _)| *at == index) {
                out.push(injected);
            }
            out.push(message.clone());
        }
        out.extend(pending.map(|(_, injected)| injected));
        out
    }
}

impl std::fmt::Debug for PromptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut positions: Vec<_> = self.strategies.keys().map(|p| p.as_str()).collect();
        positions.sort_unstable();
        f.debug_struct("PromptBuilder")
            .field("positions", &positions)
            .finish()
    }
}
