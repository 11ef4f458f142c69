//! Per-conversation timed-effect state.
//!
//! Only entries that were included in an earlier turn have an [`EntryState`].
//! Indices are the caller's message indices; no wall clock is involved.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use lorebook::{ConversationId, EntryId};

use crate::errors::StoreError;

/// Timing windows of one entry within one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryState {
    pub last_activated_at: u32,
    /// Last index at which the entry is force-included.
    pub sticky_until: Option<u32>,
    /// First index at which the entry may activate again.
    pub cooldown_until: Option<u32>,
}

impl EntryState {
    pub fn is_sticky(&self, index: u32) -> bool {
        self.sticky_until.is_some_and(|until| index <= until)
    }

    pub fn in_cooldown(&self, index: u32) -> bool {
        self.cooldown_until.is_some_and(|until| index < until)
    }
}

/// Timed-effect state of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub current_index: u32,
    pub entries: HashMap<EntryId, EntryState>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, id: &EntryId) -> Option<&EntryState> {
        self.entries.get(id)
    }

    /// Entries whose sticky window covers `index`.
    pub fn sticky_entries(&self, index: u32) -> impl Iterator<Item = &EntryId> {
        self.entries
            .iter()
            .filter(move |(_, state)| state.is_sticky(index))
            .map(|(id, _)| id)
    }

    /// Record an inclusion at `index`.
    ///
    /// Sticky and cooldown windows open only when `open_windows` is set. A
    /// carry-over that matched nothing this turn does not extend them.
    pub fn record_activation(
        &mut self,
        id: &EntryId,
        index: u32,
        sticky: u32,
        cooldown: u32,
        open_windows: bool,
    ) {
        let state = self.entries.entry(id.clone()).or_default();
        state.last_activated_at = index;
        if !open_windows {
            return;
        }
        if sticky > 0 {
            state.sticky_until = Some(index.saturating_add(sticky));
        }
        if cooldown > 0 {
            state.cooldown_until = Some(index.saturating_add(cooldown));
        }
    }
}

/// Storage for conversation state.
///
/// Sticky and cooldown guarantees hold only when one engine writes a given
/// conversation at a time. Engines in separate processes sharing a
/// conversation need a shared implementation of this trait; the in-memory
/// store does not synchronise across processes.
#[async_trait]
pub trait ConversationStateStore: Send + Sync {
    async fn load(&self, id: &ConversationId) -> Result<Option<ConversationState>, StoreError>;

    async fn save(&self, id: &ConversationId, state: ConversationState) -> Result<(), StoreError>;

    /// Drop a conversation's state; returns whether any existed.
    async fn remove(&self, id: &ConversationId) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct Slots {
    states: HashMap<ConversationId, (ConversationState, u64)>,
    clock: u64,
}

impl Slots {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Process-local state store with least-recently-used eviction.
#[derive(Debug)]
pub struct InMemoryConversationStore {
    max_conversations: usize,
    slots: Mutex<Slots>,
}

impl InMemoryConversationStore {
    pub fn new(max_conversations: usize) -> Self {
        Self {
            max_conversations: max_conversations.max(1),
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.slots.lock().states.contains_key(id)
    }
}

#[async_trait]
impl ConversationStateStore for InMemoryConversationStore {
    async fn load(&self, id: &ConversationId) -> Result<Option<ConversationState>, StoreError> {
        let mut slots = self.slots.lock();
        let now = slots.tick();
        Ok(slots.states.get_mut(id).map(|(state, touched)| {
            *touched = now;
            state.clone()
        }))
    }

    async fn save(&self, id: &ConversationId, state: ConversationState) -> Result<(), StoreError> {
        let mut slots = self.slots.lock();
        let now = slots.tick();
        slots.states.insert(id.clone(), (state, now));

        while slots.states.len() > self.max_conversations {
            let oldest = slots
                .states
                .iter()
                .min_by_key(|(_, (_, touched))| *touched)
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else { break };
            slots.states.remove(&oldest);
            debug!(conversation_id = %oldest, "evicted conversation state");
        }
        Ok(())
    }

    async fn remove(&self, id: &ConversationId) -> Result<bool, StoreError> {
        Ok(self.slots.lock().states.remove(id).is_some())
    }
}
