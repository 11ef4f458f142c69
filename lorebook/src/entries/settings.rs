//! Typed settings blocks attached to every knowledge entry.
//!
//! Stored documents may omit any field; every block implements `Default` so
//! that missing values are resolved once, when the document is decoded.

use serde::{Deserialize, Serialize};

use super::{BotId, PersonaId};
use crate::mechanics::{ActivationMode, InsertionPosition, MessageRole, SelectiveLogic};

/// Keyword and vector activation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationSettings {
    pub mode: ActivationMode,
    pub primary_keywords: Vec<String>,
    pub secondary_keywords: Vec<String>,
    pub selective_logic: SelectiveLogic,
    pub case_sensitive: bool,
    pub match_whole_words: bool,
    /// Treat every keyword as a regular expression.
    pub use_regex: bool,
    /// Minimum cosine similarity for the vector path (0.0 - 1.0).
    pub similarity_threshold: f64,
    /// Chance of activation, 0 - 100.
    pub probability: u8,
    pub use_probability: bool,
    /// Number of most recent messages searched for keywords.
    pub scan_depth: usize,
    pub scan_roles: ScanRoles,
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            mode: ActivationMode::Keyword,
            primary_keywords: Vec::new(),
            secondary_keywords: Vec::new(),
            selective_logic: SelectiveLogic::AndAny,
            case_sensitive: false,
            match_whole_words: false,
            use_regex: false,
            similarity_threshold: 0.7,
            probability: 100,
            use_probability: true,
            scan_depth: 5,
            scan_roles: ScanRoles::default(),
        }
    }
}

/// Message roles included in the keyword scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRoles {
    pub user: bool,
    pub assistant: bool,
    pub system: bool,
}

impl Default for ScanRoles {
    fn default() -> Self {
        Self {
            user: true,
            assistant: true,
            system: false,
        }
    }
}

impl ScanRoles {
    /// Check whether messages of a role are scanned.
    pub fn includes(&self, role: MessageRole) -> bool {
        match role {
            MessageRole::User => self.user,
            MessageRole::Assistant => self.assistant,
            MessageRole::System => self.system,
        }
    }
}

/// Placement of the entry in the outgoing prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Positioning {
    pub position: InsertionPosition,
    /// Messages from the end of the history, for `at_depth`.
    pub depth: usize,
    /// Role the entry speaks as when inserted as a message.
    pub role: MessageRole,
    /// Ascending sort key within a position.
    pub order: i32,
}

impl Default for Positioning {
    fn default() -> Self {
        Self {
            position: InsertionPosition::AfterCharacter,
            depth: 4,
            role: MessageRole::System,
            order: 100,
        }
    }
}

/// Timed effects, all measured in conversation turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdvancedActivation {
    /// Turns the entry stays force-active after activating.
    pub sticky: u32,
    /// Turns the entry is suppressed after activating.
    pub cooldown: u32,
    /// Message index before which the entry never activates.
    pub delay: u32,
}

/// Allow/deny gate over one kind of identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListFilter<T> {
    pub enabled: bool,
    pub allow: Vec<T>,
    pub deny: Vec<T>,
}

impl<T> Default for ListFilter<T> {
    fn default() -> Self {
        Self {
            enabled: false,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

impl<T: PartialEq> ListFilter<T> {
    /// Check whether the current identifier passes this gate.
    ///
    /// A disabled gate or an empty allow-list places no restriction. The
    /// deny-list is checked last and always wins.
    pub fn permits(&self, current: Option<&T>) -> bool {
        if !self.enabled {
            return true;
        }

        if !self.allow.is_empty() {
            match current {
                Some(id) if self.allow.contains(id) => {}
                _ => return false,
            }
        }

        match current {
            Some(id) => !self.deny.contains(id),
            None => true,
        }
    }
}

/// Bot and persona gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilterSettings {
    pub bots: ListFilter<BotId>,
    pub personas: ListFilter<PersonaId>,
}

impl FilterSettings {
    /// Check both gates for the current conversation.
    pub fn permits(&self, bot: Option<&BotId>, persona: Option<&PersonaId>) -> bool {
        self.bots.permits(bot) && self.personas.permits(persona)
    }
}

/// Token budget participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BudgetControl {
    /// Always include, regardless of the remaining budget.
    pub ignore_budget: bool,
    /// Explicit token cost, replacing the length estimate.
    pub token_cost: Option<u32>,
}

/// Group exclusivity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    pub group: Option<String>,
    pub use_group_scoring: bool,
    /// Multiplier applied to the activation score when groups compete.
    pub group_weight: f64,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            group: None,
            use_group_scoring: false,
            group_weight: 1.0,
        }
    }
}

impl GroupSettings {
    /// The group this entry competes in, if scoring applies.
    pub fn competing_group(&self) -> Option<&str> {
        match self.group.as_deref() {
            Some(name) if self.use_group_scoring && !name.trim().is_empty() => Some(name),
            _ => None,
        }
    }
}
