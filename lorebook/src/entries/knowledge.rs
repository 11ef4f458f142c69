//! Knowledge entry definitions.

use serde::{Deserialize, Serialize};

use super::{
    ActivationSettings, AdvancedActivation, BudgetControl, EntryId, FilterSettings,
    GroupSettings, Positioning, UserId,
};
use crate::mechanics::{ActivationMode, InsertionPosition, SelectiveLogic};

/// A stored snippet of lore, fact or memory that can be injected into a prompt.
///
/// Entries are owned by a single user and are read-only to the activation
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: EntryId,
    pub user_id: UserId,

    /// Display name; never injected.
    #[serde(default)]
    pub name: String,

    /// Literal text injected into the prompt.
    pub content: String,

    /// Free-form tags; the first one prefixes the injected text.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub activation_settings: ActivationSettings,
    #[serde(default)]
    pub positioning: Positioning,
    #[serde(default)]
    pub advanced_activation: AdvancedActivation,
    #[serde(default)]
    pub filtering: FilterSettings,
    #[serde(default)]
    pub budget_control: BudgetControl,
    #[serde(default)]
    pub group_settings: GroupSettings,
}

impl KnowledgeEntry {
    /// Create a new keyword-mode entry with the given content.
    pub fn new(user_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            user_id,
            name: String::new(),
            content: content.into(),
            tags: Vec::new(),
            activation_settings: ActivationSettings::default(),
            positioning: Positioning::default(),
            advanced_activation: AdvancedActivation::default(),
            filtering: FilterSettings::default(),
            budget_control: BudgetControl::default(),
            group_settings: GroupSettings::default(),
        }
    }

    /// Set the entry ID.
    pub fn with_id(mut self, id: impl Into<EntryId>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the activation mode.
    pub fn with_mode(mut self, mode: ActivationMode) -> Self {
        self.activation_settings.mode = mode;
        self
    }

    /// Set the primary keyword list.
    pub fn with_primary_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.activation_settings.primary_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the secondary keyword list.
    pub fn with_secondary_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.activation_settings.secondary_keywords =
            keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the selective logic.
    pub fn with_logic(mut self, logic: SelectiveLogic) -> Self {
        self.activation_settings.selective_logic = logic;
        self
    }

    /// Set the activation probability (clamped to 0 - 100).
    pub fn with_probability(mut self, probability: u8) -> Self {
        self.activation_settings.probability = probability.min(100);
        self.activation_settings.use_probability = true;
        self
    }

    /// Set the insertion position.
    pub fn with_position(mut self, position: InsertionPosition) -> Self {
        self.positioning.position = position;
        self
    }

    /// Set the order within a position.
    pub fn with_order(mut self, order: i32) -> Self {
        self.positioning.order = order;
        self
    }

    /// Set the sticky, cooldown and delay windows.
    pub fn with_timing(mut self, sticky: u32, cooldown: u32, delay: u32) -> Self {
        self.advanced_activation = AdvancedActivation {
            sticky,
            cooldown,
            delay,
        };
        self
    }

    /// Set an explicit token cost.
    pub fn with_token_cost(mut self, tokens: u32) -> Self {
        self.budget_control.token_cost = Some(tokens);
        self
    }

    /// Exempt the entry from the token budget.
    pub fn ignoring_budget(mut self) -> Self {
        self.budget_control.ignore_budget = true;
        self
    }

    /// Place the entry in a scoring group.
    pub fn in_group(mut self, group: impl Into<String>, weight: f64) -> Self {
        self.group_settings = GroupSettings {
            group: Some(group.into()),
            use_group_scoring: true,
            group_weight: weight,
        };
        self
    }

    /// Check if the entry can ever activate.
    pub fn is_enabled(&self) -> bool {
        self.activation_settings.mode != ActivationMode::Disabled
    }

    /// The first tag, used as a label when injected.
    pub fn first_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }
}
