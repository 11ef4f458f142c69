//! Activation mechanics: modes, selective logic, insertion positions, roles,
//! and the reasons an entry can be dropped from a turn.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a stored string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// How an entry becomes eligible for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Keyword scan of recent messages.
    #[default]
    Keyword,
    /// Vector similarity against the recent conversation.
    Vector,
    /// Both keyword and vector paths.
    Hybrid,
    /// Always active.
    Constant,
    /// Never active.
    Disabled,
}

impl ActivationMode {
    /// Whether the keyword path scans entries in this mode.
    pub fn uses_keywords(&self) -> bool {
        matches!(self, ActivationMode::Keyword | ActivationMode::Hybrid)
    }

    /// Whether the vector path considers entries in this mode.
    pub fn uses_vectors(&self) -> bool {
        matches!(self, ActivationMode::Vector | ActivationMode::Hybrid)
    }
}

/// Rule combining primary and secondary keyword matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectiveLogic {
    /// At least one keyword from either list.
    #[default]
    AndAny,
    /// Every configured keyword in both lists.
    AndAll,
    /// Anything except both lists fully matched.
    NotAll,
    /// No keyword from either list.
    NotAny,
}

/// Where an activated entry is placed in the outgoing prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPosition {
    BeforeCharacter,
    #[default]
    AfterCharacter,
    BeforeExamples,
    AfterExamples,
    /// Spliced into the message array, `depth` messages from the end.
    AtDepth,
    SystemTop,
    SystemBottom,
}

impl InsertionPosition {
    /// All positions that splice into the text prompt, in splice order.
    pub const TEXT_POSITIONS: [InsertionPosition; 6] = [
        InsertionPosition::BeforeCharacter,
        InsertionPosition::AfterCharacter,
        InsertionPosition::BeforeExamples,
        InsertionPosition::AfterExamples,
        InsertionPosition::SystemTop,
        InsertionPosition::SystemBottom,
    ];

    /// The stored name of this position.
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertionPosition::BeforeCharacter => "before_character",
            InsertionPosition::AfterCharacter => "after_character",
            InsertionPosition::BeforeExamples => "before_examples",
            InsertionPosition::AfterExamples => "after_examples",
            InsertionPosition::AtDepth => "at_depth",
            InsertionPosition::SystemTop => "system_top",
            InsertionPosition::SystemBottom => "system_bottom",
        }
    }
}

impl std::fmt::Display for InsertionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsertionPosition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before_character" => Ok(InsertionPosition::BeforeCharacter),
            "after_character" => Ok(InsertionPosition::AfterCharacter),
            "before_examples" => Ok(InsertionPosition::BeforeExamples),
            "after_examples" => Ok(InsertionPosition::AfterExamples),
            "at_depth" => Ok(InsertionPosition::AtDepth),
            "system_top" => Ok(InsertionPosition::SystemTop),
            "system_bottom" => Ok(InsertionPosition::SystemBottom),
            other => Err(ParseEnumError::new("position", other)),
        }
    }
}

/// Author role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    #[default]
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

/// The path through which an entry entered the activation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMethod {
    Keyword,
    Vector,
    Constant,
    /// Carried over from an earlier turn by its sticky window.
    Sticky,
}

impl ActivationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationMethod::Keyword => "keyword",
            ActivationMethod::Vector => "vector",
            ActivationMethod::Constant => "constant",
            ActivationMethod::Sticky => "sticky",
        }
    }
}

/// Why an activated entry was left out of the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    BudgetExceeded,
    FilterExcluded,
    ProbabilityFailed,
    CooldownActive,
    DelayNotMet,
    GroupScoringLost,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::BudgetExceeded => "budget_exceeded",
            ExclusionReason::FilterExcluded => "filter_excluded",
            ExclusionReason::ProbabilityFailed => "probability_failed",
            ExclusionReason::CooldownActive => "cooldown_active",
            ExclusionReason::DelayNotMet => "delay_not_met",
            ExclusionReason::GroupScoringLost => "group_scoring_lost",
        }
    }
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
