//! Conversation records read by the activation engine: chat messages and the
//! bot and persona taking part.

use serde::{Deserialize, Serialize};

use crate::entries::{BotId, PersonaId};
use crate::mechanics::MessageRole;

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// The AI character a conversation is held with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Bot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: BotId::new(),
            name: name.into(),
            description: String::new(),
        }
    }
}

/// The identity the user speaks as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PersonaId::new(),
            name: name.into(),
            description: String::new(),
        }
    }
}
