//! Knowledge entry definitions and the identifiers shared across the system.

mod knowledge;
mod settings;

pub use knowledge::*;
pub use settings::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Opaque identifier of a knowledge entry, unique within its owner.
    EntryId
);
string_id!(
    /// Identifier of the user who owns entries, bots and personas.
    UserId
);
string_id!(
    /// Identifier of a bot (the AI character).
    BotId
);
string_id!(
    /// Identifier of a persona (the user's in-chat identity).
    PersonaId
);
string_id!(
    /// Identifier of a conversation; keys per-conversation activation state.
    ConversationId
);
