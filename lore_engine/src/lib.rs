//! # Lore Engine
//!
//! Hybrid knowledge activation. For each turn of a conversation with an AI
//! character this crate decides which `lorebook` entries are injected into the
//! prompt, where they go, and how many tokens they may use.
//!
//! ## Core Components
//!
//! - **matching**: keyword scan of recent messages with selective logic
//! - **retrieval**: vector similarity search through external services
//! - **budget**: token estimation and budget admission
//! - **prompt**: splices activated entries into prompt text or message arrays
//! - **activation**: the per-turn pipeline and per-conversation timed state
//! - **knowledge_base**: persistence boundary and activation logging
//!
//! ## Pipeline
//!
//! fetch -> keyword / vector / constant -> merge -> filter -> timed effects ->
//! probability -> group scoring -> budget -> state update -> log.
//!
//! Every stage is deterministic apart from the probability draw, which comes
//! from an injected [`ProbabilitySource`].

pub mod activation;
pub mod budget;
pub mod config;
pub mod errors;
pub mod knowledge_base;
pub mod matching;
pub mod prompt;
pub mod retrieval;

pub use activation::*;
pub use budget::*;
pub use config::*;
pub use errors::*;
pub use knowledge_base::*;
pub use matching::*;
pub use prompt::*;
pub use retrieval::*;
