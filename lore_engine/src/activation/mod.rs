//! Per-turn knowledge activation.
//!
//! [`ActivationEngine`] drives the pipeline; the stage functions in
//! [`pipeline`] are public for reuse and testing. Timed-effect state lives in
//! a [`ConversationStateStore`] injected into the engine.

mod engine;
pub mod pipeline;
mod probability;
mod state;
mod types;

pub use engine::*;
pub use pipeline::HYBRID_VECTOR_WEIGHT;
pub use probability::*;
pub use state::*;
pub use types::*;
