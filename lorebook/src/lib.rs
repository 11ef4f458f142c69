//! # Lorebook
//!
//! The data model for knowledge activation - knowledge entries, their typed
//! activation settings, and the conversation records the engine reads.
//! This crate is the single source of truth for entry shape and does not
//! contain any activation logic.

pub mod conversation;
pub mod entries;
pub mod mechanics;

pub use conversation::*;
pub use entries::*;
pub use mechanics::*;
