//! Persistence boundary.
//!
//! The engine reads knowledge entries and writes activation log rows through
//! [`KnowledgeStore`]. Any document database can sit behind it; an in-memory
//! implementation is provided for tests and single-process use.

mod log;
mod store;

pub use log::*;
pub use store::*;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::StoreError;

/// Find/create access to a document store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Return at most `limit` documents of `collection` whose top-level
    /// fields equal those of `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert a document and return its ID.
    async fn create(&self, collection: &str, data: Value) -> Result<String, StoreError>;
}
