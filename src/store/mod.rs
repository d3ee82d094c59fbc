//! Document store abstraction
//!
//! Provides the [`DocumentStore`] trait consumed by the migration engine, plus two
//! implementations:
//!
//! - [`ElasticsearchStore`]: talks to an Elasticsearch-compatible HTTP API
//! - [`MemoryStore`]: in-process store for tests and embedded use
//!
//! The migration lock depends on [`DocumentStore::create_if_absent`] being atomic
//! against concurrent callers. Neither the lock nor the migrator re-verify this.

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchStore;
pub use memory::MemoryStore;

use crate::migration::{MigrationRecord, RequestStep};
use serde_json::Value;
use thiserror::Error;

/// Store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document or container with this id already exists
    #[error("Conflict: [{id}] already exists")]
    Conflict { id: String },

    /// The store answered with a non-success status code
    #[error("Request [{method} {path}] failed with status {status}: {body}")]
    Status {
        status: u16,
        method: String,
        path: String,
        body: String,
    },

    /// The store could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or response payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other store errors
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether this error is the distinct create-if-absent conflict
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Filter for migration history queries
///
/// Always scoped to one migration key, optionally narrowed to one filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub migration_key: String,
    pub filename: Option<String>,
}

impl RecordFilter {
    /// Match every record under `migration_key`
    pub fn key(migration_key: impl Into<String>) -> Self {
        Self {
            migration_key: migration_key.into(),
            filename: None,
        }
    }

    /// Additionally require the record's filename to equal `filename`
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Whether `record` satisfies this filter
    #[must_use]
    pub fn matches(&self, record: &MigrationRecord) -> bool {
        record.migration_key == self.migration_key
            && self
                .filename
                .as_deref()
                .map_or(true, |filename| record.filename == filename)
    }
}

/// Capabilities the migration engine needs from a document store
///
/// All calls are synchronous. Implementations must be `Send + Sync` so one store
/// can be shared between the migrator, its lock, and other threads in the process.
pub trait DocumentStore: Send + Sync {
    /// Check whether the named container (index) exists
    fn container_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Create the named container with the given schema
    ///
    /// Returns [`StoreError::Conflict`] when the container already exists.
    fn create_container(&self, name: &str, schema: &Value) -> Result<(), StoreError>;

    /// Atomically create a document only if no document with `id` exists
    ///
    /// Returns [`StoreError::Conflict`] when the id is taken.
    fn create_if_absent(&self, container: &str, id: &str, document: &Value) -> Result<(), StoreError>;

    /// Delete a document by id. Deleting an absent document is not an error.
    fn delete_by_id(&self, container: &str, id: &str) -> Result<(), StoreError>;

    /// Query migration records, ordered by `order` ascending
    fn query_records(&self, container: &str, filter: &RecordFilter) -> Result<Vec<MigrationRecord>, StoreError>;

    /// Persist a migration record
    ///
    /// The write must be visible to an immediately following [`query_records`](Self::query_records).
    fn create_record(&self, container: &str, record: &MigrationRecord) -> Result<(), StoreError>;

    /// Execute one request step of a migration definition
    fn perform(&self, step: &RequestStep) -> Result<(), StoreError>;

    /// Release any resources held by the store client
    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
