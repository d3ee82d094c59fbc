//! Persisted documents: migration history records and lock documents

use crate::migration::MigrationDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Document id prefix for lock documents
pub const LOCK_ID_PREFIX: &str = "lock";

/// Id of the lock document guarding `migration_key`
#[must_use]
pub fn lock_document_id(migration_key: &str) -> String {
    format!("{LOCK_ID_PREFIX}:{migration_key}")
}

/// Persisted fact that a migration definition was applied under a migration key
///
/// Created exactly once per successfully applied migration and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// Namespace the migration was applied under
    pub migration_key: String,

    /// Zero-based position of the definition among all definitions at apply time
    pub order: usize,

    pub filename: String,

    /// Raw dot-separated version string from the filename
    pub version: String,

    pub description: String,

    /// 32-bit fingerprint of the definition file's bytes
    pub checksum: i32,

    /// Operator identity, recorded for audit only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_by: Option<String>,

    /// When the migration finished
    pub installed_on: DateTime<Utc>,

    /// Execution time in milliseconds
    pub execution_time: i64,
}

impl MigrationRecord {
    /// Create a record for `definition` applied at position `order`
    #[must_use]
    pub fn new(
        migration_key: &str,
        order: usize,
        definition: &MigrationDefinition,
        installed_by: Option<String>,
        installed_on: DateTime<Utc>,
        execution_time: i64,
    ) -> Self {
        Self {
            migration_key: migration_key.to_string(),
            order,
            filename: definition.filename.clone(),
            version: definition.version.as_str().to_string(),
            description: definition.description.clone(),
            checksum: definition.checksum,
            installed_by,
            installed_on,
            execution_time,
        }
    }
}

/// Wire wrapper: records are stored as `{"migration": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDocument {
    pub migration: MigrationRecord,
}

impl From<MigrationRecord> for RecordDocument {
    fn from(migration: MigrationRecord) -> Self {
        Self { migration }
    }
}

/// Lock document payload
///
/// Its existence is the whole mutual-exclusion signal. There is no owner, no
/// heartbeat and no expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDocument {
    pub date: DateTime<Utc>,
}

impl LockDocument {
    /// Lock payload stamped with the current time
    #[must_use]
    pub fn now() -> Self {
        Self { date: Utc::now() }
    }

    /// Wire form: `{"lock": {"date": ...}}`
    #[must_use]
    pub fn to_document(&self) -> Value {
        json!({ LOCK_ID_PREFIX: self })
    }
}
