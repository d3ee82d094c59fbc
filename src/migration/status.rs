//! Migration status tracking

use crate::migration::{MigrationDefinition, MigrationRecord};

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Applied migrations (from the history index)
    pub applied: Vec<MigrationRecord>,

    /// Pending migrations (from the migrations directory)
    pub pending: Vec<PendingMigration>,

    /// Total number of migrations (applied + pending)
    pub total: usize,

    /// Number of applied migrations
    pub applied_count: usize,

    /// Number of pending migrations
    pub pending_count: usize,
}

/// A migration definition not yet applied under the migration key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    /// Position the migration will be recorded with
    pub order: usize,
    pub filename: String,
    pub version: String,
    pub description: String,
    pub checksum: i32,
    pub steps: usize,
}

impl PendingMigration {
    fn from_definition(order: usize, definition: &MigrationDefinition) -> Self {
        Self {
            order,
            filename: definition.filename.clone(),
            version: definition.version.to_string(),
            description: definition.description.clone(),
            checksum: definition.checksum,
            steps: definition.steps.len(),
        }
    }
}

impl MigrationStatus {
    /// Create a new `MigrationStatus`
    #[must_use]
    pub fn new(applied: Vec<MigrationRecord>, pending: Vec<PendingMigration>) -> Self {
        let applied_count = applied.len();
        let pending_count = pending.len();
        let total = applied_count + pending_count;

        Self {
            applied,
            pending,
            total,
            applied_count,
            pending_count,
        }
    }

    /// Split verified definitions into applied and pending
    ///
    /// `history` must already have passed integrity verification against
    /// `definitions`, so it covers exactly the leading definitions.
    #[must_use]
    pub fn from_verified(definitions: &[MigrationDefinition], history: Vec<MigrationRecord>) -> Self {
        let pending = definitions
            .iter()
            .enumerate()
            .skip(history.len())
            .map(|(order, definition)| PendingMigration::from_definition(order, definition))
            .collect();
        Self::new(history, pending)
    }

    /// Check if all migrations are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0
    }

    /// Version of the most recently applied migration
    #[must_use]
    pub fn latest_applied_version(&self) -> Option<&str> {
        self.applied.last().map(|m| m.version.as_str())
    }

    /// The next migration that would run
    #[must_use]
    pub fn next_pending(&self) -> Option<&PendingMigration> {
        self.pending.first()
    }
}
