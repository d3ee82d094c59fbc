//! Migration-specific error types

use crate::migration::lock::LockError;
use crate::store::StoreError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Migration-specific errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Migration directory does not exist or is not a directory
    #[error("Migration directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// File system error while listing or reading migration files
    #[error("Failed to read migration file [{filename}]: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Selected file name does not match `V<version>__<description>.<ext>`
    #[error("Migration file name [{0}] does not match expected pattern V<version>__<description>.<ext>")]
    InvalidFilename(String),

    /// Definition body could not be parsed
    #[error("Failed to parse migration file [{filename}]: {source}")]
    Parse {
        filename: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Definition parsed but is not usable
    #[error("Invalid migration file [{filename}]: {reason}")]
    InvalidDefinition { filename: String, reason: String },

    /// More history records than migration files
    #[error(
        "Migration history shows {history} applied migration(s) but only {definitions} migration file(s) are defined.\n\
         Were migration files removed or renamed, or is the migration key wrong?"
    )]
    HistoryExceedsDefinitions { history: usize, definitions: usize },

    /// History is not a gapless zero-based sequence
    #[error(
        "Migration history appears corrupt: {history} record(s) exist but the last has order {last_order}.\n\
         Records appear to have been deleted."
    )]
    HistoryGap { history: usize, last_order: usize },

    /// A history record has no matching migration file
    #[error("No migration file matches history record [{filename}]")]
    MissingDefinition { filename: String },

    /// A migration file changed after being applied
    #[error(
        "Migration file [{filename}] has been modified after being applied.\n\
         Stored {field}: {stored}\n\
         Current {field}: {current}\n\
         Did you refactor migration files after a previous execution?"
    )]
    Modified {
        filename: String,
        field: &'static str,
        stored: String,
        current: String,
    },

    /// Lock could not be acquired within the bound
    #[error(
        "Failed to acquire migration lock for key [{migration_key}] within {timeout:?}.\n\
         This is likely a stuck lock from a crashed process and requires manual intervention:\n\
         verify no migration is running, then delete document [{lock_id}]"
    )]
    LockTimeout {
        migration_key: String,
        lock_id: String,
        timeout: Duration,
    },

    /// A request step failed; remaining steps of the migration were not run
    #[error("Failed to execute request in position [{position}] of migration file [{filename}]")]
    StepFailed {
        filename: String,
        position: usize,
        #[source]
        source: StoreError,
    },

    /// Store error outside of step execution
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Lock error
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// A single migration failed
    #[error("Failed to execute migration file [{filename}]")]
    Migration {
        filename: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// Wrapper for any failure of a whole execution
    #[error("Failed to run migration execution for key [{migration_key}]")]
    Run {
        migration_key: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// The innermost migration error, unwrapping run and per-migration wrappers
    #[must_use]
    pub fn cause(&self) -> &MigrationError {
        match self {
            MigrationError::Run { source, .. } | MigrationError::Migration { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Whether this error was raised before any migration ran
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self.cause(),
            MigrationError::HistoryExceedsDefinitions { .. }
                | MigrationError::HistoryGap { .. }
                | MigrationError::MissingDefinition { .. }
                | MigrationError::Modified { .. }
        )
    }

    /// Format error with full details including the error chain
    #[must_use]
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {self}\n");

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {depth}: {err}"));
            source = err.source();
            depth += 1;
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_unwraps_nested_errors() {
        let err = MigrationError::Run {
            migration_key: "orders".to_string(),
            source: Box::new(MigrationError::Migration {
                filename: "V1__Init.yml".to_string(),
                source: Box::new(MigrationError::HistoryGap { history: 3, last_order: 4 }),
            }),
        };

        assert!(matches!(err.cause(), MigrationError::HistoryGap { .. }));
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let err = MigrationError::Run {
            migration_key: "orders".to_string(),
            source: Box::new(MigrationError::StepFailed {
                filename: "V1__Init.yml".to_string(),
                position: 1,
                source: StoreError::Transport("connection refused".to_string()),
            }),
        };

        let detailed = err.format_detailed();
        assert!(detailed.contains("key [orders]"));
        assert!(detailed.contains("position [1]"));
        assert!(detailed.contains("connection refused"));
    }

    #[test]
    fn test_lock_timeout_names_lock_document() {
        let err = MigrationError::LockTimeout {
            migration_key: "orders".to_string(),
            lock_id: "lock:orders".to_string(),
            timeout: Duration::from_secs(300),
        };
        let message = err.to_string();
        assert!(message.contains("lock:orders"));
        assert!(message.contains("manual intervention"));
    }
}
