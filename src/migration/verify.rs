//! Integrity verification of migration history against loaded definitions

use crate::migration::{MigrationDefinition, MigrationError, MigrationRecord};
use log::info;

/// Reconcile persisted history with the ordered definitions
///
/// Runs once per execution before anything is applied. Checks, in order:
///
/// 1. history is not longer than the definition list
/// 2. history orders are gapless: the last record has order `len - 1`
/// 3. every record has a definition with the same filename
/// 4. every record's order, version, description, checksum and migration key
///    equal those of its definition
///
/// The first failing check is returned.
pub fn verify_integrity(
    definitions: &[MigrationDefinition],
    history: &[MigrationRecord],
    migration_key: &str,
) -> Result<(), MigrationError> {
    info!("Verifying integrity of migration history against migration files");

    if history.len() > definitions.len() {
        return Err(MigrationError::HistoryExceedsDefinitions {
            history: history.len(),
            definitions: definitions.len(),
        });
    }

    if let Some(last) = history.last() {
        if last.order != history.len() - 1 {
            return Err(MigrationError::HistoryGap {
                history: history.len(),
                last_order: last.order,
            });
        }
    }

    for record in history {
        let (position, definition) = definitions
            .iter()
            .enumerate()
            .find(|(_, definition)| definition.filename == record.filename)
            .ok_or_else(|| MigrationError::MissingDefinition {
                filename: record.filename.clone(),
            })?;

        let modified = |field: &'static str, stored: String, current: String| MigrationError::Modified {
            filename: record.filename.clone(),
            field,
            stored,
            current,
        };

        if record.order != position {
            return Err(modified("order", record.order.to_string(), position.to_string()));
        }
        if record.version != definition.version.as_str() {
            return Err(modified("version", record.version.clone(), definition.version.to_string()));
        }
        if record.description != definition.description {
            return Err(modified("description", record.description.clone(), definition.description.clone()));
        }
        if record.checksum != definition.checksum {
            return Err(modified("checksum", record.checksum.to_string(), definition.checksum.to_string()));
        }
        if record.migration_key != migration_key {
            return Err(modified("migration key", record.migration_key.clone(), migration_key.to_string()));
        }
    }

    info!("Integrity checks passed");
    Ok(())
}
