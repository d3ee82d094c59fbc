//! Migration history index management

use crate::store::{DocumentStore, StoreError};
use log::info;
use serde_json::{json, Value};

/// Default name of the index holding history records and lock documents
pub const DEFAULT_HISTORY_INDEX: &str = ".tidemark";

/// Mapping for the history index
///
/// Records live under `migration`, lock documents under `lock`. Keys and file
/// names are `keyword` so history queries can use exact `term` filters.
#[must_use]
pub fn index_definition() -> Value {
    json!({
        "mappings": {
            "properties": {
                "migration": {
                    "properties": {
                        "migrationKey": { "type": "keyword" },
                        "order": { "type": "integer" },
                        "filename": { "type": "keyword" },
                        "version": { "type": "keyword" },
                        "description": { "type": "keyword" },
                        "checksum": { "type": "integer" },
                        "installedBy": { "type": "keyword" },
                        "installedOn": { "type": "date" },
                        "executionTime": { "type": "long" }
                    }
                },
                "lock": {
                    "properties": {
                        "date": { "type": "date" }
                    }
                }
            }
        }
    })
}

/// Create the history index if it does not exist
///
/// Another process creating the index concurrently is not an error.
pub fn initialize_state_index(store: &dyn DocumentStore, index: &str) -> Result<(), StoreError> {
    info!("Initializing migration history index [{}] as needed", index);

    if store.container_exists(index)? {
        return Ok(());
    }

    match store.create_container(index, &index_definition()) {
        Ok(()) => {
            info!("Migration history index [{}] created", index);
            Ok(())
        }
        Err(StoreError::Conflict { .. }) => {
            info!("Migration history index [{}] was created concurrently", index);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
