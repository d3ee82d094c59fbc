//! Migration system for Tidemark
//!
//! This module provides the infrastructure for versioned document store
//! migrations, including:
//! - Migration file discovery, parsing and ordering
//! - Checksums for change detection
//! - Migration history records and integrity verification
//! - The cross-process migration lock
//! - Migration execution and status reporting
//!
//! # Example
//!
//! A migration file `es.migration/V1.0.0__CreateOrdersIndex.yml`:
//!
//! ```yaml
//! requests:
//!   - method: PUT
//!     path: /orders
//!     contentType: application/json
//!     body: |
//!       { "mappings": { "properties": { "sku": { "type": "keyword" } } } }
//! ```
//!
//! is applied with:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemark::config::TidemarkConfig;
//! use tidemark::connection::connect;
//! use tidemark::migration::{Migrator, MigratorSettings};
//!
//! let config = TidemarkConfig::load()?;
//! let store = Arc::new(connect(&config)?);
//! let migrator = Migrator::new(store, MigratorSettings::new("orders", "es.migration"))?;
//! let report = migrator.execute();
//! migrator.close();
//! println!("applied {:?}", report?.applied);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checksum;
pub mod error;
pub mod file;
pub mod lock;
pub mod migrator;
pub mod record;
pub mod startup;
pub mod state_index;
pub mod status;
pub mod verify;

pub use checksum::calculate_checksum;
pub use error::MigrationError;
pub use file::{discover_migrations, MigrationDefinition, MigrationLoader, RequestStep, Version};
pub use lock::{interrupt_channel, DocumentLock, InterruptSignal, Interrupter, LockError};
pub use migrator::{ExecutionReport, Migrator, MigratorSettings};
pub use record::{lock_document_id, MigrationRecord};
pub use startup::{startup_migrations, startup_migrations_from_config};
pub use state_index::initialize_state_index;
pub use status::{MigrationStatus, PendingMigration};
pub use verify::verify_integrity;
