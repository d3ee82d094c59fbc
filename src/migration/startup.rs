//! In-process migration execution helpers

use crate::config::TidemarkConfig;
use crate::connection::connect;
use crate::migration::{ExecutionReport, MigrationError, Migrator};
use crate::store::DocumentStore;
use std::sync::Arc;

/// Run migrations on application startup
///
/// Designed to be called during application initialization to apply pending
/// migrations before the application starts serving. It handles:
/// - History index creation
/// - Integrity verification (fails if applied migration files were modified)
/// - Per-migration locking (safe with many instances starting at once)
/// - Releasing the lock and closing the store client
///
/// Returns an empty report without touching the store when `config.enabled`
/// is false.
///
/// # Behavior
///
/// - **First instance wins:** each migration is applied by whichever instance
///   takes its lock first; the others skip it
/// - **Fail-fast:** if a migration fails the error is returned and the
///   application should not start
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tidemark::config::TidemarkConfig;
/// use tidemark::connection::connect;
/// use tidemark::migration::startup_migrations;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = TidemarkConfig::load()?;
///     let store = Arc::new(connect(&config)?);
///
///     startup_migrations(store, &config)?;
///
///     // Continue with application startup...
///     Ok(())
/// }
/// ```
pub fn startup_migrations(
    store: Arc<dyn DocumentStore>,
    config: &TidemarkConfig,
) -> Result<ExecutionReport, MigrationError> {
    if !config.enabled {
        log::info!("Migrations are disabled. Skipping");
        return Ok(ExecutionReport::default());
    }

    let migrator = Migrator::from_config(store, config)?;
    let result = migrator.execute();
    migrator.close();

    let report = result?;
    if report.applied.is_empty() {
        log::debug!("No pending migrations to apply");
    } else {
        log::info!("Applied {} migration(s) on startup", report.applied.len());
    }

    Ok(report)
}

/// Connect to the configured store and run [`startup_migrations`]
pub fn startup_migrations_from_config(config: &TidemarkConfig) -> Result<ExecutionReport, MigrationError> {
    if !config.enabled {
        log::info!("Migrations are disabled. Skipping");
        return Ok(ExecutionReport::default());
    }

    let store = connect(config).map_err(|e| MigrationError::Config(e.to_string()))?;
    startup_migrations(Arc::new(store), config)
}
