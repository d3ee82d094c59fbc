//! Migrator - Core migration execution engine

use crate::config::TidemarkConfig;
use crate::migration::file::{DEFAULT_FILE_EXTENSIONS, DEFAULT_MIGRATIONS_DIR};
use crate::migration::lock::{DocumentLock, LockError, DEFAULT_IDLE_BETWEEN_TRIES};
use crate::migration::state_index::{initialize_state_index, DEFAULT_HISTORY_INDEX};
use crate::migration::{
    verify_integrity, MigrationDefinition, MigrationError, MigrationLoader, MigrationRecord, MigrationStatus,
};
use crate::store::{DocumentStore, RecordFilter};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Default bound on waiting for the migration lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Settings for one [`Migrator`]
#[derive(Debug, Clone)]
pub struct MigratorSettings {
    /// Namespace of the migration sequence and its history
    pub migration_key: String,

    /// Operator identity recorded on each history record
    pub migration_user: Option<String>,

    pub migrations_dir: PathBuf,
    pub file_extensions: Vec<String>,
    pub history_index: String,

    /// Pause between remote lock attempts
    pub lock_idle: Duration,

    /// Bound on waiting for the lock before each migration
    pub lock_timeout: Duration,
}

impl MigratorSettings {
    /// Settings with defaults for everything but the key and directory
    pub fn new(migration_key: impl Into<String>, migrations_dir: impl AsRef<Path>) -> Self {
        Self {
            migration_key: migration_key.into(),
            migration_user: None,
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
            file_extensions: DEFAULT_FILE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            history_index: DEFAULT_HISTORY_INDEX.to_string(),
            lock_idle: DEFAULT_IDLE_BETWEEN_TRIES,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Record `user` as the operator on applied migrations
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.migration_user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_lock_idle(mut self, idle: Duration) -> Self {
        self.lock_idle = idle;
        self
    }

    #[must_use]
    pub fn with_history_index(mut self, index: impl Into<String>) -> Self {
        self.history_index = index.into();
        self
    }
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self::new(String::new(), DEFAULT_MIGRATIONS_DIR)
    }
}

impl From<&TidemarkConfig> for MigratorSettings {
    fn from(config: &TidemarkConfig) -> Self {
        Self {
            migration_key: config.migration_key.clone(),
            migration_user: config.migration_user.clone(),
            migrations_dir: config.migrations_dir.clone(),
            file_extensions: config.file_extensions.clone(),
            history_index: config.history_index.clone(),
            lock_idle: config.lock_idle(),
            lock_timeout: config.lock_timeout(),
        }
    }
}

/// Filenames applied and skipped by one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub applied: Vec<String>,

    /// Found already applied by another process after taking the lock
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Skipped,
}

/// Core migration execution engine
///
/// Sequences initialization, loading, verification and per-migration locked
/// execution. Construct once, call [`execute`](Self::execute), then
/// [`close`](Self::close).
pub struct Migrator {
    store: Arc<dyn DocumentStore>,
    loader: MigrationLoader,
    lock: DocumentLock,
    settings: MigratorSettings,
}

impl Migrator {
    /// Create a migrator over `store`
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Config` if the migration key is empty or no file
    /// extension is configured.
    pub fn new(store: Arc<dyn DocumentStore>, settings: MigratorSettings) -> Result<Self, MigrationError> {
        if settings.migration_key.trim().is_empty() {
            return Err(MigrationError::Config("migration key must not be empty".to_string()));
        }
        if settings.lock_idle.is_zero() {
            return Err(MigrationError::Config("lock idle interval must be positive".to_string()));
        }

        let loader = MigrationLoader::new(&settings.migrations_dir, &settings.file_extensions)?;
        let lock = DocumentLock::new(store.clone(), settings.history_index.clone(), &settings.migration_key)
            .with_idle_between_tries(settings.lock_idle);

        Ok(Self {
            store,
            loader,
            lock,
            settings,
        })
    }

    /// Create a migrator from loaded configuration
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &TidemarkConfig) -> Result<Self, MigrationError> {
        Self::new(store, MigratorSettings::from(config))
    }

    pub fn migration_key(&self) -> &str {
        &self.settings.migration_key
    }

    /// The lock serializing this migrator's key
    pub fn lock(&self) -> &DocumentLock {
        &self.lock
    }

    /// Run every pending migration
    ///
    /// Any failure aborts the remaining migrations and is returned wrapped in
    /// `MigrationError::Run`. Migrations recorded before the failure stay recorded;
    /// the next execution resumes after them.
    pub fn execute(&self) -> Result<ExecutionReport, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::run_span(&self.settings.migration_key).entered();

        info!("Starting migration execution for key [{}]", self.settings.migration_key);

        let result = self.initialize().and_then(|()| self.run());

        match result {
            Ok(report) => {
                info!(
                    "Completed migration execution for key [{}]: {} applied, {} skipped",
                    self.settings.migration_key,
                    report.applied.len(),
                    report.skipped.len()
                );
                Ok(report)
            }
            Err(source) => Err(MigrationError::Run {
                migration_key: self.settings.migration_key.clone(),
                source: Box::new(source),
            }),
        }
    }

    /// Create the history index if it does not exist
    pub fn initialize(&self) -> Result<(), MigrationError> {
        initialize_state_index(self.store.as_ref(), &self.settings.history_index)?;
        Ok(())
    }

    /// Load definitions in execution order
    pub fn load(&self) -> Result<Vec<MigrationDefinition>, MigrationError> {
        self.loader.load()
    }

    /// All history records for the migration key
    pub fn history(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        info!("Getting migration records for migration key [{}]", self.settings.migration_key);
        let records = self
            .store
            .query_records(&self.settings.history_index, &RecordFilter::key(&self.settings.migration_key))?;
        info!("Found [{}] migration records", records.len());
        Ok(records)
    }

    /// Applied and pending migrations, after integrity verification
    ///
    /// Read only: takes no lock, executes nothing and does not create the history
    /// index. A missing index counts as empty history.
    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let definitions = self.load()?;
        let history = if self.store.container_exists(&self.settings.history_index)? {
            self.history()?
        } else {
            debug!("History index [{}] does not exist yet", self.settings.history_index);
            Vec::new()
        };
        verify_integrity(&definitions, &history, &self.settings.migration_key)?;
        Ok(MigrationStatus::from_verified(&definitions, history))
    }

    /// Verify history against migration files without executing anything
    pub fn validate(&self) -> Result<(), MigrationError> {
        self.status().map(|_| ())
    }

    /// Delete the lock document for this key regardless of who created it
    ///
    /// Manual recovery for a lock orphaned by a crashed process. Only call this
    /// after making sure no migration is running for the key.
    pub fn force_unlock(&self) -> Result<(), MigrationError> {
        warn!(
            "Forcibly deleting lock document [{}] for migration key [{}]",
            self.lock.lock_id(),
            self.settings.migration_key
        );
        self.store.delete_by_id(&self.settings.history_index, self.lock.lock_id())?;
        Ok(())
    }

    /// Release the lock if still held and close the store client
    ///
    /// Failures are logged, never raised.
    pub fn close(&self) {
        match self.lock.unlock() {
            Ok(()) | Err(LockError::NotHeld) => {}
            Err(e) => warn!(
                "Failed to release execution lock. You may need to delete lock document [{}] manually: {}",
                self.lock.lock_id(),
                e
            ),
        }

        if let Err(e) = self.store.close() {
            warn!("Failed to close store client. This is likely not an issue: {}", e);
        }
    }

    fn run(&self) -> Result<ExecutionReport, MigrationError> {
        let definitions = self.load()?;
        let history = self.history()?;

        verify_integrity(&definitions, &history, &self.settings.migration_key)?;

        let mut report = ExecutionReport::default();
        for (order, definition) in definitions.iter().enumerate().skip(history.len()) {
            let outcome = self.apply(order, definition).map_err(|source| MigrationError::Migration {
                filename: definition.filename.clone(),
                source: Box::new(source),
            })?;

            match outcome {
                Outcome::Applied => report.applied.push(definition.filename.clone()),
                Outcome::Skipped => report.skipped.push(definition.filename.clone()),
            }
        }

        Ok(report)
    }

    /// Apply one definition under the lock, releasing it on every path
    fn apply(&self, order: usize, definition: &MigrationDefinition) -> Result<Outcome, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_migration_span(&definition.filename).entered();

        info!("Attempting to acquire lock for migration file [{}]", definition.filename);

        if !self.lock.try_lock(self.settings.lock_timeout) {
            error!(
                "Failed to acquire lock in the allotted time period. Did a lock not get cleared by a previous execution?"
            );
            return Err(MigrationError::LockTimeout {
                migration_key: self.settings.migration_key.clone(),
                lock_id: self.lock.lock_id().to_string(),
                timeout: self.settings.lock_timeout,
            });
        }

        let outcome = self.apply_locked(order, definition);

        info!("Releasing execution lock");
        match (outcome, self.lock.unlock()) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(released)) => Err(released.into()),
            (Err(e), Err(released)) => {
                warn!(
                    "Failed to release execution lock after a failed migration. You may need to delete lock document [{}] manually: {}",
                    self.lock.lock_id(),
                    released
                );
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    fn apply_locked(&self, order: usize, definition: &MigrationDefinition) -> Result<Outcome, MigrationError> {
        // another process sharing the key may have applied it since history was read
        let existing = self.store.query_records(
            &self.settings.history_index,
            &RecordFilter::key(&self.settings.migration_key).with_filename(&definition.filename),
        )?;
        if !existing.is_empty() {
            info!(
                "Migration file [{}] was already applied by another process. Skipping",
                definition.filename
            );
            #[cfg(feature = "metrics")]
            METRICS.record_skipped();
            return Ok(Outcome::Skipped);
        }

        info!("Lock acquired. Executing requests defined in migration file [{}]", definition.filename);

        let started = Instant::now();
        self.perform_steps(definition)?;
        let elapsed = started.elapsed();
        let installed_on = Utc::now();

        info!(
            "Execution complete for migration file [{}]. Took [{}] milliseconds",
            definition.filename,
            elapsed.as_millis()
        );

        let execution_time = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        let record = MigrationRecord::new(
            &self.settings.migration_key,
            order,
            definition,
            self.settings.migration_user.clone(),
            installed_on,
            execution_time,
        );

        info!("Creating migration record for migration file [{}]", definition.filename);
        self.store.create_record(&self.settings.history_index, &record)?;

        #[cfg(feature = "metrics")]
        METRICS.record_applied(elapsed);

        Ok(Outcome::Applied)
    }

    fn perform_steps(&self, definition: &MigrationDefinition) -> Result<(), MigrationError> {
        for (position, step) in definition.steps.iter().enumerate() {
            info!(
                "Executing request in position [{}] defined in migration file [{}]",
                position, definition.filename
            );
            self.store.perform(step).map_err(|source| MigrationError::StepFailed {
                filename: definition.filename.clone(),
                position,
                source,
            })?;
        }
        Ok(())
    }
}
