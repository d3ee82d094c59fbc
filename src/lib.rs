//! # Tidemark
//!
//! Versioned, lock-coordinated migrations for Elasticsearch-compatible
//! document stores.
//!
//! Migration files hold ordered HTTP requests. Each is applied at most once per
//! migration key, in version order, under a lock document so concurrently
//! starting processes never run the same migration twice. Applied migrations
//! are recorded with a checksum; editing an applied file stops the next run.

pub mod config;
pub mod connection;
pub mod metrics;
pub mod migration;
pub mod store;

pub use config::TidemarkConfig;
pub use migration::{ExecutionReport, MigrationError, Migrator, MigratorSettings};
pub use store::{DocumentStore, ElasticsearchStore, MemoryStore, StoreError};
