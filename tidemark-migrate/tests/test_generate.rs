//! Tests for generate module

use std::fs;
use tempfile::TempDir;
use tidemark::migration::{discover_migrations, MigrationError};
use tidemark_migrate::generate::{generate_migration, next_version};

#[test]
fn test_generate_first_migration_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("es.migration");

    let path = generate_migration(&dir, "create orders index", None).unwrap();

    assert_eq!(path, dir.join("V1__create_orders_index.yml"));
    let definitions = discover_migrations(&dir).unwrap();
    assert_eq!(definitions.len(), 1);
    assert!(definitions[0].steps.is_empty());
    assert_eq!(definitions[0].description, "create_orders_index");
}

#[test]
fn test_generate_bumps_latest_version() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    fs::write(dir.join("V1.2.0__First.yml"), "requests: []\n").unwrap();
    fs::write(dir.join("V1.10.3__Second.yml"), "requests: []\n").unwrap();

    assert_eq!(next_version(&discover_migrations(dir).unwrap()), "1.10.4");

    let path = generate_migration(dir, "AddAlias", None).unwrap();
    assert_eq!(path.file_name().unwrap(), "V1.10.4__AddAlias.yml");
}

#[test]
fn test_generate_with_explicit_version() {
    let temp_dir = TempDir::new().unwrap();

    let path = generate_migration(temp_dir.path(), "Seed", Some("2.0.0")).unwrap();
    assert_eq!(path.file_name().unwrap(), "V2.0.0__Seed.yml");
}

#[test]
fn test_generate_rejects_taken_version() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("V2__Existing.yml"), "requests: []\n").unwrap();

    let err = generate_migration(temp_dir.path(), "Other", Some("2.0")).unwrap_err();
    assert!(matches!(err, MigrationError::Config(ref message) if message.contains("V2__Existing.yml")));
}

#[test]
fn test_generate_rejects_bad_input() {
    let temp_dir = TempDir::new().unwrap();

    assert!(matches!(
        generate_migration(temp_dir.path(), "Seed", Some("v1-beta")),
        Err(MigrationError::InvalidFilename(_))
    ));
    assert!(matches!(
        generate_migration(temp_dir.path(), "!!!", None),
        Err(MigrationError::Config(_))
    ));
}
