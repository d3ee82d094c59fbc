//! Skeleton generation for new migration files

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tidemark::migration::{MigrationDefinition, MigrationError, MigrationLoader, Version};

/// Turn free text into a valid description: runs of other characters become `_`
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_description(raw: &str) -> Option<String> {
    let mut description = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            description.push(c);
        } else if !description.ends_with('_') {
            description.push('_');
        }
    }

    let description = description.trim_matches('_').to_string();
    (!description.is_empty()).then_some(description)
}

/// Version following the latest definition: its last component plus one
///
/// `1.2.0` → `1.2.1`, `7` → `8`, no definitions → `1`.
pub fn next_version(definitions: &[MigrationDefinition]) -> String {
    let Some(latest) = definitions.iter().max_by(|a, b| a.version.cmp(&b.version)) else {
        return "1".to_string();
    };

    let mut parts = latest.version.parts().to_vec();
    if let Some(last) = parts.last_mut() {
        *last = last.saturating_add(1);
    }
    parts.iter().map(u64::to_string).collect::<Vec<_>>().join(".")
}

/// Write `V<version>__<description>.yml` into `migrations_dir`
///
/// The directory is created when missing. Without an explicit `version` the
/// next version after the existing definitions is used.
///
/// # Errors
///
/// - `MigrationError::Config` if the description is empty or the version is taken
/// - `MigrationError::InvalidFilename` if the version is malformed
/// - `MigrationError::Io` if the directory or file cannot be written
pub fn generate_migration(
    migrations_dir: &Path,
    description: &str,
    version: Option<&str>,
) -> Result<PathBuf, MigrationError> {
    let description = sanitize_description(description)
        .ok_or_else(|| MigrationError::Config(format!("invalid migration description [{description}]")))?;

    fs::create_dir_all(migrations_dir).map_err(|source| MigrationError::Io {
        filename: migrations_dir.display().to_string(),
        source,
    })?;

    let loader = MigrationLoader::with_default_extensions(migrations_dir)?;
    let definitions = loader.load()?;

    let version = version.map_or_else(|| next_version(&definitions), str::to_string);
    let filename = format!("V{version}__{description}.yml");
    if !loader.is_definition_filename(&filename) {
        return Err(MigrationError::InvalidFilename(filename));
    }

    let parsed = Version::parse(&version, &filename)?;
    if let Some(existing) = definitions.iter().find(|d| numerically_equal(d.version.parts(), parsed.parts())) {
        return Err(MigrationError::Config(format!(
            "version {version} is already used by [{}]",
            existing.filename
        )));
    }

    let path = migrations_dir.join(&filename);
    fs::write(&path, template(&description, &version)).map_err(|source| MigrationError::Io {
        filename: filename.clone(),
        source,
    })?;

    Ok(path)
}

/// `1.2` and `1.2.0` name the same version
fn numerically_equal(a: &[u64], b: &[u64]) -> bool {
    (0..a.len().max(b.len())).all(|i| a.get(i).copied().unwrap_or(0) == b.get(i).copied().unwrap_or(0))
}

fn template(description: &str, version: &str) -> String {
    let generated = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    format!(
        r#"# Migration: {description}
# Version: {version}
# Generated: {generated}
#
# Requests run in order. A request with a body needs a contentType.
# Do not edit this file once it has been applied.
#
# requests:
#   - method: PUT
#     path: /my-index
#     contentType: application/json
#     body: |
#       {{ "mappings": {{ "properties": {{ "name": {{ "type": "keyword" }} }} }} }}
requests: []
"#
    )
}
