//! Migration definition discovery and parsing
//!
//! Definition files are named `V<version>__<description>.<ext>`, for example
//! `V1.2.0__CreateOrdersIndex.yml`. Their body is a YAML document with a single
//! `requests` list of HTTP request steps:
//!
//! ```yaml
//! requests:
//!   - method: PUT
//!     path: /orders
//!     contentType: application/json
//!     body: |
//!       { "settings": { "number_of_shards": 1 } }
//! ```

use crate::migration::{calculate_checksum, MigrationError};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory scanned for migration definitions
pub const DEFAULT_MIGRATIONS_DIR: &str = "es.migration";

/// Default accepted definition file extensions
pub const DEFAULT_FILE_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// Dot-separated numeric migration version
///
/// Ordered numerically component by component, missing trailing components
/// counting as zero, so `1.2.0 < 1.10.0` and `1.0` sorts next to `1.0.0`. Versions
/// that are numerically equal fall back to comparing the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    raw: String,
    parts: Vec<u64>,
}

impl Version {
    /// Parse a version string such as `1.10.0`
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidFilename` naming `filename` if a component is
    /// not a number or does not fit in 64 bits.
    pub fn parse(raw: &str, filename: &str) -> Result<Self, MigrationError> {
        let parts = raw
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| MigrationError::InvalidFilename(filename.to_string()))?;

        if parts.is_empty() {
            return Err(MigrationError::InvalidFilename(filename.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    /// The version exactly as written in the file name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric components
    #[must_use]
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.parts.len().max(other.parts.len());
        for i in 0..width {
            let ours = self.parts.get(i).copied().unwrap_or(0);
            let theirs = other.parts.get(i).copied().unwrap_or(0);
            match ours.cmp(&theirs) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One HTTP request of a migration definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStep {
    pub method: String,
    pub path: String,

    /// Required when `body` is present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Query string parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl RequestStep {
    /// The body, if present and not blank
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref().filter(|body| !body.trim().is_empty())
    }

    fn validate(&self, position: usize, filename: &str) -> Result<(), MigrationError> {
        let invalid = |reason: String| MigrationError::InvalidDefinition {
            filename: filename.to_string(),
            reason,
        };

        if self.method.trim().is_empty() {
            return Err(invalid(format!("request in position [{position}] has no method")));
        }
        if self.path.trim().is_empty() {
            return Err(invalid(format!("request in position [{position}] has no path")));
        }
        if self.body_text().is_some() && self.content_type.is_none() {
            return Err(invalid(format!(
                "request in position [{position}] has a body but no contentType"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionContents {
    requests: Vec<RequestStep>,
}

/// A loaded migration definition file
///
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    pub filename: String,
    pub version: Version,
    pub description: String,

    /// Fingerprint of the raw file bytes
    pub checksum: i32,

    pub steps: Vec<RequestStep>,
}

impl MigrationDefinition {
    /// Total order used to sequence definitions
    ///
    /// Version first (numeric, then raw string), then description, then filename so
    /// the same file set always sorts the same way.
    #[must_use]
    pub fn execution_order(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.description.cmp(&other.description))
            .then_with(|| self.filename.cmp(&other.filename))
    }
}

/// Discovers and reads migration definitions from one directory
#[derive(Debug, Clone)]
pub struct MigrationLoader {
    directory: PathBuf,
    pattern: Regex,
}

impl MigrationLoader {
    /// Create a loader for `directory` accepting the given file extensions
    ///
    /// Blank entries (and a leading `.`) are ignored.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Config` if no non-blank extension is given.
    pub fn new(directory: impl AsRef<Path>, extensions: &[String]) -> Result<Self, MigrationError> {
        let extensions: Vec<String> = extensions
            .iter()
            .map(|extension| extension.trim().trim_start_matches('.'))
            .filter(|extension| !extension.is_empty())
            .map(regex::escape)
            .collect();
        if extensions.is_empty() {
            return Err(MigrationError::Config(
                "at least one migration file extension is required".to_string(),
            ));
        }

        let alternatives = extensions.join("|");
        let pattern = Regex::new(&format!(r"^V(([0-9]+\.?)+)__([A-Za-z0-9_]+)\.(?:{alternatives})$"))
            .map_err(|e| MigrationError::Config(format!("invalid migration file pattern: {e}")))?;

        Ok(Self {
            directory: directory.as_ref().to_path_buf(),
            pattern,
        })
    }

    /// Loader accepting the default `yml` and `yaml` extensions
    pub fn with_default_extensions(directory: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let extensions: Vec<String> = DEFAULT_FILE_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        Self::new(directory, &extensions)
    }

    /// Directory this loader scans
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Whether `filename` matches the definition naming pattern
    #[must_use]
    pub fn is_definition_filename(&self, filename: &str) -> bool {
        self.pattern.is_match(filename)
    }

    /// Split a definition file name into version and description
    ///
    /// # Example
    /// - `V1.10.0__AddOrderAlias.yml` → version `1.10.0`, description `AddOrderAlias`
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidFilename` if the name does not match.
    pub fn parse_filename(&self, filename: &str) -> Result<(Version, String), MigrationError> {
        let captures = self
            .pattern
            .captures(filename)
            .ok_or_else(|| MigrationError::InvalidFilename(filename.to_string()))?;

        let (Some(version), Some(description)) = (captures.get(1), captures.get(3)) else {
            return Err(MigrationError::InvalidFilename(filename.to_string()));
        };

        Ok((Version::parse(version.as_str(), filename)?, description.as_str().to_string()))
    }

    /// Discover, read and order every definition in the directory
    ///
    /// Files whose names do not match the pattern are ignored. Any selected file that
    /// fails to read or parse aborts the load with an error naming that file.
    pub fn load(&self) -> Result<Vec<MigrationDefinition>, MigrationError> {
        info!("Loading migration files from [{}]", self.directory.display());

        if !self.directory.is_dir() {
            return Err(MigrationError::DirectoryNotFound(self.directory.clone()));
        }

        let entries = fs::read_dir(&self.directory).map_err(|source| MigrationError::Io {
            filename: self.directory.display().to_string(),
            source,
        })?;

        let mut definitions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::Io {
                filename: self.directory.display().to_string(),
                source,
            })?;

            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let selected = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.is_definition_filename(name));
            if selected {
                definitions.push(self.read(&path)?);
            }
        }

        definitions.sort_by(MigrationDefinition::execution_order);

        info!("Found [{}] migration files", definitions.len());

        Ok(definitions)
    }

    /// Read one definition file
    ///
    /// The file name is re-matched strictly; a mismatch here is fatal.
    pub fn read(&self, path: &Path) -> Result<MigrationDefinition, MigrationError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| MigrationError::InvalidFilename(path.display().to_string()))?
            .to_string();

        info!("Reading contents of migration file [{}]", filename);

        let (version, description) = self.parse_filename(&filename)?;

        let content = fs::read(path).map_err(|source| MigrationError::Io {
            filename: filename.clone(),
            source,
        })?;
        let checksum = calculate_checksum(&content);

        let contents: DefinitionContents = serde_yaml::from_slice(&content).map_err(|source| MigrationError::Parse {
            filename: filename.clone(),
            source,
        })?;

        for (position, step) in contents.requests.iter().enumerate() {
            step.validate(position, &filename)?;
        }

        Ok(MigrationDefinition {
            filename,
            version,
            description,
            checksum,
            steps: contents.requests,
        })
    }
}

/// Discover all migration definitions in a directory using the default extensions
pub fn discover_migrations(migrations_dir: &Path) -> Result<Vec<MigrationDefinition>, MigrationError> {
    MigrationLoader::with_default_extensions(migrations_dir)?.load()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> MigrationLoader {
        MigrationLoader::with_default_extensions("unused").unwrap()
    }

    fn version(raw: &str) -> Version {
        Version::parse(raw, "test").unwrap()
    }

    #[test]
    fn test_parse_filename() {
        let (version, description) = loader().parse_filename("V1.10.0__AddOrderAlias.yml").unwrap();
        assert_eq!(version.as_str(), "1.10.0");
        assert_eq!(version.parts(), &[1, 10, 0]);
        assert_eq!(description, "AddOrderAlias");
    }

    #[test]
    fn test_parse_filename_single_component() {
        let (version, description) = loader().parse_filename("V7__snake_case_name.yaml").unwrap();
        assert_eq!(version.parts(), &[7]);
        assert_eq!(description, "snake_case_name");
    }

    #[test]
    fn test_filename_pattern_rejects_malformed_names() {
        let loader = loader();
        for name in [
            "1.0__NoPrefix.yml",
            "V1.0_SingleUnderscore.yml",
            "V__NoVersion.yml",
            "V1.0__Has-Dash.yml",
            "V1.0__Wrong.json",
            "v1.0__Lowercase.yml",
            "V1.0__Name.yml.bak",
        ] {
            assert!(!loader.is_definition_filename(name), "{name} should not match");
            assert!(loader.parse_filename(name).is_err());
        }
    }

    #[test]
    fn test_custom_extension() {
        let loader = MigrationLoader::new("unused", &["json".to_string()]).unwrap();
        assert!(loader.is_definition_filename("V1__Init.json"));
        assert!(!loader.is_definition_filename("V1__Init.yml"));
    }

    #[test]
    fn test_no_extensions_rejected() {
        assert!(matches!(MigrationLoader::new("unused", &[]), Err(MigrationError::Config(_))));
        let blanks = vec![String::new(), "  ".to_string(), ".".to_string()];
        assert!(matches!(MigrationLoader::new("unused", &blanks), Err(MigrationError::Config(_))));
    }

    #[test]
    fn test_blank_extensions_ignored() {
        let loader = MigrationLoader::new("unused", &["yml".to_string(), String::new(), " .json ".to_string()]).unwrap();
        assert!(loader.is_definition_filename("V1__Init.yml"));
        assert!(loader.is_definition_filename("V1__Init.json"));
        assert!(!loader.is_definition_filename("V1__Init."));
        assert!(!loader.is_definition_filename("V1__Init"));
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(version("1.2.0") < version("1.10.0"));
        assert!(version("2") > version("1.99.99"));
        assert!(version("1.0.1") > version("1"));
    }

    #[test]
    fn test_version_missing_components_are_zero() {
        // numerically equal: raw string breaks the tie
        assert_eq!(version("1").cmp(&version("1.0")), "1".cmp("1.0"));
        assert_eq!(version("1.0").cmp(&version("1.00")), "1.0".cmp("1.00"));
        assert!(version("1.0") < version("1.0.1"));
    }

    #[test]
    fn test_version_trailing_dot() {
        let (version, _) = loader().parse_filename("V1.2.__Trailing.yml").unwrap();
        assert_eq!(version.parts(), &[1, 2]);
        assert_eq!(version.as_str(), "1.2.");
    }

    #[test]
    fn test_version_overflow_rejected() {
        let result = loader().parse_filename("V99999999999999999999999__Huge.yml");
        assert!(matches!(result, Err(MigrationError::InvalidFilename(_))));
    }

    #[test]
    fn test_body_text_ignores_blank_bodies() {
        let step = RequestStep {
            method: "POST".to_string(),
            path: "/_refresh".to_string(),
            content_type: None,
            params: BTreeMap::new(),
            body: Some("   \n".to_string()),
        };
        assert_eq!(step.body_text(), None);
        assert!(step.validate(0, "V1__Init.yml").is_ok());
    }

    #[test]
    fn test_body_requires_content_type() {
        let step = RequestStep {
            method: "PUT".to_string(),
            path: "/orders".to_string(),
            content_type: None,
            params: BTreeMap::new(),
            body: Some("{}".to_string()),
        };
        let err = step.validate(3, "V1__Init.yml").unwrap_err();
        assert!(err.to_string().contains("V1__Init.yml"));
        assert!(err.to_string().contains("position [3]"));
    }
}
