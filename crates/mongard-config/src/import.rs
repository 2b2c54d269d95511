//! Import manifest parsing and validation.
//!
//! Bulk imports are described in a TOML manifest holding an ordered array
//! of entries. Validation happens up front, before any server process is
//! launched, so a misconfigured entry never costs a server start.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default timeout for one import command run.
pub const DEFAULT_IMPORT_TIMEOUT_MS: u64 = 200_000;

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_IMPORT_TIMEOUT_MS
}

/// One configured import: a source file loaded into a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    /// Target database; falls back to the manifest-wide default.
    #[serde(default)]
    pub database: Option<String>,
    /// Target collection; derived from the file stem when absent.
    #[serde(default)]
    pub collection: Option<String>,
    /// Source file to import.
    pub file: Utf8PathBuf,
    /// Drop the collection before importing.
    #[serde(default = "default_true")]
    pub drop_on_import: bool,
    /// Upsert documents instead of plain inserts.
    #[serde(default = "default_true")]
    pub upsert_on_import: bool,
    /// Timeout for the import command run, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ImportEntry {
    /// Resolves the target collection: explicit name, or the source file's
    /// base name with its extension removed (`/data/users.json` → `users`).
    #[must_use]
    pub fn collection(&self) -> String {
        match &self.collection {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self
                .file
                .file_stem()
                .unwrap_or_else(|| self.file.as_str())
                .to_owned(),
        }
    }

    /// Resolves the target database against the manifest default.
    #[must_use]
    pub fn database<'a>(&'a self, default_database: Option<&'a str>) -> Option<&'a str> {
        self.database
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| default_database.filter(|name| !name.trim().is_empty()))
    }

    /// Validates the entry before any process launch.
    pub fn validate(&self, default_database: Option<&str>) -> Result<(), ImportManifestError> {
        if self.file.as_str().trim().is_empty() {
            return Err(ImportManifestError::MissingFile {
                collection: self.collection.clone(),
            });
        }
        if self.database(default_database).is_none() {
            return Err(ImportManifestError::UnresolvableDatabase {
                file: self.file.clone().into(),
            });
        }
        Ok(())
    }
}

/// The parsed import manifest: ordered entries plus manifest-wide options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportManifest {
    /// Fallback database for entries without an explicit one.
    #[serde(default)]
    pub default_database: Option<String>,
    /// Accepted for compatibility; execution stays sequential.
    #[serde(default)]
    pub parallel: bool,
    /// Ordered import entries.
    #[serde(default, rename = "import")]
    pub imports: Vec<ImportEntry>,
}

impl ImportManifest {
    /// Loads and parses a manifest from disk.
    pub fn load(path: &Path) -> Result<Self, ImportManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ImportManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ImportManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates every entry, failing on the first misconfigured one.
    pub fn validate(&self) -> Result<(), ImportManifestError> {
        for entry in &self.imports {
            entry.validate(self.default_database.as_deref())?;
        }
        Ok(())
    }
}

/// Errors raised while loading or validating import manifests.
#[derive(Debug, Error)]
pub enum ImportManifestError {
    #[error("failed to read import manifest {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse import manifest {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(
        "import entry (collection {collection:?}) is missing its source file; \
         every [[import]] needs `file = \"...\"`"
    )]
    MissingFile { collection: Option<String> },
    #[error(
        "import of {file:?} has no database; set `database` on the entry or \
         `default_database` at the top of the manifest"
    )]
    UnresolvableDatabase { file: PathBuf },
}
