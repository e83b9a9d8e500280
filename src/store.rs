//! On-disk assignment metadata, one directory per assignment.

use crate::error::{EngineError, Result};
use crate::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const METADATA_FILE: &str = "metadata.json";

/// Reported in listings when a record cannot be read.
pub const UNKNOWN: &str = "unknown";

/// Persisted record describing an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentMetadata {
    pub language: Language,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AssignmentMetadata {
    pub fn new(language: Language, requirements: Vec<String>) -> Self {
        Self {
            language,
            requirements,
            created_at: Utc::now(),
        }
    }
}

/// One row of a listing. Language and timestamp are strings so that a corrupt
/// record can still be reported as `unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub name: String,
    pub language: String,
    pub created_at: String,
}

/// Assignment names are non-empty runs of ASCII letters, digits and underscores,
/// with at least one letter or digit.
pub fn is_valid_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_alphanumeric())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
pub struct AssignmentStore {
    base_dir: PathBuf,
}

impl AssignmentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the base directory if it does not exist yet.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_name(name) && self.env_dir(name).is_dir()
    }

    pub fn save(&self, name: &str, metadata: &AssignmentMetadata) -> Result<()> {
        let path = self.env_dir(name).join(METADATA_FILE);
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load the metadata record. A missing file is reported as `Io` with
    /// `NotFound` kind, a malformed one as `Metadata`.
    pub fn load(&self, name: &str) -> Result<AssignmentMetadata> {
        let path = self.env_dir(name).join(METADATA_FILE);
        let raw = fs::read_to_string(&path)?;
        let metadata = serde_json::from_str(&raw)?;
        Ok(metadata)
    }

    /// Remove the whole environment directory of an assignment.
    pub fn remove(&self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }
        fs::remove_dir_all(self.env_dir(name))?;
        Ok(())
    }

    /// Enumerate every environment directory. Unreadable metadata never fails
    /// the listing; such entries report `unknown`.
    pub fn list(&self) -> Result<Vec<AssignmentSummary>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut assignments = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let summary = match self.load(&name) {
                Ok(metadata) => AssignmentSummary {
                    name,
                    language: metadata.language.to_string(),
                    created_at: metadata.created_at.to_rfc3339(),
                },
                Err(e) => {
                    warn!(assignment = %name, error = %e, "Unreadable assignment metadata");
                    AssignmentSummary {
                        name,
                        language: UNKNOWN.to_string(),
                        created_at: UNKNOWN.to_string(),
                    }
                }
            };
            assignments.push(summary);
        }
        assignments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(assignments)
    }
}
