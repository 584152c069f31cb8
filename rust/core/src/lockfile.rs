//! The approval lock file.
//!
//! Records import approvals, command approvals, and named policies as
//! JSON. Writes are atomic: serialize to a temporary file in the same
//! directory, then rename over the target.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::MlldResult;
use crate::policy::PolicyConfig;

/// An approved import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportEntry {
    pub hash: String,
    pub trust: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    pub approved_at: chrono::DateTime<chrono::Utc>,
}

/// An approved (or explicitly denied) command signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub approved_at: chrono::DateTime<chrono::Utc>,
}

/// A named policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub config: PolicyConfig,
}

/// The lock file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub imports: IndexMap<String, ImportEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub commands: IndexMap<String, CommandEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub policies: IndexMap<String, PolicyEntry>,
}

impl LockFile {
    /// Load a lock file; a missing file is an empty lock file.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files or malformed JSON.
    pub fn load(path: &Path) -> MlldResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write atomically: temp file in the target directory, then rename.
    ///
    /// # Errors
    ///
    /// Fails on serialization or IO errors.
    pub fn save(&self, path: &Path) -> MlldResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)?;
        }
        let mut temp = tempfile::NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
        std::io::Write::write_all(&mut temp, json.as_bytes())?;
        temp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Record an approved import.
    pub fn approve_import(&mut self, url: &str, hash: &str, trust: &str, ttl: Option<String>) {
        self.imports.insert(
            url.to_string(),
            ImportEntry {
                hash: hash.to_string(),
                trust: trust.to_string(),
                ttl,
                approved_at: chrono::Utc::now(),
            },
        );
    }

    /// Whether an import is approved for the given content hash. A hash
    /// change invalidates the approval.
    #[must_use]
    pub fn import_approved(&self, url: &str, hash: &str) -> bool {
        self.imports
            .get(url)
            .is_some_and(|entry| entry.hash == hash)
    }

    /// Record a command approval decision.
    pub fn record_command(&mut self, signature: &str, approved: bool, reason: Option<String>) {
        self.commands.insert(
            signature.to_string(),
            CommandEntry {
                approved,
                reason,
                approved_at: chrono::Utc::now(),
            },
        );
    }

    /// A prior decision for a command signature, if any.
    #[must_use]
    pub fn command_decision(&self, signature: &str) -> Option<bool> {
        self.commands.get(signature).map(|entry| entry.approved)
    }

    /// Record a named policy.
    pub fn record_policy(&mut self, name: &str, config: PolicyConfig) {
        self.policies
            .insert(name.to_string(), PolicyEntry { config });
    }
}
