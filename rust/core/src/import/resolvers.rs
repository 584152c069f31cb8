//! Resolver implementations shipped with the core.
//!
//! Real resolvers (registry, URL fetching, node modules) live with the
//! host; the core ships a rejecting default plus an in-memory resolver
//! used by API embedders and tests.

use async_trait::async_trait;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use mlld_ast::Document;

use crate::error::{MlldError, MlldResult};

use super::{ImportResolution, ModuleSource, ResolutionKind, Resolver};

/// The default resolver: rejects every import.
pub struct UnresolvedResolver;

#[async_trait]
impl Resolver for UnresolvedResolver {
    async fn resolve(
        &self,
        source: &str,
        _base: &std::path::Path,
    ) -> MlldResult<ImportResolution> {
        Err(MlldError::internal(format!(
            "no resolver configured for import of {source}"
        )))
    }

    async fn load_module(&self, resolution: &ImportResolution) -> MlldResult<ModuleSource> {
        Err(MlldError::internal(format!(
            "no resolver configured for {}",
            resolution.resolved_path
        )))
    }

    async fn load_directory(
        &self,
        resolution: &ImportResolution,
    ) -> MlldResult<Vec<(String, ModuleSource)>> {
        Err(MlldError::internal(format!(
            "no resolver configured for {}",
            resolution.resolved_path
        )))
    }
}

enum MemoryEntry {
    Module { kind: ResolutionKind, document: Document },
    Directory(Vec<(String, Document)>),
}

/// An in-memory resolver mapping source strings to pre-parsed documents.
#[derive(Default)]
pub struct MemoryResolver {
    entries: IndexMap<String, MemoryEntry>,
}

impl MemoryResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file-kind module.
    #[must_use]
    pub fn with_module(mut self, source: impl Into<String>, document: Document) -> Self {
        self.entries.insert(
            source.into(),
            MemoryEntry::Module {
                kind: ResolutionKind::File,
                document,
            },
        );
        self
    }

    /// Register a module under an explicit resolution kind.
    #[must_use]
    pub fn with_module_kind(
        mut self,
        source: impl Into<String>,
        kind: ResolutionKind,
        document: Document,
    ) -> Self {
        self.entries
            .insert(source.into(), MemoryEntry::Module { kind, document });
        self
    }

    /// Register a directory of modules keyed by filename stem.
    #[must_use]
    pub fn with_directory(
        mut self,
        source: impl Into<String>,
        children: Vec<(String, Document)>,
    ) -> Self {
        self.entries
            .insert(source.into(), MemoryEntry::Directory(children));
        self
    }
}

fn hash_document(document: &Document) -> String {
    let serialized = serde_json::to_string(document).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    format!("{digest:x}")
}

fn module_source(document: &Document) -> ModuleSource {
    ModuleSource {
        document: document.clone(),
        content_hash: hash_document(document),
        advisories: Vec::new(),
    }
}

#[async_trait]
impl Resolver for MemoryResolver {
    async fn resolve(
        &self,
        source: &str,
        _base: &std::path::Path,
    ) -> MlldResult<ImportResolution> {
        match self.entries.get(source) {
            Some(MemoryEntry::Module { kind, .. }) => Ok(ImportResolution {
                kind: *kind,
                resolved_path: source.to_string(),
                resolver_name: Some("memory".into()),
                prefer_local: false,
            }),
            Some(MemoryEntry::Directory(_)) => Ok(ImportResolution {
                kind: ResolutionKind::Directory,
                resolved_path: source.to_string(),
                resolver_name: Some("memory".into()),
                prefer_local: false,
            }),
            None => Err(MlldError::internal(format!("unknown module: {source}"))),
        }
    }

    async fn load_module(&self, resolution: &ImportResolution) -> MlldResult<ModuleSource> {
        match self.entries.get(&resolution.resolved_path) {
            Some(MemoryEntry::Module { document, .. }) => Ok(module_source(document)),
            _ => Err(MlldError::internal(format!(
                "unknown module: {}",
                resolution.resolved_path
            ))),
        }
    }

    async fn load_directory(
        &self,
        resolution: &ImportResolution,
    ) -> MlldResult<Vec<(String, ModuleSource)>> {
        match self.entries.get(&resolution.resolved_path) {
            Some(MemoryEntry::Directory(children)) => Ok(children
                .iter()
                .map(|(stem, document)| (stem.clone(), module_source(document)))
                .collect()),
            _ => Err(MlldError::internal(format!(
                "not a directory: {}",
                resolution.resolved_path
            ))),
        }
    }
}
