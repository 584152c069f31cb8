//! Content loading for `<path>` loader expressions.
//!
//! Loading sits behind a trait so tests and embedders can stub the
//! filesystem. The default implementation reads through `tokio::fs` and
//! expands globs relative to the current file's directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::MlldResult;

/// The raw result of loading one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedContent {
    pub text: String,
    pub path: PathBuf,
}

/// Loads file content and expands glob patterns.
#[async_trait]
pub trait ContentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> MlldResult<LoadedContent>;

    /// Expand a glob pattern against a base directory, returning matches
    /// in sorted order.
    async fn expand_glob(&self, pattern: &str, base: &Path) -> MlldResult<Vec<PathBuf>>;
}

/// The filesystem-backed loader.
pub struct FsLoader;

#[async_trait]
impl ContentLoader for FsLoader {
    async fn load(&self, path: &Path) -> MlldResult<LoadedContent> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(LoadedContent {
            text,
            path: path.to_path_buf(),
        })
    }

    async fn expand_glob(&self, pattern: &str, base: &Path) -> MlldResult<Vec<PathBuf>> {
        let full = base.join(pattern);
        let pattern_text = full.to_string_lossy().to_string();
        let mut paths: Vec<PathBuf> = glob::glob(&pattern_text)
            .map_err(|err| crate::error::MlldError::internal(format!("bad glob: {err}")))?
            .filter_map(Result::ok)
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Whether a loader path contains glob metacharacters.
#[must_use]
pub fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '[',])
}
