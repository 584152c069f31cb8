//! Module processing: evaluate a module's document in a fresh child
//! environment with isolated output, and collect its exports, frontmatter,
//! and guard definitions.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::effects::BufferedSink;
use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::guards::GuardRule;
use crate::variable::Variable;

use super::{ImportResolution, ModuleSource, ResolutionKind};

/// The result of processing one module.
pub struct ModuleProcessing {
    /// Exported bindings, in manifest order.
    pub exports: IndexMap<String, Arc<Variable>>,
    pub frontmatter: Option<serde_json::Value>,
    /// The module's environment; importers hold this to keep executables'
    /// captured environments alive.
    pub child_env: Arc<Environment>,
    /// `/guard` definitions declared by the module, registered by the
    /// importer after bindings succeed.
    pub guards: Vec<GuardRule>,
}

/// Parse-and-evaluate has already happened on the host side for parsing;
/// this evaluates the module document and assembles its exports.
///
/// # Errors
///
/// Module evaluation errors propagate; a manifest naming an unbound
/// variable is `EXPORTED_NAME_NOT_FOUND`.
pub async fn process_module(
    source: &str,
    resolution: &ImportResolution,
    module: &ModuleSource,
    env: &Arc<Environment>,
) -> MlldResult<ModuleProcessing> {
    let file_path = match resolution.kind {
        ResolutionKind::Url | ResolutionKind::Registry => None,
        _ => Some(std::path::PathBuf::from(&resolution.resolved_path)),
    };
    let (child_env, collector) =
        env.create_import_child(file_path, Arc::new(BufferedSink::new()));

    tracing::debug!(%source, "processing imported module");
    crate::interpreter::evaluate_document(&module.document, &child_env).await?;

    let mut exports = IndexMap::new();
    let bound = child_env.capture_module();
    for name in child_env.exported_names() {
        let variable = bound.get(&name).cloned().ok_or_else(|| {
            MlldError::new(ErrorKind::ExportedNameNotFound {
                name: name.clone(),
                module_source: source.to_string(),
            })
        })?;
        exports.insert(name, variable);
    }

    let guards = collector
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .drain(..)
        .collect();

    Ok(ModuleProcessing {
        exports,
        frontmatter: module.document.frontmatter.clone(),
        child_env,
        guards,
    })
}
