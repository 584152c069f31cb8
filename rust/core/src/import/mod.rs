//! The import model.
//!
//! A resolver collaborator turns a source string into an
//! [`ImportResolution`]; the core processes the module in a fresh child
//! environment and applies the result per the import subtype. Name
//! collisions are detected against the import-binding ledger before any
//! policy context or guard registration is applied.

mod process;
mod resolvers;
mod serialize;

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use mlld_ast::{CacheDuration, Directive, ImportClause, ImportType};

use crate::env::{Environment, ImportBinding};
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::guards::GuardRule;
use crate::value::{ImportOrigin, Value};
use crate::variable::{Variable, VariableSource};

pub use process::{process_module, ModuleProcessing};
pub use resolvers::{MemoryResolver, UnresolvedResolver};
pub use serialize::{deserialize_module, serialize_module};

/// What kind of location a source resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    File,
    Url,
    NodeModule,
    Directory,
    Registry,
}

impl ResolutionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Url => "url",
            Self::NodeModule => "node-module",
            Self::Directory => "directory",
            Self::Registry => "registry",
        }
    }
}

/// A resolved import, as handed over by the resolver collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResolution {
    pub kind: ResolutionKind,
    pub resolved_path: String,
    pub resolver_name: Option<String>,
    pub prefer_local: bool,
}

/// A loaded module: the parsed document plus integrity data.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSource {
    pub document: mlld_ast::Document,
    pub content_hash: String,
    pub advisories: Vec<String>,
}

/// Resolves import sources and loads module content. The grammar lives
/// with the host, so loading returns parsed documents.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        source: &str,
        base: &std::path::Path,
    ) -> MlldResult<ImportResolution>;

    async fn load_module(&self, resolution: &ImportResolution) -> MlldResult<ModuleSource>;

    /// Children of a directory resolution, keyed by filename stem.
    async fn load_directory(
        &self,
        resolution: &ImportResolution,
    ) -> MlldResult<Vec<(String, ModuleSource)>>;
}

fn type_allows(import_type: ImportType, kind: ResolutionKind) -> bool {
    match import_type {
        ImportType::Module => matches!(kind, ResolutionKind::Registry | ResolutionKind::NodeModule),
        ImportType::Static | ImportType::Templates => {
            matches!(kind, ResolutionKind::File | ResolutionKind::Directory)
        }
        ImportType::Cached | ImportType::Live => matches!(kind, ResolutionKind::Url),
        ImportType::Local => matches!(
            kind,
            ResolutionKind::File | ResolutionKind::Directory | ResolutionKind::NodeModule
        ),
    }
}

/// Evaluate an `/import` directive.
///
/// # Errors
///
/// The import-error taxonomy: `WILDCARD_IMPORT`, `IMPORT_TYPE_MISMATCH`,
/// `IMPORT_NAME_CONFLICT`, `EXPORTED_NAME_NOT_FOUND`,
/// `IMPORT_EXPORT_MISSING`, plus security and module-evaluation errors.
pub async fn run_import(
    directive: &Directive,
    clause: &ImportClause,
    source: &str,
    import_type: Option<ImportType>,
    cache: Option<CacheDuration>,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    if matches!(clause, ImportClause::All) {
        return Err(MlldError::new(ErrorKind::WildcardImport));
    }

    if source == "@input" {
        return import_env_vars(directive, clause, env);
    }

    if cache.is_some() && import_type != Some(ImportType::Cached) {
        return Err(MlldError::new(ErrorKind::ImportTypeMismatch {
            import_type: import_type.map_or_else(|| "unspecified".into(), |t| t.to_string()),
            resolver_kind: "cache durations apply only to cached imports".into(),
        }));
    }

    let resolution = env.resolver().resolve(source, &env.path_context()).await?;
    if let Some(required) = import_type {
        if !type_allows(required, resolution.kind) {
            return Err(MlldError::new(ErrorKind::ImportTypeMismatch {
                import_type: required.to_string(),
                resolver_kind: resolution.kind.as_str().to_string(),
            }));
        }
    }

    if resolution.kind == ResolutionKind::Directory {
        return import_directory(directive, clause, source, &resolution, env).await;
    }

    let module = env.resolver().load_module(&resolution).await?;

    if resolution.kind == ResolutionKind::Url {
        env.security_manager()
            .approve_import(&resolution.resolved_path, &module.content_hash, &module.advisories)
            .await?;
    }

    let processing = process_module(source, &resolution, &module, env).await?;
    apply_import(directive, clause, source, &resolution, processing, env)
}

fn origin_of(source: &str, resolution: &ImportResolution) -> ImportOrigin {
    ImportOrigin {
        source: source.to_string(),
        resolver: resolution.resolver_name.clone(),
    }
}

/// Apply a processed module to the target environment per the import
/// subtype. The ledger collision check runs before guard registration and
/// before any policy context is applied, so precedence is observable.
fn apply_import(
    directive: &Directive,
    clause: &ImportClause,
    source: &str,
    resolution: &ImportResolution,
    processing: ModuleProcessing,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let origin = origin_of(source, resolution);
    let binding = ImportBinding {
        source: source.to_string(),
        location: directive.location.clone(),
    };

    let binding_names: Vec<String> = match clause {
        ImportClause::Selected { items } => {
            if processing.exports.is_empty() {
                return Err(MlldError::new(ErrorKind::ImportExportMissing {
                    module_source: source.to_string(),
                }));
            }
            for item in items {
                if !processing.exports.contains_key(&item.name) {
                    return Err(MlldError::new(ErrorKind::ExportedNameNotFound {
                        name: item.name.clone(),
                        module_source: source.to_string(),
                    }));
                }
            }
            items.iter().map(|i| i.binding_name().to_string()).collect()
        }
        ImportClause::Namespace { alias } | ImportClause::Policy { alias } => {
            vec![alias.clone()]
        }
        ImportClause::All => return Err(MlldError::new(ErrorKind::WildcardImport)),
    };

    // Collision check for every name, before anything is bound and
    // before guards or policy context apply.
    for name in &binding_names {
        if let Some(existing) = env.import_binding(name) {
            if existing.source != binding.source {
                return Err(MlldError::new(ErrorKind::ImportNameConflict {
                    name: name.clone(),
                    first_source: existing.source,
                    first_location: existing.location,
                    second_source: binding.source.clone(),
                    second_location: binding.location.clone(),
                }));
            }
        }
    }

    // The policy context in scope stamps its labels and taint onto the
    // new bindings.
    let mut stamp = env.security_snapshot();
    if let Some(policy) = env.policy() {
        for policy_label in &policy.labels {
            stamp.labels.insert(policy_label.clone());
        }
        for tag in &policy.taint {
            stamp.taint.insert(tag.clone());
        }
    }

    match clause {
        ImportClause::Selected { items } => {
            for item in items {
                let exported = processing
                    .exports
                    .get(&item.name)
                    .cloned()
                    .ok_or_else(|| MlldError::internal("validated export disappeared"))?;
                let variable = imported_variable(
                    item.binding_name(),
                    &exported,
                    &origin,
                    &stamp,
                    &processing.child_env,
                    directive,
                );
                env.set_imported(variable, binding.clone())?;
            }
        }
        ImportClause::Namespace { alias } | ImportClause::Policy { alias } => {
            let mut members = IndexMap::new();
            for (name, variable) in &processing.exports {
                members.insert(name.clone(), variable.value.clone());
            }
            let value = Value::Imported {
                value: Box::new(Value::Object(members)),
                origin: origin.clone(),
            };
            let mut variable = Variable::new(alias.clone(), value)
                .with_source(VariableSource {
                    directive: "import".into(),
                    syntax: "namespace".into(),
                    interpolated: false,
                })
                .with_definition(directive.location.clone())
                .with_security(stamp.clone());
            variable.internal.captured_module_env = Some(Arc::clone(&processing.child_env));
            env.set_imported(variable, binding.clone())?;
        }
        ImportClause::All => unreachable!("rejected above"),
    }

    // Guard definitions attached to the module register only after the
    // bindings succeed.
    env.guards().register_all(processing.guards);

    if let ImportClause::Policy { alias } = clause {
        let module_json = {
            let mut members = serde_json::Map::new();
            for (name, variable) in &processing.exports {
                members.insert(name.clone(), variable.value.to_json());
            }
            serde_json::Value::Object(members)
        };
        let config = crate::policy::PolicyConfig::from_module_object(alias, module_json)
            .map_err(|reason| MlldError::new(ErrorKind::PolicyDenied { reason }))?;
        env.guards().register_all(config.compile_guards());
        env.security_manager().install_policy(config.clone())?;
        env.set_policy(config);
    }

    Ok(Value::Null)
}

fn imported_variable(
    binding_name: &str,
    exported: &Arc<Variable>,
    origin: &ImportOrigin,
    stamp: &crate::security::SecurityDescriptor,
    module_env: &Arc<Environment>,
    directive: &Directive,
) -> Variable {
    let mut security = exported.security.clone();
    security.merge(stamp);

    let value = Value::Imported {
        value: Box::new(exported.value.clone()),
        origin: origin.clone(),
    };
    let mut variable = Variable::new(binding_name, value)
        .with_source(VariableSource::directive("import"))
        .with_definition(directive.location.clone())
        .with_security(security);
    // Keep the module environment alive for executables; the definitions
    // themselves only hold weak back-references.
    variable.internal.captured_module_env = Some(Arc::clone(module_env));
    variable.internal.captured_shadow_envs = exported.internal.captured_shadow_envs.clone();
    variable.internal.mcp_tool = exported.internal.mcp_tool.clone();
    variable
}

/// Directory imports assemble a namespace whose entries are the module
/// exports of the directory's children, keyed by filename stem.
async fn import_directory(
    directive: &Directive,
    clause: &ImportClause,
    source: &str,
    resolution: &ImportResolution,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let children = env.resolver().load_directory(resolution).await?;

    let mut exports: IndexMap<String, Arc<Variable>> = IndexMap::new();
    let mut guards: Vec<GuardRule> = Vec::new();
    let mut keep_alive: Option<Arc<Environment>> = None;

    for (stem, module) in &children {
        let child_resolution = ImportResolution {
            kind: ResolutionKind::File,
            resolved_path: format!("{}/{stem}", resolution.resolved_path),
            resolver_name: resolution.resolver_name.clone(),
            prefer_local: resolution.prefer_local,
        };
        let processing = process_module(source, &child_resolution, module, env).await?;
        let mut members = IndexMap::new();
        for (name, variable) in &processing.exports {
            members.insert(name.clone(), variable.value.clone());
        }
        let mut member = Variable::new(stem.clone(), Value::Object(members));
        member.internal.captured_module_env = Some(Arc::clone(&processing.child_env));
        exports.insert(stem.clone(), Arc::new(member));
        guards.extend(processing.guards);
        keep_alive = Some(processing.child_env);
    }

    let processing = ModuleProcessing {
        exports,
        frontmatter: None,
        child_env: keep_alive.unwrap_or_else(|| env.create_child()),
        guards,
    };
    apply_import(directive, clause, source, resolution, processing, env)
}

/// `/import { X } from @input`: environment variables through the
/// allow-list.
fn import_env_vars(
    directive: &Directive,
    clause: &ImportClause,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let config = env.config();
    let binding = ImportBinding {
        source: "@input".into(),
        location: directive.location.clone(),
    };

    match clause {
        ImportClause::Selected { items } => {
            for item in items {
                if !config.env_allowlist.contains(&item.name) {
                    return Err(MlldError::new(ErrorKind::ExportedNameNotFound {
                        name: item.name.clone(),
                        module_source: "@input".into(),
                    }));
                }
            }
            for item in items {
                let value = config
                    .env_vars
                    .get(&item.name)
                    .map_or(Value::Null, |text| Value::text(text.clone()));
                let variable = Variable::new(item.binding_name(), value)
                    .with_source(VariableSource::directive("import"))
                    .with_definition(directive.location.clone())
                    .with_security(
                        env.security_snapshot()
                            .with_source(format!("env:{}", item.name)),
                    );
                env.set_imported(variable, binding.clone())?;
            }
            Ok(Value::Null)
        }
        _ => Err(MlldError::new(ErrorKind::ImportTypeMismatch {
            import_type: "selected".into(),
            resolver_kind: "@input only supports selected imports".into(),
        })),
    }
}
