//! Lexically nested evaluation environments.
//!
//! An environment owns the bindings of one scope and reads through its
//! parent chain. Mutation goes through `&self` behind an [`RwLock`]
//! (poisoned locks are recovered so a panic in one branch does not block
//! others). Child environments never mutate parents; parallel branches
//! each receive their own child.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;

use mlld_ast::Location;

use crate::effects::{BufferedSink, EffectSink};
use crate::error::{ErrorKind, MlldError, MlldResult, TraceFrame};
use crate::exec::{RunnerSet, ShadowEnvSet, ShadowFn};
use crate::guards::GuardRegistry;
use crate::import::{Resolver, UnresolvedResolver};
use crate::loader::{ContentLoader, FsLoader};
use crate::interpreter::DirectiveHook;
use crate::policy::PolicyConfig;
use crate::scheduler::CancelToken;
use crate::security::SecurityDescriptor;
use crate::security_manager::SecurityManager;
use crate::variable::Variable;

/// Evaluation-wide configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Global cap on simultaneous in-flight parallel operations.
    pub parallel_limit: usize,
    /// Strict field access: unknown fields and out-of-range indices error
    /// instead of producing null.
    pub strict_fields: bool,
    /// Collapse three or more consecutive newlines to two at flush time.
    pub normalize_blank_lines: bool,
    /// Project root for path containment checks.
    pub project_root: PathBuf,
    /// Whether absolute paths outside the project root are permitted.
    pub allow_absolute_paths: bool,
    /// Names importable from `@input`.
    pub env_allowlist: Vec<String>,
    /// The values backing `@input` imports.
    pub env_vars: IndexMap<String, String>,
    /// Wrap embedded-language results as structured values.
    pub structured_exec: bool,
    /// Default time budget for embedded-code invocations, milliseconds.
    pub exec_timeout_ms: Option<u64>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            parallel_limit: 4,
            strict_fields: false,
            normalize_blank_lines: true,
            project_root: PathBuf::from("."),
            allow_absolute_paths: false,
            env_allowlist: Vec::new(),
            env_vars: IndexMap::new(),
            structured_exec: true,
            exec_timeout_ms: None,
        }
    }
}

/// A ledger entry recording which import introduced a public name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub source: String,
    pub location: Location,
}

/// Collaborators and state shared by every environment of one evaluation.
pub struct EnvShared {
    pub sink: Arc<dyn EffectSink>,
    pub guards: GuardRegistry,
    pub security: Arc<SecurityManager>,
    pub runners: RunnerSet,
    pub resolver: Arc<dyn Resolver>,
    pub loader: Arc<dyn ContentLoader>,
    pub hooks: Vec<Arc<dyn DirectiveHook>>,
    pub config: EvalConfig,
    pub cancel: CancelToken,
    /// The directive trace stack; shared so inner scopes enrich errors
    /// with outer frames. Frames pushed by concurrent branches may
    /// interleave; snapshots are taken at error time.
    trace: Mutex<Vec<TraceFrame>>,
}

impl std::fmt::Debug for EnvShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvShared")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct EnvInner {
    vars: IndexMap<String, Arc<Variable>>,
    ledger: IndexMap<String, ImportBinding>,
    /// Export manifest accumulated by `/export` directives; `None` means
    /// everything non-system is exported.
    exports: Option<Vec<String>>,
    shadow: ShadowEnvSet,
    policy: Option<PolicyConfig>,
    security_snapshot: SecurityDescriptor,
}

impl EnvInner {
    fn empty() -> Self {
        Self {
            vars: IndexMap::new(),
            ledger: IndexMap::new(),
            exports: None,
            shadow: ShadowEnvSet::new(),
            policy: None,
            security_snapshot: SecurityDescriptor::default(),
        }
    }
}

/// One lexical scope.
pub struct Environment {
    inner: RwLock<EnvInner>,
    parent: Option<Arc<Environment>>,
    file_path: Option<PathBuf>,
    shared: Arc<EnvShared>,
    /// Module evaluations get an isolated sink so imported documents do
    /// not render into the importer's document.
    sink_override: Option<Arc<dyn EffectSink>>,
    /// Module evaluations collect `/guard` definitions here instead of
    /// registering them; registration happens at import application.
    guard_collector: Option<Arc<Mutex<Vec<crate::guards::GuardRule>>>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("Environment")
            .field("vars", &inner.vars.keys().collect::<Vec<_>>())
            .field("file_path", &self.file_path)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Environment {
    /// A root environment for one file evaluation.
    #[must_use]
    pub fn root(shared: Arc<EnvShared>, file_path: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(EnvInner::empty()),
            parent: None,
            file_path,
            shared,
            sink_override: None,
            guard_collector: None,
        })
    }

    /// A builder wiring default collaborators.
    #[must_use]
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// A child scope. Lookup reads through to this environment; writes
    /// stay in the child.
    #[must_use]
    pub fn create_child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(EnvInner::empty()),
            parent: Some(Arc::clone(self)),
            file_path: self.file_path.clone(),
            shared: Arc::clone(&self.shared),
            sink_override: None,
            guard_collector: None,
        })
    }

    /// A fresh scope for evaluating an imported module: rooted at the
    /// module's file, document output isolated, guard definitions
    /// collected for later registration.
    #[must_use]
    pub fn create_import_child(
        self: &Arc<Self>,
        file_path: Option<PathBuf>,
        sink: Arc<dyn EffectSink>,
    ) -> (Arc<Self>, Arc<Mutex<Vec<crate::guards::GuardRule>>>) {
        let collector = Arc::new(Mutex::new(Vec::new()));
        let env = Arc::new(Self {
            inner: RwLock::new(EnvInner::empty()),
            parent: Some(Arc::clone(self)),
            file_path,
            shared: Arc::clone(&self.shared),
            sink_override: Some(sink),
            guard_collector: Some(Arc::clone(&collector)),
        });
        (env, collector)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, EnvInner> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, EnvInner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // -- Bindings --

    /// Look a name up, climbing the parent chain.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Variable>> {
        if let Some(var) = self.read().vars.get(name) {
            return Some(Arc::clone(var));
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Bind a variable in this scope. Re-binding replaces the entry; a
    /// name introduced by an import loses its ledger entry when local
    /// code deliberately rebinds it.
    pub fn set(&self, variable: Variable) {
        let mut inner = self.write();
        let name = variable.name.clone();
        inner.ledger.shift_remove(&name);
        inner.vars.insert(name, Arc::new(variable));
    }

    /// Bind a variable produced by an import, recording the ledger entry.
    ///
    /// # Errors
    ///
    /// Fails with `IMPORT_NAME_CONFLICT` when the name is already bound
    /// from a different import source. The failure happens before the
    /// binding is applied.
    pub fn set_imported(&self, variable: Variable, binding: ImportBinding) -> MlldResult<()> {
        self.record_import_binding(&variable.name, binding)?;
        let mut inner = self.write();
        inner.vars.insert(variable.name.clone(), Arc::new(variable));
        Ok(())
    }

    /// Record that `name` was introduced by an import.
    ///
    /// # Errors
    ///
    /// Fails with `IMPORT_NAME_CONFLICT` when a different source already
    /// introduced the name.
    pub fn record_import_binding(&self, name: &str, binding: ImportBinding) -> MlldResult<()> {
        let mut inner = self.write();
        if let Some(existing) = inner.ledger.get(name) {
            if existing.source != binding.source {
                return Err(MlldError::new(ErrorKind::ImportNameConflict {
                    name: name.to_string(),
                    first_source: existing.source.clone(),
                    first_location: existing.location.clone(),
                    second_source: binding.source,
                    second_location: binding.location,
                }));
            }
        }
        inner.ledger.insert(name.to_string(), binding);
        Ok(())
    }

    /// The ledger entry for a name, if an import introduced it.
    #[must_use]
    pub fn import_binding(&self, name: &str) -> Option<ImportBinding> {
        self.read().ledger.get(name).cloned()
    }

    /// Deep snapshot of this scope's own bindings, for executables and
    /// export serialization. Only observes names that were actually set.
    #[must_use]
    pub fn capture_module(&self) -> IndexMap<String, Arc<Variable>> {
        self.read().vars.clone()
    }

    /// Names bound directly in this scope, in insertion order.
    #[must_use]
    pub fn local_names(&self) -> Vec<String> {
        self.read().vars.keys().cloned().collect()
    }

    // -- Exports --

    /// Extend the export manifest.
    pub fn add_exports(&self, names: &[String]) {
        let mut inner = self.write();
        let manifest = inner.exports.get_or_insert_with(Vec::new);
        for name in names {
            if !manifest.contains(name) {
                manifest.push(name.clone());
            }
        }
    }

    /// The export manifest: explicit names, or every non-system binding
    /// when no `/export` directive ran.
    #[must_use]
    pub fn exported_names(&self) -> Vec<String> {
        let inner = self.read();
        match &inner.exports {
            Some(names) => names.clone(),
            None => inner
                .vars
                .iter()
                .filter(|(_, v)| !v.internal.is_system)
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }

    // -- Shadow environments --

    /// Add a callable to this scope's shadow environment.
    pub fn add_shadow_fn(&self, func: ShadowFn) {
        self.write().shadow.add(func);
    }

    /// The shadow environments visible from this scope: nearest scope
    /// wins over ancestors.
    #[must_use]
    pub fn shadow_envs(&self) -> ShadowEnvSet {
        let own = self.read().shadow.clone();
        match &self.parent {
            Some(parent) => own.overlaid_on(&parent.shadow_envs()),
            None => own,
        }
    }

    // -- Policy & security --

    /// Install an environment-scoped policy. A policy already in scope
    /// merges restrictively.
    pub fn set_policy(&self, policy: PolicyConfig) {
        let mut inner = self.write();
        inner.policy = Some(match inner.policy.take() {
            Some(existing) => PolicyConfig::more_restrictive(existing, policy),
            None => policy,
        });
    }

    /// The nearest policy in scope.
    #[must_use]
    pub fn policy(&self) -> Option<PolicyConfig> {
        if let Some(policy) = self.read().policy.clone() {
            return Some(policy);
        }
        self.parent.as_ref().and_then(|parent| parent.policy())
    }

    /// Extend the labels/taint that propagate to values created in this
    /// scope.
    pub fn extend_security_snapshot(&self, descriptor: &SecurityDescriptor) {
        self.write().security_snapshot.merge(descriptor);
    }

    /// The security snapshot: this scope's merged over all ancestors'.
    #[must_use]
    pub fn security_snapshot(&self) -> SecurityDescriptor {
        let mut snapshot = match &self.parent {
            Some(parent) => parent.security_snapshot(),
            None => SecurityDescriptor::default(),
        };
        snapshot.merge(&self.read().security_snapshot);
        snapshot
    }

    // -- Directive trace --

    pub fn push_directive(&self, frame: TraceFrame) {
        self.shared
            .trace
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(frame);
    }

    pub fn pop_directive(&self) {
        self.shared
            .trace
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop();
    }

    /// Snapshot of the trace, innermost frame first.
    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceFrame> {
        let mut frames = self
            .shared
            .trace
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        frames.reverse();
        frames
    }

    // -- Accessors --

    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// The directory containing the current file, or the project root.
    #[must_use]
    pub fn path_context(&self) -> PathBuf {
        self.file_path
            .as_deref()
            .and_then(Path::parent)
            .map_or_else(|| self.shared.config.project_root.clone(), Path::to_path_buf)
    }

    #[must_use]
    pub fn shared(&self) -> &Arc<EnvShared> {
        &self.shared
    }

    /// The effect sink for this scope: the nearest override (module
    /// evaluation) or the evaluation-wide sink.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn EffectSink> {
        if let Some(sink) = &self.sink_override {
            return Arc::clone(sink);
        }
        match &self.parent {
            Some(parent) => parent.sink(),
            None => Arc::clone(&self.shared.sink),
        }
    }

    /// The nearest guard collector, when evaluation is inside a module.
    #[must_use]
    pub fn guard_collector(&self) -> Option<Arc<Mutex<Vec<crate::guards::GuardRule>>>> {
        if let Some(collector) = &self.guard_collector {
            return Some(Arc::clone(collector));
        }
        self.parent.as_ref().and_then(|p| p.guard_collector())
    }

    #[must_use]
    pub fn guards(&self) -> &GuardRegistry {
        &self.shared.guards
    }

    #[must_use]
    pub fn security_manager(&self) -> &Arc<SecurityManager> {
        &self.shared.security
    }

    #[must_use]
    pub fn runners(&self) -> &RunnerSet {
        &self.shared.runners
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.shared.resolver
    }

    #[must_use]
    pub fn loader(&self) -> &Arc<dyn ContentLoader> {
        &self.shared.loader
    }

    #[must_use]
    pub fn hooks(&self) -> &[Arc<dyn DirectiveHook>] {
        &self.shared.hooks
    }

    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn cancel(&self) -> &CancelToken {
        &self.shared.cancel
    }
}

/// Builds the shared collaborator set and a root environment.
pub struct EnvironmentBuilder {
    sink: Arc<dyn EffectSink>,
    security: Option<Arc<SecurityManager>>,
    runners: RunnerSet,
    resolver: Arc<dyn Resolver>,
    loader: Arc<dyn ContentLoader>,
    hooks: Vec<Arc<dyn DirectiveHook>>,
    config: EvalConfig,
    cancel: CancelToken,
    file_path: Option<PathBuf>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            sink: Arc::new(BufferedSink::new()),
            security: None,
            runners: RunnerSet::with_defaults(),
            resolver: Arc::new(UnresolvedResolver),
            loader: Arc::new(FsLoader),
            hooks: Vec::new(),
            config: EvalConfig::default(),
            cancel: CancelToken::new(),
            file_path: None,
        }
    }
}

impl EnvironmentBuilder {
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EffectSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn security(mut self, security: Arc<SecurityManager>) -> Self {
        self.security = Some(security);
        self
    }

    #[must_use]
    pub fn runners(mut self, runners: RunnerSet) -> Self {
        self.runners = runners;
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn ContentLoader>) -> Self {
        self.loader = loader;
        self
    }

    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn DirectiveHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Build the root environment.
    #[must_use]
    pub fn build(self) -> Arc<Environment> {
        let security = self.security.unwrap_or_else(|| {
            Arc::new(SecurityManager::permissive(
                self.config.project_root.clone(),
            ))
        });
        let shared = Arc::new(EnvShared {
            sink: self.sink,
            guards: GuardRegistry::new(),
            security,
            runners: self.runners,
            resolver: self.resolver,
            loader: self.loader,
            hooks: self.hooks,
            config: self.config,
            cancel: self.cancel,
            trace: Mutex::new(Vec::new()),
        });
        Environment::root(shared, self.file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn lookup_climbs_parents() {
        let root = Environment::builder().build();
        root.set(Variable::new("x", Value::text("outer")));

        let child = root.create_child();
        assert_eq!(
            child.get("x").map(|v| v.value.clone()),
            Some(Value::text("outer"))
        );

        child.set(Variable::new("x", Value::text("inner")));
        assert_eq!(
            child.get("x").map(|v| v.value.clone()),
            Some(Value::text("inner"))
        );
        // The child write never reaches the parent.
        assert_eq!(
            root.get("x").map(|v| v.value.clone()),
            Some(Value::text("outer"))
        );
    }

    #[test]
    fn import_collision_detected_per_source() {
        let env = Environment::builder().build();
        let binding_a = ImportBinding {
            source: "a.mld".into(),
            location: Location::at(1, 1),
        };
        let binding_b = ImportBinding {
            source: "b.mld".into(),
            location: Location::at(2, 1),
        };

        env.set_imported(Variable::new("x", Value::text("1")), binding_a.clone())
            .expect("first import binds");
        // Same source re-imports fine.
        env.set_imported(Variable::new("x", Value::text("1")), binding_a)
            .expect("same-source rebind is not a conflict");
        // A different source conflicts.
        let err = env
            .set_imported(Variable::new("x", Value::text("2")), binding_b)
            .expect_err("cross-source rebind conflicts");
        assert_eq!(err.code(), "IMPORT_NAME_CONFLICT");
    }

    #[test]
    fn capture_module_sees_only_set_names() {
        let env = Environment::builder().build();
        env.set(Variable::new("a", Value::Number(1.0)));
        let snapshot = env.capture_module();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn exports_default_to_all_non_system() {
        let env = Environment::builder().build();
        env.set(Variable::new("a", Value::Number(1.0)));
        env.set(Variable::system("ctx", Value::Null));
        assert_eq!(env.exported_names(), vec!["a".to_string()]);

        env.add_exports(&["a".to_string()]);
        assert_eq!(env.exported_names(), vec!["a".to_string()]);
    }

    #[test]
    fn security_snapshot_accumulates_down_the_chain() {
        let root = Environment::builder().build();
        root.extend_security_snapshot(&SecurityDescriptor::tainted("network"));
        let child = root.create_child();
        child.extend_security_snapshot(&SecurityDescriptor::tainted("file_system"));

        let snapshot = child.security_snapshot();
        assert!(snapshot.has_taint("network"));
        assert!(snapshot.has_taint("file_system"));
        assert!(!root.security_snapshot().has_taint("file_system"));
    }
}
