//! Shadow execution: embedded-language runners and the values that bind
//! them.
//!
//! Each language has a shadow environment — a map from callable name to a
//! callable declared with `/exe`. Executables capture, at declaration time,
//! a snapshot of all shadow environments plus a back-reference to their
//! defining module environment, so sibling references resolve consistently
//! after import.

mod js;
mod mcp;
mod node;
mod python;
mod shell;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use indexmap::IndexMap;

use mlld_ast::{Expr, Lang, Template, WhenArm};

use crate::env::Environment;
use crate::error::MlldResult;
use crate::scheduler::CancelToken;
use crate::value::Value;

pub use js::JsRunner;
pub use mcp::{McpHost, NoMcpHost};
pub use node::NodeRunner;
pub use python::PythonRunner;
pub use shell::ShellRunner;

/// A callable visible inside embedded code blocks of one language.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShadowFn {
    pub name: String,
    pub params: Vec<String>,
    pub lang: Lang,
    pub source: String,
}

/// Per-language shadow environments. Read-only after capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowEnvSet {
    langs: IndexMap<Lang, IndexMap<String, Arc<ShadowFn>>>,
}

impl ShadowEnvSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, func: ShadowFn) {
        self.langs
            .entry(func.lang)
            .or_default()
            .insert(func.name.clone(), Arc::new(func));
    }

    /// The callables for one language, in declaration order.
    #[must_use]
    pub fn for_lang(&self, lang: Lang) -> Vec<Arc<ShadowFn>> {
        self.langs
            .get(&lang)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, lang: Lang, name: &str) -> Option<Arc<ShadowFn>> {
        self.langs.get(&lang).and_then(|map| map.get(name)).cloned()
    }

    /// Overlay `self` (captured) over `dynamic`: captured names win.
    #[must_use]
    pub fn overlaid_on(&self, dynamic: &Self) -> Self {
        let mut out = dynamic.clone();
        for (lang, map) in &self.langs {
            let entry = out.langs.entry(*lang).or_default();
            for (name, func) in map {
                entry.insert(name.clone(), func.clone());
            }
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.langs.values().all(IndexMap::is_empty)
    }
}

/// The body of an executable definition. Serializes for module export;
/// captured environments are intentionally not part of this shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ExecBodyDef {
    /// A one-shot command template.
    Command(Template),
    /// An embedded-language block.
    Language { lang: Lang, source: String },
    /// A template executable.
    Template(Template),
    /// A pure expression over the parameters.
    Expr(Expr),
    /// A conditional body.
    When { arms: Vec<WhenArm>, first: bool },
    /// A proxy for an MCP tool.
    Mcp { tool: String },
}

/// A named, invokable definition produced by `/exe`.
///
/// Holds a weak back-reference to the defining environment; the importer
/// keeps the strong reference that keeps module environments alive, so
/// definitions never form reference cycles with their environments.
#[derive(Clone)]
pub struct ExecDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: ExecBodyDef,
    /// Shadow environments captured at declaration.
    pub shadow: ShadowEnvSet,
    /// The defining module environment, used to resolve sibling names.
    pub module_env: Weak<Environment>,
    /// The scoped `@tools` value captured by the `env with { tools: … }`
    /// form, evaluated once at declaration.
    pub captured_tools: Option<crate::value::EvalValue>,
    /// Set when the executable proxies an MCP tool.
    pub mcp_tool: Option<String>,
}

impl std::fmt::Debug for ExecDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("mcp_tool", &self.mcp_tool)
            .finish_non_exhaustive()
    }
}

impl ExecDef {
    /// The language of the body, when it is a language block.
    #[must_use]
    pub fn lang(&self) -> Option<Lang> {
        match &self.body {
            ExecBodyDef::Language { lang, .. } => Some(*lang),
            _ => None,
        }
    }

    /// Convert to a shadow callable, when the body is a language block.
    #[must_use]
    pub fn as_shadow_fn(&self) -> Option<ShadowFn> {
        match &self.body {
            ExecBodyDef::Language { lang, source } => Some(ShadowFn {
                name: self.name.clone(),
                params: self.params.clone(),
                lang: *lang,
                source: source.clone(),
            }),
            _ => None,
        }
    }
}

/// A request to run embedded code.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: String,
    /// Parameters marshalled by value; name order is binding order.
    pub params: Vec<(String, Value)>,
    /// Shadow callables visible to the code, captured over dynamic.
    pub shadow: Vec<Arc<ShadowFn>>,
    pub timeout_ms: Option<u64>,
    pub cancel: CancelToken,
}

impl RunRequest {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            params: Vec::new(),
            shadow: Vec::new(),
            timeout_ms: None,
            cancel: CancelToken::new(),
        }
    }
}

/// The result of running embedded code.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub value: Value,
    pub stdout: String,
    pub stderr: String,
}

/// A runner for one embedded language.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// The language this runner executes.
    fn lang(&self) -> Lang;

    /// Run the code and return its value plus captured streams.
    async fn run(&self, request: RunRequest) -> MlldResult<RunOutput>;
}

/// The set of runners available to an evaluation.
pub struct RunnerSet {
    runners: Vec<Arc<dyn CodeRunner>>,
    mcp: Arc<dyn McpHost>,
}

impl std::fmt::Debug for RunnerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSet")
            .field(
                "langs",
                &self.runners.iter().map(|r| r.lang()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Default for RunnerSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RunnerSet {
    /// An empty set with no runners and no MCP host; every invocation
    /// fails. Useful as a base for tests that register mocks.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            runners: Vec::new(),
            mcp: Arc::new(NoMcpHost),
        }
    }

    /// The default set: in-process JS plus child-process node, sh, bash,
    /// and python runners.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            runners: vec![
                Arc::new(JsRunner::new()),
                Arc::new(NodeRunner::new()),
                Arc::new(ShellRunner::new(Lang::Sh)),
                Arc::new(ShellRunner::new(Lang::Bash)),
                Arc::new(PythonRunner::new()),
            ],
            mcp: Arc::new(NoMcpHost),
        }
    }

    /// Register or replace the runner for a language.
    pub fn register(&mut self, runner: Arc<dyn CodeRunner>) {
        self.runners.retain(|r| r.lang() != runner.lang());
        self.runners.push(runner);
    }

    pub fn set_mcp_host(&mut self, host: Arc<dyn McpHost>) {
        self.mcp = host;
    }

    #[must_use]
    pub fn mcp(&self) -> &Arc<dyn McpHost> {
        &self.mcp
    }

    /// Resolve the runner for a language.
    ///
    /// # Errors
    ///
    /// Returns an internal error when no runner is registered.
    pub fn for_lang(&self, lang: Lang) -> MlldResult<Arc<dyn CodeRunner>> {
        self.runners
            .iter()
            .find(|r| r.lang() == lang)
            .cloned()
            .ok_or_else(|| crate::error::MlldError::internal(format!("no runner for {lang}")))
    }
}
