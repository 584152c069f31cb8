//! Variables: named, immutable bindings published into environments.

use std::sync::Arc;

use mlld_ast::Location;

use crate::env::Environment;
use crate::exec::ShadowEnvSet;
use crate::security::SecurityDescriptor;
use crate::value::Value;

/// How a variable came to exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSource {
    /// Directive kind that produced the binding (`var`, `exe`, `import`, …).
    pub directive: String,
    /// Surface syntax form (`literal`, `template`, `loader`, …).
    pub syntax: String,
    /// Whether the right-hand side interpolated other variables.
    pub interpolated: bool,
}

impl VariableSource {
    #[must_use]
    pub fn directive(kind: &str) -> Self {
        Self {
            directive: kind.to_string(),
            ..Self::default()
        }
    }
}

/// Implementation-private captures attached to a variable.
#[derive(Debug, Clone, Default)]
pub struct VariableInternal {
    /// Shadow environments captured when the binding was created; set on
    /// executables so embedded code resolves siblings consistently.
    pub captured_shadow_envs: Option<Arc<ShadowEnvSet>>,
    /// Strong reference keeping an imported module's environment alive.
    /// Executable definitions themselves only hold weak back-references.
    pub captured_module_env: Option<Arc<Environment>>,
    /// Set on bindings the evaluator itself injects (`@ctx`, `@mx`, …).
    pub is_system: bool,
    /// The MCP tool this binding proxies, if any.
    pub mcp_tool: Option<String>,
}

/// A named binding. Immutable once published; re-binding a name replaces
/// the entry.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    pub source: VariableSource,
    pub definition: Location,
    pub security: SecurityDescriptor,
    pub internal: VariableInternal,
}

impl Variable {
    #[must_use]
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            source: VariableSource::default(),
            definition: Location::default(),
            security: SecurityDescriptor::default(),
            internal: VariableInternal::default(),
        }
    }

    /// A binding injected by the evaluator itself.
    #[must_use]
    pub fn system(name: impl Into<String>, value: Value) -> Self {
        let mut variable = Self::new(name, value);
        variable.internal.is_system = true;
        variable
    }

    #[must_use]
    pub fn with_source(mut self, source: VariableSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_definition(mut self, location: Location) -> Self {
        self.definition = location;
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: SecurityDescriptor) -> Self {
        self.security = security;
        self
    }

    /// The kind name reported by type guards.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.value.type_name()
    }
}
