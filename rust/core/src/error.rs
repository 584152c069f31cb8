//! The evaluation-core error taxonomy.
//!
//! Errors carry a stable code string, an optional source location, and a
//! directive-trace chain (innermost frame first). Evaluators catch only to
//! enrich and rethrow; the front-end decides how to surface.

use serde::ser::SerializeMap;

use mlld_ast::Location;

/// One frame of the directive trace attached to errors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TraceFrame {
    /// Directive kind (`var`, `run`, `import`, …).
    pub kind: String,
    /// Principal identifier: bound name, command, or import source.
    pub principal: String,
    pub location: Location,
}

impl std::fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{} {} at {}", self.kind, self.principal, self.location)
    }
}

/// The kind-specific payload of an [`MlldError`].
///
/// Organized by the taxonomy categories: resolution, import, execution,
/// security, pipeline, and internal, plus wrappers for library errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    // -- Resolution --
    /// A variable reference did not resolve.
    #[error("unknown variable: @{name}")]
    UnknownVariable { name: String },

    /// A field path did not resolve in strict mode.
    #[error("field not found: {path}")]
    FieldNotFound { path: String },

    /// Interpolation of a template failed.
    #[error("interpolation failed: {reason}")]
    Interpolation { reason: String },

    /// A `/for` or `foreach` source is not an array or object.
    #[error("cannot iterate over {type_name}")]
    NotIterable { type_name: String },

    // -- Import --
    /// Two imports bound the same name from different sources.
    #[error(
        "name `{name}` already imported from {first_source} at {first_location}; conflicting import from {second_source} at {second_location}"
    )]
    ImportNameConflict {
        name: String,
        first_source: String,
        first_location: Location,
        second_source: String,
        second_location: Location,
    },

    /// The import type is incompatible with the resolver kind.
    #[error("import type `{import_type}` cannot be satisfied by {resolver_kind} resolution")]
    ImportTypeMismatch {
        import_type: String,
        resolver_kind: String,
    },

    /// A selected name does not exist in the module's exports.
    #[error("`{name}` is not exported by {module_source}")]
    ExportedNameNotFound {
        name: String,
        module_source: String,
    },

    /// The module exports nothing importable.
    #[error("{module_source} has no exports")]
    ImportExportMissing { module_source: String },

    /// The fixed `{*}` rejection.
    #[error("wildcard imports are not supported; list names explicitly")]
    WildcardImport,

    // -- Execution --
    /// A command exited nonzero or could not be spawned.
    #[error("command `{command}` failed (status {status:?})")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// An operation exceeded its time budget.
    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The evaluation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The router received a directive kind it does not know.
    #[error("unknown directive: {kind}")]
    UnknownDirective { kind: String },

    /// A pre-hook aborted the directive.
    #[error("aborted by hook: {reason}")]
    HookAborted { reason: String },

    /// A call target is not an executable.
    #[error("@{name} is not callable")]
    NotCallable { name: String },

    /// Command validation failed before execution.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    // -- Security --
    /// The policy engine denied the operation.
    #[error("denied by policy: {reason}")]
    PolicyDenied { reason: String },

    /// A guard denied the operation.
    #[error("denied by guard @{guard}: {reason}")]
    GuardDenied { guard: String, reason: String },

    /// A path is outside the permitted roots.
    #[error("path access denied: {path}: {reason}")]
    PathAccessDenied { path: String, reason: String },

    /// An import requires approval that was not granted.
    #[error("import not approved: {url}")]
    ImportNotApproved { url: String },

    // -- Pipeline --
    /// `retry` was requested at an illegal point.
    #[error("invalid retry: {reason}")]
    InvalidRetry { reason: String },

    /// A parallel branch failed without a guard catching it.
    #[error("parallel branch {index} failed: {reason}")]
    ParallelBranchFailed { index: usize, reason: String },

    // -- Internal --
    /// An invariant was violated; always a bug.
    #[error("internal error: {message}")]
    Internal { message: String },

    // -- Wrappers --
    #[error("io error: {message}")]
    Io { message: String },

    #[error("json error: {message}")]
    Json { message: String },
}

impl ErrorKind {
    /// A unique error code string for this variant.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownVariable { .. } => "UNKNOWN_VARIABLE",
            Self::FieldNotFound { .. } => "FIELD_NOT_FOUND",
            Self::Interpolation { .. } => "INTERPOLATION_FAILED",
            Self::NotIterable { .. } => "NOT_ITERABLE",
            Self::ImportNameConflict { .. } => "IMPORT_NAME_CONFLICT",
            Self::ImportTypeMismatch { .. } => "IMPORT_TYPE_MISMATCH",
            Self::ExportedNameNotFound { .. } => "EXPORTED_NAME_NOT_FOUND",
            Self::ImportExportMissing { .. } => "IMPORT_EXPORT_MISSING",
            Self::WildcardImport => "WILDCARD_IMPORT",
            Self::CommandFailed { .. } => "COMMAND_EXECUTION_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::UnknownDirective { .. } => "UNKNOWN_DIRECTIVE",
            Self::HookAborted { .. } => "HOOK_ABORTED",
            Self::NotCallable { .. } => "NOT_CALLABLE",
            Self::InvalidCommand { .. } => "INVALID_COMMAND",
            Self::PolicyDenied { .. } => "POLICY_DENIED",
            Self::GuardDenied { .. } => "GUARD_DENIED",
            Self::PathAccessDenied { .. } => "PATH_ACCESS_DENIED",
            Self::ImportNotApproved { .. } => "IMPORT_NOT_APPROVED",
            Self::InvalidRetry { .. } => "INVALID_RETRY",
            Self::ParallelBranchFailed { .. } => "PARALLEL_BRANCH_FAILED",
            Self::Internal { .. } => "INTERNAL",
            Self::Io { .. } => "IO_ERROR",
            Self::Json { .. } => "JSON_ERROR",
        }
    }

    /// Whether the error comes from the security layer.
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::PolicyDenied { .. }
                | Self::GuardDenied { .. }
                | Self::PathAccessDenied { .. }
                | Self::ImportNotApproved { .. }
        )
    }

    /// Whether the error terminates a pipeline as a denial.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::GuardDenied { .. } | Self::PolicyDenied { .. })
    }
}

/// An evaluation error: kind plus location and directive trace.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct MlldError {
    pub kind: ErrorKind,
    pub location: Option<Location>,
    /// Directive trace, innermost frame first.
    pub trace: Vec<TraceFrame>,
}

impl MlldError {
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: None,
            trace: Vec::new(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }

    /// Attach a trace snapshot if the error does not have one yet.
    #[must_use]
    pub fn with_trace(mut self, trace: Vec<TraceFrame>) -> Self {
        if self.trace.is_empty() {
            self.trace = trace;
        }
        self
    }

    /// Stable code string, delegated to the kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The process exit code the front-end should use.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match &self.kind {
            ErrorKind::Cancelled => 130,
            kind if kind.is_denial() => 2,
            _ => 1,
        }
    }
}

impl From<ErrorKind> for MlldError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<std::io::Error> for MlldError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io {
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for MlldError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Json {
            message: err.to_string(),
        })
    }
}

impl serde::Serialize for MlldError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("code", self.code())?;
        map.serialize_entry("message", &self.to_string())?;
        if let Some(location) = &self.location {
            map.serialize_entry("location", location)?;
        }
        if !self.trace.is_empty() {
            map.serialize_entry("trace", &self.trace)?;
        }
        map.end()
    }
}

/// A `Result` type alias using [`MlldError`].
pub type MlldResult<T> = Result<T, MlldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_category() {
        assert_eq!(MlldError::new(ErrorKind::Cancelled).exit_code(), 130);
        assert_eq!(
            MlldError::new(ErrorKind::GuardDenied {
                guard: "g".into(),
                reason: "r".into()
            })
            .exit_code(),
            2
        );
        assert_eq!(MlldError::internal("boom").exit_code(), 1);
    }

    #[test]
    fn trace_attaches_once() {
        let frame = TraceFrame {
            kind: "var".into(),
            principal: "@x".into(),
            location: Location::default(),
        };
        let err = MlldError::internal("boom")
            .with_trace(vec![frame.clone()])
            .with_trace(vec![]);
        assert_eq!(err.trace, vec![frame]);
    }

    #[test]
    fn serialized_shape() {
        let err = MlldError::new(ErrorKind::WildcardImport);
        let json = serde_json::to_value(&err).expect("serializes");
        assert_eq!(json["code"], "WILDCARD_IMPORT");
        assert!(json["message"].as_str().is_some());
    }
}
