//! The mlld evaluation core.
//!
//! Given a parsed document and an environment, produces the rendered
//! document plus side effects. Covers the value and variable model,
//! lexical environments, the directive router, the pipeline engine,
//! iterators, shadow execution of embedded JS/Node/shell/Python, the
//! import model, and the security/taint/guard layer.
//!
//! The surface grammar, CLI argument handling, and resolver backends are
//! collaborators supplied by the host; see [`import::Resolver`],
//! [`loader::ContentLoader`], and [`exec::McpHost`] for the seams.

pub mod effects;
pub mod env;
pub mod error;
pub mod exec;
pub mod guards;
pub mod import;
pub mod interpreter;
pub mod iterate;
pub mod loader;
pub mod lockfile;
pub mod pipeline;
pub mod policy;
pub mod resolve;
pub mod scheduler;
pub mod security;
pub mod security_manager;
pub mod value;
pub mod variable;

pub use env::{Environment, EnvironmentBuilder, EvalConfig};
pub use error::{ErrorKind, MlldError, MlldResult, TraceFrame};
pub use interpreter::{evaluate_directive, evaluate_document, EvalOutcome};
pub use value::{EvalValue, StructuredValue, Value};
pub use variable::Variable;
