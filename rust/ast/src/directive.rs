//! Directives: the top-level statements of an mlld document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::expr::{Expr, Template};
use crate::location::Location;

/// An embedded-code language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Js,
    Node,
    Sh,
    Bash,
    Python,
}

impl Lang {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Node => "node",
            Self::Sh => "sh",
            Self::Bash => "bash",
            Self::Python => "python",
        }
    }

    /// Whether this language runs as a child shell process.
    #[must_use]
    pub const fn is_shell(self) -> bool {
        matches!(self, Self::Sh | Self::Bash)
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "js" | "javascript" => Ok(Self::Js),
            "node" | "nodejs" => Ok(Self::Node),
            "sh" => Ok(Self::Sh),
            "bash" => Ok(Self::Bash),
            "python" | "py" => Ok(Self::Python),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// The body of an `/exe` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "body", rename_all = "camelCase")]
pub enum ExeBody {
    /// `= { command @param … }` — a one-shot command template.
    Command { template: Template },
    /// `= lang { … }` — an embedded-language block.
    Language { lang: Lang, source: String },
    /// `= ::…::` — a template executable.
    Template { template: Template },
    /// `= <expr>` — a pure expression over the parameters.
    Expr { expr: Expr },
    /// `= when [ … ]` — conditional body; `retry` arms are legal only when
    /// the executable runs as a pipeline stage.
    When {
        arms: Vec<WhenArm>,
        #[serde(default)]
        first: bool,
    },
    /// A binding to an MCP tool; invocation is proxied to the tool host.
    McpTool { tool: String },
}

/// A `/run` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "run", rename_all = "camelCase")]
pub enum RunSpec {
    /// `/run <command>` — a single command; `&&`/`||` chaining is rejected
    /// at evaluation time.
    Command { template: Template },
    /// `/run sh { … }` — a multi-line shell (or other language) block.
    Block { lang: Lang, source: String },
}

/// One arm of a `/when` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenArm {
    pub cond: Expr,
    pub action: WhenAction,
}

/// The action taken when a `/when` arm matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum WhenAction {
    /// Evaluate an expression; in executable bodies this is the result.
    Expr { expr: Expr },
    /// Execute a nested directive for its effects.
    Directive { directive: Box<Directive> },
    /// Ask the pipeline to re-run the previous stage.
    Retry,
}

/// The statement body of a `/for` directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "for", rename_all = "camelCase")]
pub enum ForBody {
    /// `=> /show @x` — run a directive per iteration.
    Directive { directive: Box<Directive> },
    /// `=> expr` — evaluate per iteration; values are collected when the
    /// directive is in collection position.
    Expr { expr: Expr },
}

/// Concurrency settings for `/for parallel`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParallelSpec {
    /// Concurrency cap; `None` defers to the global limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<usize>,
    /// Pacing: operations per second issued to the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
}

/// One item of a selected import: `a` or `a as b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImportItem {
    /// The name the binding takes in the importing environment.
    #[must_use]
    pub fn binding_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// The shape of an `/import` directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause", rename_all = "camelCase")]
pub enum ImportClause {
    /// `/import { a, b as c } from "src"`
    Selected { items: Vec<ImportItem> },
    /// `/import "src" as @ns`
    Namespace { alias: String },
    /// `/import policy "src" as @name`
    Policy { alias: String },
    /// `/import { * } from "src"` — always rejected.
    All,
}

/// Import type constraining which resolver kinds are acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    Module,
    Static,
    Cached,
    Live,
    Local,
    Templates,
}

impl ImportType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Static => "static",
            Self::Cached => "cached",
            Self::Live => "live",
            Self::Local => "local",
            Self::Templates => "templates",
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache duration parsed from strings like `"30s"`, `"5m"`, `"2h"`.
///
/// Applies only to `cached` imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheDuration(std::time::Duration);

impl CacheDuration {
    /// Parse from the surface form. Supported suffixes: `s`, `m`, `h`, `d`.
    pub fn from_spec_str(s: &str) -> Result<Self, String> {
        let (value, unit) = if let Some(rest) = s.strip_suffix('s') {
            (rest, "s")
        } else if let Some(rest) = s.strip_suffix('m') {
            (rest, "m")
        } else if let Some(rest) = s.strip_suffix('h') {
            (rest, "h")
        } else if let Some(rest) = s.strip_suffix('d') {
            (rest, "d")
        } else {
            return Err(format!("invalid duration string: {s}"));
        };

        let n: u64 = value
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration number: {s}"))?;

        let secs = match unit {
            "s" => Some(n),
            "m" => n.checked_mul(60),
            "h" => n.checked_mul(3_600),
            "d" => n.checked_mul(86_400),
            _ => unreachable!(),
        };

        let secs = secs.ok_or_else(|| format!("duration overflow: {s}"))?;
        Ok(Self(std::time::Duration::from_secs(secs)))
    }

    #[must_use]
    pub fn inner(self) -> std::time::Duration {
        self.0
    }
}

impl fmt::Display for CacheDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs == 0 {
            return f.write_str("0s");
        }
        if secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs % 3_600 == 0 {
            write!(f, "{}h", secs / 3_600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

impl Serialize for CacheDuration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CacheDuration {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_spec_str(&s).map_err(serde::de::Error::custom)
    }
}

/// The operation kind a guard trigger names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Exe,
    Run,
    Output,
    Import,
    Path,
    Show,
}

impl OpKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exe => "exe",
            Self::Run => "run",
            Self::Output => "output",
            Self::Import => "import",
            Self::Path => "path",
            Self::Show => "show",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.as_str())
    }
}

/// Whether a guard fires before or after its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardTiming {
    Before,
    After,
}

/// A guard trigger: timing plus operation kind, e.g. `before op:exe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardTrigger {
    pub timing: GuardTiming,
    pub op: OpKind,
}

/// A condition over the operation metadata `@mx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GuardCond {
    /// `@mx.taint` contains the tag.
    TaintHas { tag: String },
    /// `@mx.sources` contains the source id.
    SourceHas { source: String },
    /// `@mx.labels` contains the label.
    LabelHas { label: String },
    All { conds: Vec<GuardCond> },
    Any { conds: Vec<GuardCond> },
    Not { cond: Box<GuardCond> },
    /// Matches unconditionally; used for trailing allow/deny arms.
    Always,
}

/// The action of a matched guard arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum GuardAction {
    Allow,
    Deny { reason: String },
}

/// One `when` arm of a guard body. Evaluation is first-match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardArm {
    pub cond: GuardCond,
    pub action: GuardAction,
}

/// A directive plus the metadata shared across kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    #[serde(flatten)]
    pub kind: DirectiveKind,
    /// Security labels declared on the directive itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub location: Location,
}

impl Directive {
    #[must_use]
    pub fn new(kind: DirectiveKind) -> Self {
        Self {
            kind,
            labels: Vec::new(),
            location: Location::default(),
        }
    }

    #[must_use]
    pub fn at(kind: DirectiveKind, location: Location) -> Self {
        Self {
            kind,
            labels: Vec::new(),
            location,
        }
    }

    /// The directive's kind name, used for routing and trace frames.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// The principal identifier for trace frames: the bound name, command,
    /// or import source — whatever best identifies the directive in an
    /// error trace.
    #[must_use]
    pub fn principal(&self) -> String {
        match &self.kind {
            DirectiveKind::Var { name, .. }
            | DirectiveKind::Path { name, .. }
            | DirectiveKind::Exe { name, .. }
            | DirectiveKind::Guard { name, .. } => format!("@{name}"),
            DirectiveKind::ShadowCapture { lang, .. } => format!("@{lang}"),
            DirectiveKind::Run { .. } => "run".into(),
            DirectiveKind::Show { .. } => "show".into(),
            DirectiveKind::Output { target, .. } => target.clone(),
            DirectiveKind::Import { source, .. } => source.clone(),
            DirectiveKind::For { binding, .. } => format!("@{binding}"),
            DirectiveKind::When { .. } => "when".into(),
            DirectiveKind::Export { .. } => "export".into(),
            DirectiveKind::Comment { .. } => "comment".into(),
        }
    }
}

/// The kind-specific payload of a directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DirectiveKind {
    /// `/var @name = <expr>`
    Var { name: String, value: Expr },
    /// `/path @name = "<path>"`
    Path { name: String, value: String },
    /// `/exe @name(params) = <body>`, optionally with
    /// `env with { tools: @tools }` capturing a scoped environment.
    Exe {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<String>,
        body: ExeBody,
        /// The `tools` expression of the `env with { … }` form, evaluated
        /// once at declaration.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env_tools: Option<Expr>,
    },
    /// `/exe @js = { fnA, fnB }` — capture named executables into the
    /// language's shadow environment.
    ShadowCapture { lang: Lang, names: Vec<String> },
    /// `/run <command>` or `/run sh { … }`
    Run { spec: RunSpec },
    /// `/show <expr>`
    Show { value: Expr },
    /// `/output <expr> to "path"`
    Output {
        value: Expr,
        target: String,
        #[serde(default)]
        append: bool,
    },
    /// `/import …`
    Import {
        clause: ImportClause,
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        import_type: Option<ImportType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache: Option<CacheDuration>,
    },
    /// `/for [parallel(n[,rate])] @x in <expr> => <body>`
    For {
        binding: String,
        source: Expr,
        body: ForBody,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel: Option<ParallelSpec>,
    },
    /// `/when <arms>` with optional `first` semantics.
    When {
        arms: Vec<WhenArm>,
        #[serde(default)]
        first: bool,
    },
    /// `/export { @a, @b }`
    Export { names: Vec<String> },
    /// `/guard @name <trigger> = when [ … ]`
    Guard {
        name: String,
        trigger: GuardTrigger,
        arms: Vec<GuardArm>,
    },
    /// `>> comment` — ignored by evaluation.
    Comment { text: String },
}

impl DirectiveKind {
    /// The stable kind name used for routing.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Var { .. } => "var",
            Self::Path { .. } => "path",
            Self::Exe { .. } | Self::ShadowCapture { .. } => "exe",
            Self::Run { .. } => "run",
            Self::Show { .. } => "show",
            Self::Output { .. } => "output",
            Self::Import { .. } => "import",
            Self::For { .. } => "for",
            Self::When { .. } => "when",
            Self::Export { .. } => "export",
            Self::Guard { .. } => "guard",
            Self::Comment { .. } => "comment",
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cache_duration_round_trips() {
        for s in ["30s", "5m", "2h", "1d"] {
            let d = CacheDuration::from_spec_str(s).expect("parses");
            assert_eq!(d.to_string(), s);
        }
    }

    #[test]
    fn cache_duration_rejects_garbage() {
        assert!(CacheDuration::from_spec_str("5 parsecs").is_err());
        assert!(CacheDuration::from_spec_str("").is_err());
    }

    #[test]
    fn directive_serde_round_trip() {
        let d = Directive::new(DirectiveKind::Var {
            name: "x".into(),
            value: Expr::string("hi"),
        });
        let json = serde_json::to_string(&d).expect("serializes");
        let back: Directive = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(d, back);
    }

    #[test]
    fn lang_from_str_aliases() {
        assert_eq!("javascript".parse::<Lang>(), Ok(Lang::Js));
        assert_eq!("py".parse::<Lang>(), Ok(Lang::Python));
        assert!("cobol".parse::<Lang>().is_err());
    }
}
