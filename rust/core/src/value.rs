//! The typed value model.
//!
//! Values are tagged variants; structured values wrap a payload with a
//! text view, a data view, and origin metadata. Conversion rules here are
//! behavioral contracts — unwrapping never mutates the value.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::exec::ExecDef;
use crate::security::SecurityDescriptor;

/// Where an imported value came from, recorded so imported executables are
/// distinguished by origin rather than by shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOrigin {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
}

/// Metadata carried by a structured value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredMetadata {
    /// Origin identifier: `"load-content"`, `"mcp:<tool>"`, `"exe:<lang>"`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A value bundling a text view, a data view, and origin metadata.
///
/// The text view is materialized lazily from the data view when the
/// constructor did not supply one.
#[derive(Debug)]
pub struct StructuredValue {
    /// Type tag: `"text"`, `"json"`, `"csv"`, `"xml"`, `"array"`, …
    pub type_tag: String,
    text: OnceLock<String>,
    /// The semantic payload.
    pub data: Json,
    pub metadata: StructuredMetadata,
}

impl StructuredValue {
    /// A structured value with both views supplied.
    #[must_use]
    pub fn new(
        type_tag: impl Into<String>,
        text: String,
        data: Json,
        metadata: StructuredMetadata,
    ) -> Self {
        let lock = OnceLock::new();
        let _ = lock.set(text);
        Self {
            type_tag: type_tag.into(),
            text: lock,
            data,
            metadata,
        }
    }

    /// A structured value whose text view is derived from the data view on
    /// first access.
    #[must_use]
    pub fn from_data(type_tag: impl Into<String>, data: Json, metadata: StructuredMetadata) -> Self {
        Self {
            type_tag: type_tag.into(),
            text: OnceLock::new(),
            data,
            metadata,
        }
    }

    /// The result of an embedded-language call.
    #[must_use]
    pub fn exec_result(lang: &str, data: Json) -> Self {
        Self::from_data(
            json_type_tag(&data),
            data,
            StructuredMetadata {
                source: format!("exe:{lang}"),
                path: None,
            },
        )
    }

    /// The result of a loader.
    #[must_use]
    pub fn loaded(type_tag: impl Into<String>, text: String, data: Json, path: &str) -> Self {
        Self::new(
            type_tag,
            text,
            data,
            StructuredMetadata {
                source: "load-content".into(),
                path: Some(path.to_string()),
            },
        )
    }

    /// The text view, materialized on first access.
    pub fn text(&self) -> &str {
        self.text.get_or_init(|| json_display(&self.data))
    }

    /// The data view.
    #[must_use]
    pub fn data(&self) -> &Json {
        &self.data
    }
}

impl Clone for StructuredValue {
    fn clone(&self) -> Self {
        let text = OnceLock::new();
        if let Some(s) = self.text.get() {
            let _ = text.set(s.clone());
        }
        Self {
            type_tag: self.type_tag.clone(),
            text,
            data: self.data.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl PartialEq for StructuredValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_tag == other.type_tag && self.data == other.data && self.metadata == other.metadata
    }
}

/// A named template definition produced by `/exe @t(x) = ::…::`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDef {
    pub name: String,
    pub params: Vec<String>,
    pub template: mlld_ast::Template,
}

/// A tagged value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Simple text.
    Text(String),
    /// A normalized path.
    Path(String),
    Number(f64),
    Bool(bool),
    #[default]
    Null,
    /// Insertion-ordered array.
    Array(Vec<Value>),
    /// Insertion-ordered object; keys unique, case-sensitive.
    Object(IndexMap<String, Value>),
    Executable(Arc<ExecDef>),
    Template(Arc<TemplateDef>),
    Structured(StructuredValue),
    Imported {
        value: Box<Value>,
        origin: ImportOrigin,
    },
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) | (Self::Path(a), Self::Path(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Executable(a), Self::Executable(b)) => Arc::ptr_eq(a, b),
            (Self::Template(a), Self::Template(b)) => a == b,
            (Self::Structured(a), Self::Structured(b)) => a == b,
            (
                Self::Imported { value: a, origin: oa },
                Self::Imported { value: b, origin: ob },
            ) => a == b && oa == ob,
            _ => false,
        }
    }
}

impl Value {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// The kind name used by type guards and error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Path(_) => "path",
            Self::Number(_) => "number",
            Self::Bool(_) => "boolean",
            Self::Null => "null",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Executable(_) => "executable",
            Self::Template(_) => "template",
            Self::Structured(_) => "structured",
            Self::Imported { .. } => "imported",
        }
    }

    /// Strip `Imported` wrappers, leaving the underlying value.
    #[must_use]
    pub fn unwrap_imported(&self) -> &Value {
        match self {
            Self::Imported { value, .. } => value.unwrap_imported(),
            other => other,
        }
    }

    /// The display-context stringification.
    ///
    /// Follows the conventions of the original host language: `Null` is
    /// empty, integral numbers drop the fraction, arrays join element
    /// strings with `,`, objects serialize as JSON, structured values use
    /// their text view.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) | Self::Path(s) => s.clone(),
            Self::Number(n) => number_to_string(*n),
            Self::Bool(b) => b.to_string(),
            Self::Null => String::new(),
            Self::Array(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) => json_display(&self.to_json()),
            Self::Executable(def) => format!("<executable @{}>", def.name),
            Self::Template(def) => format!("<template @{}>", def.name),
            Self::Structured(sv) => sv.text().to_string(),
            Self::Imported { value, .. } => value.to_text(),
        }
    }

    /// The data view: structured values unwrap to their data, everything
    /// else converts to the equivalent JSON.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Text(s) | Self::Path(s) => Json::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(Json::Null, Json::Number),
            Self::Bool(b) => Json::Bool(*b),
            Self::Null => Json::Null,
            Self::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Executable(def) => Json::String(format!("<executable @{}>", def.name)),
            Self::Template(def) => Json::String(format!("<template @{}>", def.name)),
            Self::Structured(sv) => sv.data.clone(),
            Self::Imported { value, .. } => value.to_json(),
        }
    }

    /// Build a value from JSON data.
    #[must_use]
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::Text(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            Json::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Truthiness for `/when` conditions, following the host language:
    /// empty text, zero, NaN, and null are falsy; arrays and objects are
    /// truthy regardless of contents.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(s) | Self::Path(s) => !s.is_empty(),
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Bool(b) => *b,
            Self::Null => false,
            Self::Array(_)
            | Self::Object(_)
            | Self::Executable(_)
            | Self::Template(_)
            | Self::Structured(_) => true,
            Self::Imported { value, .. } => value.is_truthy(),
        }
    }

    /// Equality-context comparison: structured values compare by data view,
    /// numbers and numeric text compare numerically.
    #[must_use]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        let a = self.unwrap_imported();
        let b = other.unwrap_imported();
        match (a, b) {
            (Self::Structured(sa), _) => Value::from_json(sa.data.clone()).loosely_equals(b),
            (_, Self::Structured(sb)) => a.loosely_equals(&Value::from_json(sb.data.clone())),
            (Self::Number(x), Self::Text(s)) | (Self::Text(s), Self::Number(x)) => {
                s.parse::<f64>().is_ok_and(|y| y == *x)
            }
            (Self::Text(x) | Self::Path(x), Self::Text(y) | Self::Path(y)) => x == y,
            _ => a == b,
        }
    }

    /// The executable definition, if this value (possibly imported) is one.
    #[must_use]
    pub fn as_executable(&self) -> Option<&Arc<ExecDef>> {
        match self.unwrap_imported() {
            Self::Executable(def) => Some(def),
            _ => None,
        }
    }
}

/// An evaluated value with the security descriptor accumulated while
/// producing it. Descriptors grow monotonically through derivation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvalValue {
    pub value: Value,
    pub security: SecurityDescriptor,
}

impl EvalValue {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            security: SecurityDescriptor::default(),
        }
    }

    #[must_use]
    pub fn with_security(value: Value, security: SecurityDescriptor) -> Self {
        Self { value, security }
    }

    /// Derive a new value from this one, carrying the descriptor forward.
    #[must_use]
    pub fn derive(&self, value: Value) -> Self {
        Self {
            value,
            security: self.security.clone(),
        }
    }
}

/// Format a number the way the host language would: integral values have
/// no fraction, everything else uses the shortest round-trip form.
#[must_use]
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        return format!("{}", n as i64);
    }
    format!("{n}")
}

/// Pick a type tag for arbitrary JSON data.
#[must_use]
pub fn json_type_tag(data: &Json) -> &'static str {
    match data {
        Json::Null | Json::Bool(_) | Json::Number(_) => "json",
        Json::String(_) => "text",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Display form of JSON data: bare strings print without quotes, other
/// shapes serialize compactly.
#[must_use]
pub fn json_display(data: &Json) -> String {
    match data {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_join_with_commas() {
        let v = Value::Array(vec![Value::text("A"), Value::text("B"), Value::text("C")]);
        assert_eq!(v.to_text(), "A,B,C");
    }

    #[test]
    fn integral_numbers_drop_fraction() {
        assert_eq!(Value::Number(2.0).to_text(), "2");
        assert_eq!(Value::Number(2.5).to_text(), "2.5");
        assert_eq!(Value::Number(-0.0).to_text(), "0");
    }

    #[test]
    fn null_displays_empty() {
        assert_eq!(Value::Null.to_text(), "");
    }

    #[test]
    fn structured_text_view_is_lazy() {
        let sv = StructuredValue::from_data(
            "json",
            serde_json::json!({"a": 1}),
            StructuredMetadata::default(),
        );
        assert_eq!(sv.text(), r#"{"a":1}"#);
    }

    #[test]
    fn loose_equality_crosses_numeric_text() {
        assert!(Value::Number(3.0).loosely_equals(&Value::text("3")));
        assert!(!Value::Number(3.0).loosely_equals(&Value::text("x")));
    }

    #[test]
    fn truthiness_follows_host_language() {
        assert!(!Value::text("").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn json_round_trip_preserves_key_order() {
        let json = serde_json::json!({"z": 1, "a": 2});
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json(), json);
    }
}
