//! A parsed document: prose interleaved with directives.

use serde::{Deserialize, Serialize};

use crate::directive::Directive;

/// One top-level node of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum Node {
    /// Markdown prose, emitted verbatim into the rendered document.
    Prose { text: String },
    Directive(Directive),
}

/// A parsed mlld document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Vec<Node>,
    /// Frontmatter parsed by the grammar, surfaced to importers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontmatter: Option<serde_json::Value>,
}

impl Document {
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            frontmatter: None,
        }
    }

    /// Build a document from directives only (no prose), the common shape
    /// in tests and API callers.
    #[must_use]
    pub fn from_directives(directives: Vec<Directive>) -> Self {
        Self::new(directives.into_iter().map(Node::Directive).collect())
    }
}
