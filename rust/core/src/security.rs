//! Security descriptors: labels, taint, and source provenance.
//!
//! Descriptors merge by set union and only ever grow — every operation that
//! derives a value produces a descriptor that is a superset of the union of
//! its inputs' descriptors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::policy::PolicyConfig;

/// Well-known taint tags. Tags are open-ended strings; these constants
/// cover the ones the core itself attaches.
pub mod taint {
    pub const COMMAND_OUTPUT: &str = "command_output";
    pub const FILE_SYSTEM: &str = "file_system";
    pub const NETWORK: &str = "network";
    pub const SRC_MCP: &str = "src:mcp";
}

/// Well-known labels.
pub mod label {
    pub const UNTRUSTED: &str = "untrusted";
}

/// The security descriptor attached to variables and operation contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub taint: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sources: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_context: Option<PolicyConfig>,
}

impl SecurityDescriptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A descriptor with a single taint tag.
    #[must_use]
    pub fn tainted(tag: impl Into<String>) -> Self {
        let mut descriptor = Self::default();
        descriptor.taint.insert(tag.into());
        descriptor
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    #[must_use]
    pub fn with_taint(mut self, tag: impl Into<String>) -> Self {
        self.taint.insert(tag.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.insert(source.into());
        self
    }

    /// Union another descriptor into this one. The policy context resolves
    /// to the more restrictive of the two when both are present.
    pub fn merge(&mut self, other: &Self) {
        self.labels.extend(other.labels.iter().cloned());
        self.taint.extend(other.taint.iter().cloned());
        self.sources.extend(other.sources.iter().cloned());
        self.policy_context = match (self.policy_context.take(), other.policy_context.clone()) {
            (Some(a), Some(b)) => Some(PolicyConfig::more_restrictive(a, b)),
            (a, b) => a.or(b),
        };
    }

    /// The union of two descriptors.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Whether this descriptor contains at least everything `other` does.
    /// Used to assert taint monotonicity.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        other.labels.is_subset(&self.labels)
            && other.taint.is_subset(&self.taint)
            && other.sources.is_subset(&self.sources)
    }

    #[must_use]
    pub fn has_taint(&self, tag: &str) -> bool {
        self.taint.contains(tag)
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    #[must_use]
    pub fn has_source(&self, source: &str) -> bool {
        self.sources.contains(source)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.taint.is_empty()
            && self.sources.is_empty()
            && self.policy_context.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_union() {
        let a = SecurityDescriptor::tainted("network").with_label("untrusted");
        let b = SecurityDescriptor::tainted("command_output").with_source("mcp:getTime");
        let merged = a.merged(&b);
        assert!(merged.covers(&a));
        assert!(merged.covers(&b));
        assert!(merged.has_taint("network"));
        assert!(merged.has_taint("command_output"));
        assert!(merged.has_source("mcp:getTime"));
    }

    #[test]
    fn covers_is_reflexive_and_ordered() {
        let a = SecurityDescriptor::tainted("network");
        let b = a.clone().with_taint("file_system");
        assert!(a.covers(&a));
        assert!(b.covers(&a));
        assert!(!a.covers(&b));
    }
}
