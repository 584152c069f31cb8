//! Policy configurations and their compilation into guards.
//!
//! A policy arrives either from configuration or from an `importPolicy`
//! module. It records allow/deny rule sets plus the labels and taint it
//! stamps onto bindings imported under it, and compiles into guard rules
//! registered alongside locally declared guards.

use serde::{Deserialize, Serialize};

use mlld_ast::{GuardAction, GuardArm, GuardCond, GuardTiming, GuardTrigger, OpKind};

use crate::guards::{GuardOrigin, GuardRule};

/// The action taken when no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    #[default]
    Allow,
    Deny,
}

/// A pair of allow/deny pattern lists. Deny wins over allow; an empty
/// allow list means "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl RuleSet {
    /// Merge two rule sets restrictively: deny lists union, allow lists
    /// intersect (an empty allow list is unrestricted and adopts the other).
    #[must_use]
    fn more_restrictive(a: Self, b: Self) -> Self {
        let mut deny = a.deny;
        for pattern in b.deny {
            if !deny.contains(&pattern) {
                deny.push(pattern);
            }
        }
        let allow = match (a.allow.is_empty(), b.allow.is_empty()) {
            (true, _) => b.allow,
            (_, true) => a.allow,
            (false, false) => a.allow.into_iter().filter(|p| b.allow.contains(p)).collect(),
        };
        Self { allow, deny }
    }
}

/// An environment-scoped policy configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub default_action: PolicyAction,

    #[serde(default, skip_serializing_if = "ruleset_is_empty")]
    pub commands: RuleSet,

    #[serde(default, skip_serializing_if = "ruleset_is_empty")]
    pub paths: RuleSet,

    #[serde(default, skip_serializing_if = "ruleset_is_empty")]
    pub network: RuleSet,

    /// Taint tags that block side-effecting operations outright.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_taint: Vec<String>,

    /// Labels stamped onto bindings imported under this policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Taint stamped onto bindings imported under this policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taint: Vec<String>,
}

fn ruleset_is_empty(rules: &RuleSet) -> bool {
    rules.allow.is_empty() && rules.deny.is_empty()
}

impl PolicyConfig {
    /// Parse a policy from the module object an `importPolicy` produced.
    ///
    /// # Errors
    ///
    /// Returns the serde message when the object does not match the policy
    /// shape.
    pub fn from_module_object(name: &str, data: serde_json::Value) -> Result<Self, String> {
        let mut config: Self = serde_json::from_value(data).map_err(|err| err.to_string())?;
        config.name = Some(name.to_string());
        Ok(config)
    }

    /// Combine two policies, keeping the more restrictive choice per field.
    #[must_use]
    pub fn more_restrictive(a: Self, b: Self) -> Self {
        Self {
            name: a.name.or(b.name),
            default_action: if a.default_action == PolicyAction::Deny
                || b.default_action == PolicyAction::Deny
            {
                PolicyAction::Deny
            } else {
                PolicyAction::Allow
            },
            commands: RuleSet::more_restrictive(a.commands, b.commands),
            paths: RuleSet::more_restrictive(a.paths, b.paths),
            network: RuleSet::more_restrictive(a.network, b.network),
            deny_taint: union(a.deny_taint, b.deny_taint),
            labels: union(a.labels, b.labels),
            taint: union(a.taint, b.taint),
        }
    }

    /// Synthesize guard rules from this policy: one rule per denied taint
    /// tag, firing before every side-effecting operation kind.
    #[must_use]
    pub fn compile_guards(&self) -> Vec<GuardRule> {
        let policy_name = self.name.clone().unwrap_or_else(|| "policy".into());
        self.deny_taint
            .iter()
            .map(|tag| GuardRule {
                name: format!("{policy_name}:deny-taint:{tag}"),
                trigger: GuardTrigger {
                    timing: GuardTiming::Before,
                    op: OpKind::Exe,
                },
                extra_ops: vec![OpKind::Run, OpKind::Output],
                arms: vec![GuardArm {
                    cond: GuardCond::TaintHas { tag: tag.clone() },
                    action: GuardAction::Deny {
                        reason: format!("policy `{policy_name}` denies taint `{tag}`"),
                    },
                }],
                origin: GuardOrigin::Policy(policy_name.clone()),
            })
            .collect()
    }
}

fn union(mut a: Vec<String>, b: Vec<String>) -> Vec<String> {
    for item in b {
        if !a.contains(&item) {
            a.push(item);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restrictive_merge_unions_denies() {
        let a = PolicyConfig {
            commands: RuleSet {
                allow: vec!["ls".into(), "cat".into()],
                deny: vec!["rm".into()],
            },
            ..Default::default()
        };
        let b = PolicyConfig {
            commands: RuleSet {
                allow: vec!["cat".into()],
                deny: vec!["curl".into()],
            },
            default_action: PolicyAction::Deny,
            ..Default::default()
        };
        let merged = PolicyConfig::more_restrictive(a, b);
        assert_eq!(merged.commands.allow, vec!["cat".to_string()]);
        assert_eq!(
            merged.commands.deny,
            vec!["rm".to_string(), "curl".to_string()]
        );
        assert_eq!(merged.default_action, PolicyAction::Deny);
    }

    #[test]
    fn compiled_guards_cover_denied_taint() {
        let config = PolicyConfig {
            name: Some("strict".into()),
            deny_taint: vec!["src:mcp".into()],
            ..Default::default()
        };
        let guards = config.compile_guards();
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].name, "strict:deny-taint:src:mcp");
    }
}
