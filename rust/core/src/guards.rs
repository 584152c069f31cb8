//! The guard registry.
//!
//! Guards are named rules evaluated at operation boundaries. Each has a
//! trigger (timing plus operation kind) and a body of arms over the
//! operation metadata `@mx`. Arm evaluation is first-match; the first
//! denying guard wins for the operation.

use std::sync::Mutex;

use mlld_ast::{GuardAction, GuardArm, GuardCond, GuardTiming, GuardTrigger, OpKind};

use crate::security::SecurityDescriptor;

/// Where a guard rule was registered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOrigin {
    /// A `/guard` directive in the evaluated document.
    Local,
    /// Compiled from a policy imported via `importPolicy`.
    Policy(String),
}

/// A registered guard rule.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardRule {
    pub name: String,
    pub trigger: GuardTrigger,
    /// Additional operation kinds this rule also fires on (used by
    /// policy-compiled rules that cover several operations).
    pub extra_ops: Vec<OpKind>,
    pub arms: Vec<GuardArm>,
    pub origin: GuardOrigin,
}

impl GuardRule {
    fn matches_trigger(&self, timing: GuardTiming, op: OpKind) -> bool {
        self.trigger.timing == timing
            && (self.trigger.op == op || self.extra_ops.contains(&op))
    }
}

/// The verdict of evaluating guards for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardVerdict {
    Allow,
    Deny { guard: String, reason: String },
}

impl GuardVerdict {
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Evaluate a condition against the operation metadata.
#[must_use]
pub fn eval_cond(cond: &GuardCond, mx: &SecurityDescriptor) -> bool {
    match cond {
        GuardCond::TaintHas { tag } => mx.has_taint(tag),
        GuardCond::SourceHas { source } => mx.has_source(source),
        GuardCond::LabelHas { label } => mx.has_label(label),
        GuardCond::All { conds } => conds.iter().all(|c| eval_cond(c, mx)),
        GuardCond::Any { conds } => conds.iter().any(|c| eval_cond(c, mx)),
        GuardCond::Not { cond } => !eval_cond(cond, mx),
        GuardCond::Always => true,
    }
}

/// The registry of guard rules for an evaluation.
///
/// Registration order is preserved; evaluation walks rules in that order.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    rules: Mutex<Vec<GuardRule>>,
}

impl GuardRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Re-registering the same name replaces the earlier
    /// rule in place.
    pub fn register(&self, rule: GuardRule) {
        let mut rules = self
            .rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = rules.iter_mut().find(|r| r.name == rule.name) {
            *existing = rule;
        } else {
            rules.push(rule);
        }
    }

    /// Register a batch of rules (used by policy imports).
    pub fn register_all(&self, batch: Vec<GuardRule>) {
        for rule in batch {
            self.register(rule);
        }
    }

    /// Names of all registered rules, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Whether a rule with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .any(|r| r.name == name)
    }

    /// Evaluate all rules matching the trigger against the metadata.
    ///
    /// Within a rule, the first matching arm decides that rule's vote; an
    /// `allow` vote short-circuits the rule's remaining arms only. The
    /// first `deny` vote across rules denies the operation.
    #[must_use]
    pub fn check(
        &self,
        timing: GuardTiming,
        op: OpKind,
        mx: &SecurityDescriptor,
    ) -> GuardVerdict {
        let rules = self
            .rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for rule in rules.iter().filter(|r| r.matches_trigger(timing, op)) {
            for arm in &rule.arms {
                if eval_cond(&arm.cond, mx) {
                    match &arm.action {
                        GuardAction::Allow => break,
                        GuardAction::Deny { reason } => {
                            tracing::debug!(guard = %rule.name, op = %op, "guard denied operation");
                            return GuardVerdict::Deny {
                                guard: rule.name.clone(),
                                reason: reason.clone(),
                            };
                        }
                    }
                }
            }
        }
        GuardVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlld_ast::GuardTiming;

    fn deny_mcp_rule() -> GuardRule {
        GuardRule {
            name: "blockMcp".into(),
            trigger: GuardTrigger {
                timing: GuardTiming::Before,
                op: OpKind::Exe,
            },
            extra_ops: Vec::new(),
            arms: vec![GuardArm {
                cond: GuardCond::TaintHas {
                    tag: "src:mcp".into(),
                },
                action: GuardAction::Deny {
                    reason: "MCP blocked".into(),
                },
            }],
            origin: GuardOrigin::Local,
        }
    }

    #[test]
    fn first_match_denies() {
        let registry = GuardRegistry::new();
        registry.register(deny_mcp_rule());

        let mx = SecurityDescriptor::tainted("src:mcp");
        let verdict = registry.check(GuardTiming::Before, OpKind::Exe, &mx);
        assert_eq!(
            verdict,
            GuardVerdict::Deny {
                guard: "blockMcp".into(),
                reason: "MCP blocked".into()
            }
        );
    }

    #[test]
    fn non_matching_trigger_allows() {
        let registry = GuardRegistry::new();
        registry.register(deny_mcp_rule());

        let mx = SecurityDescriptor::tainted("src:mcp");
        assert!(registry.check(GuardTiming::After, OpKind::Exe, &mx).is_allow());
        assert!(registry.check(GuardTiming::Before, OpKind::Run, &mx).is_allow());
    }

    #[test]
    fn allow_arm_short_circuits_rule_only() {
        let registry = GuardRegistry::new();
        registry.register(GuardRule {
            name: "allowFirst".into(),
            trigger: GuardTrigger {
                timing: GuardTiming::Before,
                op: OpKind::Exe,
            },
            extra_ops: Vec::new(),
            arms: vec![
                GuardArm {
                    cond: GuardCond::Always,
                    action: GuardAction::Allow,
                },
                GuardArm {
                    cond: GuardCond::Always,
                    action: GuardAction::Deny {
                        reason: "unreachable".into(),
                    },
                },
            ],
            origin: GuardOrigin::Local,
        });
        registry.register(deny_mcp_rule());

        let mx = SecurityDescriptor::tainted("src:mcp");
        // The allow vote in the first rule does not stop the second rule.
        assert!(!registry.check(GuardTiming::Before, OpKind::Exe, &mx).is_allow());
    }

    #[test]
    fn reregistering_replaces() {
        let registry = GuardRegistry::new();
        registry.register(deny_mcp_rule());
        let mut relaxed = deny_mcp_rule();
        relaxed.arms = vec![GuardArm {
            cond: GuardCond::Always,
            action: GuardAction::Allow,
        }];
        registry.register(relaxed);

        let mx = SecurityDescriptor::tainted("src:mcp");
        assert!(registry.check(GuardTiming::Before, OpKind::Exe, &mx).is_allow());
        assert_eq!(registry.names(), vec!["blockMcp".to_string()]);
    }
}
