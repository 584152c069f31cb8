//! Guard and taint behavior: MCP taint blocking, descriptor
//! monotonicity, classifier denials, and path containment.

mod common;

use std::sync::Arc;

use mlld_ast::{
    DirectiveKind, ExeBody, Expr, GuardAction, GuardArm, GuardCond, GuardTiming, GuardTrigger,
    OpKind, RunSpec, Template,
};
use mlld_core::effects::{CollectingSink, EffectSink};
use mlld_core::env::Environment;
use mlld_core::error::{ErrorKind, MlldResult};
use mlld_core::exec::RunnerSet;
use mlld_core::interpreter::evaluate_directive;

use common::{d, d_exe, d_show, d_var, r, s, FixedMcpHost};

fn mcp_env(answer: serde_json::Value) -> (Arc<Environment>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let mut runners = RunnerSet::empty();
    runners.set_mcp_host(Arc::new(FixedMcpHost(answer)));
    let env = Environment::builder()
        .sink(Arc::clone(&sink) as Arc<dyn mlld_core::effects::EffectSink>)
        .runners(runners)
        .build();
    (env, sink)
}

fn block_mcp_guard() -> mlld_ast::Directive {
    d(DirectiveKind::Guard {
        name: "blockMcp".into(),
        trigger: GuardTrigger {
            timing: GuardTiming::Before,
            op: OpKind::Exe,
        },
        arms: vec![GuardArm {
            cond: GuardCond::TaintHas {
                tag: "src:mcp".into(),
            },
            action: GuardAction::Deny {
                reason: "MCP blocked".into(),
            },
        }],
    })
}

fn get_time_exe() -> mlld_ast::Directive {
    d_exe(
        "getTime",
        &[],
        ExeBody::McpTool {
            tool: "getTime".into(),
        },
    )
}

fn call(name: &str) -> Expr {
    Expr::Call(mlld_ast::CallExpr {
        target: name.into(),
        args: vec![],
    })
}

// ===========================================================================
// MCP taint and guards
// ===========================================================================

#[tokio::test]
async fn mcp_taint_reaches_before_guard() -> MlldResult<()> {
    let (env, sink) = mcp_env(serde_json::json!("12:00"));

    evaluate_directive(&block_mcp_guard(), &env).await?;
    evaluate_directive(&get_time_exe(), &env).await?;

    let err = evaluate_directive(&d_show(call("getTime")), &env)
        .await
        .expect_err("guard must deny");
    assert_eq!(
        err.kind,
        ErrorKind::GuardDenied {
            guard: "blockMcp".into(),
            reason: "MCP blocked".into(),
        }
    );
    // No document effect was emitted.
    assert!(sink.effects().is_empty());
    assert_eq!(err.exit_code(), 2);
    Ok(())
}

#[tokio::test]
async fn without_guard_mcp_result_flows_and_taints() -> MlldResult<()> {
    let (env, sink) = mcp_env(serde_json::json!("12:00"));

    evaluate_directive(&get_time_exe(), &env).await?;
    evaluate_directive(&d_var("t", call("getTime")), &env).await?;
    evaluate_directive(&d_show(r("t")), &env).await?;

    assert_eq!(sink.document(), "12:00\n");

    let variable = env.get("t").expect("bound");
    assert!(variable.security.has_taint("src:mcp"));
    assert!(variable.security.has_label("untrusted"));
    assert!(variable.security.has_source("mcp:getTime"));
    Ok(())
}

#[tokio::test]
async fn derived_values_keep_their_inputs_taint() -> MlldResult<()> {
    let (env, _sink) = mcp_env(serde_json::json!("12:00"));

    evaluate_directive(&get_time_exe(), &env).await?;
    evaluate_directive(&d_var("t", call("getTime")), &env).await?;
    evaluate_directive(
        &d_var(
            "derived",
            Expr::Binary {
                op: mlld_ast::BinaryOp::Add,
                lhs: Box::new(r("t")),
                rhs: Box::new(s(" sharp")),
            },
        ),
        &env,
    )
    .await?;

    let source = env.get("t").expect("bound");
    let derived = env.get("derived").expect("bound");
    assert!(
        derived.security.covers(&source.security),
        "descriptor must not shrink through derivation"
    );
    Ok(())
}

#[tokio::test]
async fn after_guard_sees_the_result_descriptor() -> MlldResult<()> {
    let (env, _sink) = mcp_env(serde_json::json!("12:00"));

    let after_guard = d(DirectiveKind::Guard {
        name: "auditMcp".into(),
        trigger: GuardTrigger {
            timing: GuardTiming::After,
            op: OpKind::Exe,
        },
        arms: vec![GuardArm {
            cond: GuardCond::All {
                conds: vec![
                    GuardCond::TaintHas {
                        tag: "src:mcp".into(),
                    },
                    GuardCond::LabelHas {
                        label: "untrusted".into(),
                    },
                ],
            },
            action: GuardAction::Deny {
                reason: "untrusted result".into(),
            },
        }],
    });
    evaluate_directive(&after_guard, &env).await?;
    evaluate_directive(&get_time_exe(), &env).await?;

    let err = evaluate_directive(&d_var("t", call("getTime")), &env)
        .await
        .expect_err("after-guard must deny");
    assert_eq!(err.code(), "GUARD_DENIED");
    Ok(())
}

// ===========================================================================
// Command classification and paths
// ===========================================================================

#[tokio::test]
async fn destructive_commands_never_run() {
    let (env, sink) = common::test_env();

    let directive = d(DirectiveKind::Run {
        spec: RunSpec::Command {
            template: Template::text("sudo rm -rf /tmp/everything"),
        },
    });
    let err = evaluate_directive(&directive, &env)
        .await
        .expect_err("classifier denies");
    assert_eq!(err.code(), "POLICY_DENIED");
    assert!(sink.effects().is_empty());
}

#[tokio::test]
async fn chained_commands_are_rejected_before_security() {
    let (env, _sink) = common::test_env();

    let directive = d(DirectiveKind::Run {
        spec: RunSpec::Command {
            template: Template::text("echo a && echo b"),
        },
    });
    let err = evaluate_directive(&directive, &env)
        .await
        .expect_err("chaining is rejected");
    assert_eq!(err.code(), "INVALID_COMMAND");
}

#[tokio::test]
async fn output_outside_project_root_is_denied() {
    let (env, sink) = common::test_env();

    let directive = d(DirectiveKind::Output {
        value: s("content"),
        target: "../escape.md".into(),
        append: false,
    });
    let err = evaluate_directive(&directive, &env)
        .await
        .expect_err("escape denied");
    assert_eq!(err.code(), "PATH_ACCESS_DENIED");
    assert!(sink.effects().is_empty());
}

// ===========================================================================
// Error enrichment
// ===========================================================================

#[tokio::test]
async fn guard_denials_carry_the_directive_trace() -> MlldResult<()> {
    let (env, _sink) = mcp_env(serde_json::json!("12:00"));

    evaluate_directive(&block_mcp_guard(), &env).await?;
    evaluate_directive(&get_time_exe(), &env).await?;

    let err = evaluate_directive(&d_var("t", call("getTime")), &env)
        .await
        .expect_err("denied");
    assert!(!err.trace.is_empty());
    assert_eq!(err.trace[0].kind, "var");
    assert_eq!(err.trace[0].principal, "@t");

    let serialized = serde_json::to_value(&err).expect("serializes");
    assert_eq!(serialized["code"], "GUARD_DENIED");
    assert!(serialized["trace"].is_array());
    Ok(())
}

#[tokio::test]
async fn show_of_unbound_is_empty_not_an_error() -> MlldResult<()> {
    let (env, sink) = common::test_env();
    evaluate_directive(&d_show(r("ghost")), &env).await?;
    assert_eq!(sink.document(), "\n");
    Ok(())
}
