//! Pipeline engine behavior: stage sequencing, retry semantics, parallel
//! groups, and builtin effects.

mod common;

use std::sync::Arc;

use mlld_ast::{BuiltinEffect, Expr, ExeBody, PipelineExpr, StageSpec};
use mlld_core::effects::{Effect, EffectSink};
use mlld_core::env::Environment;
use mlld_core::error::MlldResult;
use mlld_core::interpreter::evaluate_directive;
use mlld_core::value::Value;

use common::{arm_retry, arm_value, d_exe, d_var, eq, js, n, r, s, tpl, test_env, Part};

fn call(name: &str) -> Expr {
    Expr::Call(mlld_ast::CallExpr {
        target: name.into(),
        args: vec![],
    })
}

fn pipeline(source: Expr, stages: Vec<StageSpec>) -> Expr {
    Expr::Pipeline(Box::new(PipelineExpr {
        source,
        stages,
        format: None,
    }))
}

fn stage(name: &str) -> StageSpec {
    StageSpec::Call {
        name: name.into(),
        args: vec![],
    }
}

/// A generator that drafts twice before settling, driven by `@ctx.try`.
fn define_gen() -> Vec<mlld_ast::Directive> {
    vec![d_exe(
        "gen",
        &[],
        ExeBody::When {
            arms: vec![
                arm_value(eq(r("ctx.try"), n(1.0)), s("draft v1")),
                arm_value(eq(r("ctx.try"), n(2.0)), s("draft v2")),
                arm_value(common::truth(), s("final")),
            ],
            first: true,
        },
    )]
}

async fn run_all(
    directives: Vec<mlld_ast::Directive>,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let mut last = Value::Null;
    for directive in &directives {
        last = evaluate_directive(directive, env).await?;
    }
    Ok(last)
}

// ===========================================================================
// Retry
// ===========================================================================

#[tokio::test]
async fn retry_reruns_generator_until_accepted() -> MlldResult<()> {
    let (env, _sink) = test_env();

    let mut directives = define_gen();
    directives.push(d_exe(
        "rev",
        &["input"],
        ExeBody::When {
            arms: vec![
                arm_retry(eq(r("input"), s("draft v1"))),
                arm_retry(eq(r("input"), s("draft v2"))),
                arm_value(
                    common::truth(),
                    Expr::Template(tpl(&[
                        Part::T("Accepted: "),
                        Part::I("input"),
                        Part::T(" (try "),
                        Part::I("ctx.try"),
                        Part::T(")"),
                    ])),
                ),
            ],
            first: true,
        },
    ));
    directives.push(d_var(
        "r",
        pipeline(call("gen"), vec![stage("rev")]),
    ));

    let result = run_all(directives, &env).await?;
    // The reviewer's own attempt counter stays at 1: only the retried
    // generator's counter increments.
    assert_eq!(result, Value::text("Accepted: final (try 1)"));
    Ok(())
}

#[tokio::test]
async fn pipeline_history_records_handoffs() -> MlldResult<()> {
    let (env, _sink) = test_env();

    let mut directives = define_gen();
    directives.push(d_exe(
        "rev",
        &["input"],
        ExeBody::When {
            arms: vec![
                arm_retry(eq(r("input"), s("draft v1"))),
                arm_retry(eq(r("input"), s("draft v2"))),
                // Accept by returning the history itself.
                arm_value(common::truth(), r("p")),
            ],
            first: true,
        },
    ));
    directives.push(d_var("r", pipeline(call("gen"), vec![stage("rev")])));

    let result = run_all(directives, &env).await?;
    assert_eq!(
        result,
        Value::Array(vec![
            Value::text("draft v1"),
            Value::text("draft v2"),
            Value::text("final"),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn retry_at_stage_zero_is_invalid() {
    let (env, _sink) = test_env();

    let directives = vec![
        d_exe(
            "alwaysRetry",
            &[],
            ExeBody::When {
                arms: vec![arm_retry(common::truth())],
                first: true,
            },
        ),
        d_var("r", pipeline(call("alwaysRetry"), vec![])),
    ];

    let mut err = None;
    for directive in &directives {
        if let Err(e) = evaluate_directive(directive, &env).await {
            err = Some(e);
            break;
        }
    }
    let err = err.expect("stage 0 retry must fail");
    assert_eq!(err.code(), "INVALID_RETRY");
}

#[tokio::test]
async fn retry_against_literal_source_is_invalid() {
    let (env, _sink) = test_env();

    let directives = vec![
        d_exe(
            "picky",
            &["input"],
            ExeBody::When {
                arms: vec![arm_retry(common::truth())],
                first: true,
            },
        ),
        d_var("r", pipeline(s("literal"), vec![stage("picky")])),
    ];

    let mut err = None;
    for directive in &directives {
        if let Err(e) = evaluate_directive(directive, &env).await {
            err = Some(e);
            break;
        }
    }
    let err = err.expect("literal source is not retryable");
    assert_eq!(err.code(), "INVALID_RETRY");
}

#[tokio::test]
async fn nested_retry_is_invalid() {
    let (env, _sink) = test_env();

    let mut directives = define_gen();
    // r1 succeeds on its first attempt but retries once re-run; r2 always
    // asks for a retry, which re-runs r1 inside the retry window.
    directives.push(d_exe(
        "r1",
        &["input"],
        ExeBody::When {
            arms: vec![
                arm_value(eq(r("ctx.try"), n(1.0)), s("ok")),
                arm_retry(common::truth()),
            ],
            first: true,
        },
    ));
    directives.push(d_exe(
        "r2",
        &["input"],
        ExeBody::When {
            arms: vec![arm_retry(common::truth())],
            first: true,
        },
    ));
    directives.push(d_var(
        "r",
        pipeline(call("gen"), vec![stage("r1"), stage("r2")]),
    ));

    let mut err = None;
    for directive in &directives {
        if let Err(e) = evaluate_directive(directive, &env).await {
            err = Some(e);
            break;
        }
    }
    let err = err.expect("nested retry must fail");
    assert_eq!(err.code(), "INVALID_RETRY");
}

// ===========================================================================
// Parallel groups
// ===========================================================================

#[tokio::test]
async fn parallel_group_collects_in_source_order() -> MlldResult<()> {
    let (env, _sink) = test_env();

    let directives = vec![
        d_exe("split", &["x"], js("sleep:40;return:[\"A\",\"B\",\"C\"]")),
        d_exe("upper", &["x"], js("upper:x")),
        d_exe("lower", &["x"], js("sleep:15;lower:x")),
        d_var(
            "r",
            pipeline(
                s("aBc"),
                vec![StageSpec::Group {
                    branches: vec![stage("split"), stage("upper"), stage("lower")],
                }],
            ),
        ),
    ];

    let result = run_all(directives, &env).await?;
    // Branch texts in source order, serialized as JSON for the next
    // stage; the array branch stringifies comma-joined.
    assert_eq!(result, Value::text(r#"["A,B,C","ABC","abc"]"#));
    Ok(())
}

#[tokio::test]
async fn parallel_branch_failure_fails_the_stage() {
    let (env, _sink) = test_env();

    let directives = vec![
        d_exe("ok", &["x"], js("return:\"fine\"")),
        d_exe("boom", &["x"], js("explode:now")),
        d_var(
            "r",
            pipeline(
                s("input"),
                vec![StageSpec::Group {
                    branches: vec![stage("ok"), stage("boom")],
                }],
            ),
        ),
    ];

    let mut err = None;
    for directive in &directives {
        if let Err(e) = evaluate_directive(directive, &env).await {
            err = Some(e);
            break;
        }
    }
    assert_eq!(
        err.expect("branch failure surfaces").code(),
        "PARALLEL_BRANCH_FAILED"
    );
}

// ===========================================================================
// Builtin effects
// ===========================================================================

#[tokio::test]
async fn builtins_attach_to_the_preceding_stage() -> MlldResult<()> {
    let (env, sink) = test_env();

    let directives = vec![
        d_exe("upper", &["x"], js("upper:x")),
        d_var(
            "r",
            pipeline(
                s("x"),
                vec![
                    StageSpec::Builtin(BuiltinEffect::Show),
                    stage("upper"),
                    StageSpec::Builtin(BuiltinEffect::Show),
                ],
            ),
        ),
    ];
    run_all(directives, &env).await?;

    // Effects appear in stage order: the source's value first, then the
    // transformed value.
    assert_eq!(
        sink.effects(),
        vec![
            Effect::Both("x\n".into()),
            Effect::Both("X\n".into()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn log_goes_to_stderr_only() -> MlldResult<()> {
    let (env, sink) = test_env();

    let directives = vec![d_var(
        "r",
        pipeline(s("quiet"), vec![StageSpec::Builtin(BuiltinEffect::Log)]),
    )];
    run_all(directives, &env).await?;

    assert_eq!(sink.effects(), vec![Effect::Stderr("quiet\n".into())]);
    assert_eq!(sink.document(), "");
    Ok(())
}
