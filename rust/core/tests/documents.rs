//! Document evaluation: prose interleaving, effect ordering, blank-line
//! normalization, conditionals, loaders, and resolution modes.

mod common;

use pretty_assertions::assert_eq;

use std::sync::Arc;

use mlld_ast::{
    DirectiveKind, Document, Expr, Node, WhenAction, WhenArm,
};
use mlld_core::effects::{BufferedSink, EffectSink};
use mlld_core::env::{Environment, EvalConfig};
use mlld_core::error::MlldResult;
use mlld_core::interpreter::{evaluate_directive, evaluate_document};
use mlld_core::value::Value;

use common::{d, d_show, d_var, eq, n, r, s, tpl, test_env, Part};

// ===========================================================================
// Document assembly
// ===========================================================================

#[tokio::test]
async fn prose_and_directives_interleave_in_order() -> MlldResult<()> {
    let (env, _sink) = test_env();

    let document = Document::new(vec![
        Node::Prose {
            text: "# Title\n\n".into(),
        },
        Node::Directive(d_var("name", s("world"))),
        Node::Directive(d_show(Expr::Template(tpl(&[
            Part::T("hello "),
            Part::I("name"),
        ])))),
        Node::Prose {
            text: "the end\n".into(),
        },
    ]);

    let outcome = evaluate_document(&document, &env).await?;
    assert_eq!(outcome.document, "# Title\n\nhello world\nthe end\n");
    Ok(())
}

#[tokio::test]
async fn blank_line_runs_collapse_on_buffered_sinks() -> MlldResult<()> {
    let sink = Arc::new(BufferedSink::new());
    let env = Environment::builder()
        .sink(Arc::clone(&sink) as Arc<dyn EffectSink>)
        .build();

    let document = Document::new(vec![
        Node::Prose {
            text: "a\n\n\n\n\n".into(),
        },
        Node::Prose { text: "b\n".into() },
    ]);
    let outcome = evaluate_document(&document, &env).await?;
    assert_eq!(outcome.document, "a\n\nb\n");
    Ok(())
}

// ===========================================================================
// Conditionals
// ===========================================================================

#[tokio::test]
async fn when_without_first_runs_every_matching_arm() -> MlldResult<()> {
    let (env, sink) = test_env();

    let directive = d(DirectiveKind::When {
        arms: vec![
            WhenArm {
                cond: common::truth(),
                action: WhenAction::Directive {
                    directive: Box::new(d_show(s("one"))),
                },
            },
            WhenArm {
                cond: eq(n(1.0), n(2.0)),
                action: WhenAction::Directive {
                    directive: Box::new(d_show(s("skipped"))),
                },
            },
            WhenArm {
                cond: common::truth(),
                action: WhenAction::Directive {
                    directive: Box::new(d_show(s("two"))),
                },
            },
        ],
        first: false,
    });
    evaluate_directive(&directive, &env).await?;
    assert_eq!(sink.document(), "one\ntwo\n");
    Ok(())
}

#[tokio::test]
async fn when_first_stops_at_the_first_match() -> MlldResult<()> {
    let (env, sink) = test_env();

    let directive = d(DirectiveKind::When {
        arms: vec![
            WhenArm {
                cond: common::truth(),
                action: WhenAction::Directive {
                    directive: Box::new(d_show(s("winner"))),
                },
            },
            WhenArm {
                cond: common::truth(),
                action: WhenAction::Directive {
                    directive: Box::new(d_show(s("never"))),
                },
            },
        ],
        first: true,
    });
    evaluate_directive(&directive, &env).await?;
    assert_eq!(sink.document(), "winner\n");
    Ok(())
}

#[tokio::test]
async fn when_retry_outside_pipelines_is_invalid() {
    let (env, _sink) = test_env();

    let directive = d(DirectiveKind::When {
        arms: vec![WhenArm {
            cond: common::truth(),
            action: WhenAction::Retry,
        }],
        first: false,
    });
    let err = evaluate_directive(&directive, &env)
        .await
        .expect_err("retry needs a pipeline");
    assert_eq!(err.code(), "INVALID_RETRY");
}

// ===========================================================================
// Loaders
// ===========================================================================

#[tokio::test]
async fn json_loads_resolve_fields_through_the_data_view() -> MlldResult<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("config.json"),
        r#"{"service": {"port": 8080}}"#,
    )
    .expect("writes fixture");

    let env = Environment::builder()
        .config(EvalConfig {
            project_root: dir.path().to_path_buf(),
            ..EvalConfig::default()
        })
        .build();

    evaluate_directive(
        &d_var(
            "cfg",
            Expr::Load {
                path: "config.json".into(),
            },
        ),
        &env,
    )
    .await?;
    let port = evaluate_directive(&d_var("port", r("cfg.service.port")), &env).await?;
    assert_eq!(port, Value::Number(8080.0));

    // Loaded values are tainted as filesystem reads.
    let variable = env.get("cfg").expect("bound");
    assert!(variable.security.has_taint("file_system"));
    Ok(())
}

#[tokio::test]
async fn glob_loads_produce_ordered_arrays() -> MlldResult<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("b.txt"), "beta").expect("writes");
    std::fs::write(dir.path().join("a.txt"), "alpha").expect("writes");

    let env = Environment::builder()
        .config(EvalConfig {
            project_root: dir.path().to_path_buf(),
            ..EvalConfig::default()
        })
        .build();

    let result = evaluate_directive(
        &d_var(
            "files",
            Expr::Load {
                path: "*.txt".into(),
            },
        ),
        &env,
    )
    .await?;
    match result {
        Value::Array(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].to_text(), "alpha");
            assert_eq!(items[1].to_text(), "beta");
        }
        other => panic!("expected array, got {}", other.type_name()),
    }
    Ok(())
}

// ===========================================================================
// Resolution modes
// ===========================================================================

#[tokio::test]
async fn strict_fields_error_on_missing_members() {
    let env = Environment::builder()
        .config(EvalConfig {
            strict_fields: true,
            ..EvalConfig::default()
        })
        .build();

    let setup = d_var(
        "o",
        Expr::Object {
            entries: vec![("a".into(), n(1.0))],
        },
    );
    evaluate_directive(&setup, &env)
        .await
        .expect("object binds");

    let probe = d_var("x", r("o.missing"));
    let err = evaluate_directive(&probe, &env)
        .await
        .expect_err("strict mode errors");
    assert_eq!(err.code(), "FIELD_NOT_FOUND");
}

#[tokio::test]
async fn permissive_fields_resolve_missing_to_null() -> MlldResult<()> {
    let (env, _sink) = test_env();

    evaluate_directive(
        &d_var(
            "o",
            Expr::Object {
                entries: vec![("a".into(), n(1.0))],
            },
        ),
        &env,
    )
    .await?;
    let value = evaluate_directive(&d_var("x", r("o.missing")), &env).await?;
    assert_eq!(value, Value::Null);
    Ok(())
}

// ===========================================================================
// Equality semantics
// ===========================================================================

#[tokio::test]
async fn undefined_compares_unequal_to_everything() -> MlldResult<()> {
    let (env, _sink) = test_env();

    // `@ghost == null` is false: undefined is not null.
    let value = evaluate_directive(
        &d_var(
            "r",
            eq(r("ghost"), Expr::Literal(mlld_ast::Literal::Null)),
        ),
        &env,
    )
    .await?;
    assert_eq!(value, Value::Bool(false));

    let value = evaluate_directive(
        &d_var(
            "r2",
            Expr::Binary {
                op: mlld_ast::BinaryOp::Ne,
                lhs: Box::new(r("ghost")),
                rhs: Box::new(s("anything")),
            },
        ),
        &env,
    )
    .await?;
    assert_eq!(value, Value::Bool(true));
    Ok(())
}
