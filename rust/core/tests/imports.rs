//! Import model behavior: selected/namespace/policy imports, the
//! collision ledger, type constraints, environment-variable imports, and
//! module export round-trips.

mod common;

use pretty_assertions::assert_eq;

use std::sync::Arc;

use indexmap::IndexMap;

use mlld_ast::{
    Directive, DirectiveKind, Document, Expr, ExeBody, ImportClause, ImportItem, ImportType,
};
use mlld_core::effects::CollectingSink;
use mlld_core::env::{Environment, EvalConfig};
use mlld_core::error::MlldResult;
use mlld_core::import::{deserialize_module, serialize_module, MemoryResolver, ResolutionKind};
use mlld_core::interpreter::{evaluate_directive, evaluate_document};
use mlld_core::value::Value;

use common::{d, d_export, d_show, d_var, r, s};

fn d_import_selected(names: &[&str], source: &str) -> Directive {
    d(DirectiveKind::Import {
        clause: ImportClause::Selected {
            items: names
                .iter()
                .map(|name| ImportItem {
                    name: (*name).to_string(),
                    alias: None,
                })
                .collect(),
        },
        source: source.into(),
        import_type: None,
        cache: None,
    })
}

fn d_import_policy(source: &str, alias: &str) -> Directive {
    d(DirectiveKind::Import {
        clause: ImportClause::Policy {
            alias: alias.into(),
        },
        source: source.into(),
        import_type: None,
        cache: None,
    })
}

fn env_with_resolver(resolver: MemoryResolver) -> (Arc<Environment>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let env = Environment::builder()
        .sink(Arc::clone(&sink) as Arc<dyn mlld_core::effects::EffectSink>)
        .resolver(Arc::new(resolver))
        .build();
    (env, sink)
}

/// A module exporting a single string binding.
fn string_module(name: &str, value: &str) -> Document {
    Document::from_directives(vec![d_var(name, s(value)), d_export(&[name])])
}

/// A policy module denying one taint tag.
fn policy_module(tag: &str) -> Document {
    Document::from_directives(vec![d_var(
        "deny_taint",
        Expr::Array {
            items: vec![s(tag)],
        },
    )])
}

// ===========================================================================
// Selected imports
// ===========================================================================

#[tokio::test]
async fn selected_import_binds_and_shows() -> MlldResult<()> {
    let resolver = MemoryResolver::new().with_module("m.mld", string_module("x", "hi"));
    let (env, _sink) = env_with_resolver(resolver);

    let document = Document::from_directives(vec![
        d_import_selected(&["x"], "m.mld"),
        d_show(r("x")),
    ]);
    let outcome = evaluate_document(&document, &env).await?;
    assert_eq!(outcome.document.trim_end(), "hi");
    Ok(())
}

#[tokio::test]
async fn selected_import_renames_with_alias() -> MlldResult<()> {
    let resolver = MemoryResolver::new().with_module("m.mld", string_module("x", "hi"));
    let (env, _sink) = env_with_resolver(resolver);

    let directive = d(DirectiveKind::Import {
        clause: ImportClause::Selected {
            items: vec![ImportItem {
                name: "x".into(),
                alias: Some("y".into()),
            }],
        },
        source: "m.mld".into(),
        import_type: None,
        cache: None,
    });
    evaluate_directive(&directive, &env).await?;

    assert!(env.get("y").is_some());
    assert!(env.get("x").is_none());
    Ok(())
}

#[tokio::test]
async fn missing_export_is_reported() {
    let resolver = MemoryResolver::new().with_module("m.mld", string_module("x", "hi"));
    let (env, _sink) = env_with_resolver(resolver);

    let err = futures_err(&d_import_selected(&["ghost"], "m.mld"), &env).await;
    assert_eq!(err.code(), "EXPORTED_NAME_NOT_FOUND");
}

#[tokio::test]
async fn wildcard_import_is_rejected_with_fixed_message() {
    let resolver = MemoryResolver::new().with_module("m.mld", string_module("x", "hi"));
    let (env, _sink) = env_with_resolver(resolver);

    let directive = d(DirectiveKind::Import {
        clause: ImportClause::All,
        source: "m.mld".into(),
        import_type: None,
        cache: None,
    });
    let err = futures_err(&directive, &env).await;
    assert_eq!(err.code(), "WILDCARD_IMPORT");
    assert_eq!(
        err.to_string(),
        "wildcard imports are not supported; list names explicitly"
    );
}

async fn futures_err(
    directive: &Directive,
    env: &Arc<Environment>,
) -> mlld_core::error::MlldError {
    evaluate_directive(directive, env)
        .await
        .expect_err("import must fail")
}

// ===========================================================================
// Collision ledger
// ===========================================================================

#[tokio::test]
async fn conflicting_policy_imports_fail_before_second_registration() -> MlldResult<()> {
    let resolver = MemoryResolver::new()
        .with_module("a", policy_module("src:mcp"))
        .with_module("b", policy_module("network"));
    let (env, _sink) = env_with_resolver(resolver);

    evaluate_directive(&d_import_policy("a", "p"), &env).await?;
    assert!(env.guards().contains("p:deny-taint:src:mcp"));

    let err = futures_err(&d_import_policy("b", "p"), &env).await;
    assert_eq!(err.code(), "IMPORT_NAME_CONFLICT");
    // The first policy's guards stay; the second's were never registered.
    assert!(env.guards().contains("p:deny-taint:src:mcp"));
    assert!(!env.guards().contains("p:deny-taint:network"));
    Ok(())
}

#[tokio::test]
async fn same_source_reimport_is_not_a_conflict() -> MlldResult<()> {
    let resolver = MemoryResolver::new().with_module("m.mld", string_module("x", "hi"));
    let (env, _sink) = env_with_resolver(resolver);

    evaluate_directive(&d_import_selected(&["x"], "m.mld"), &env).await?;
    evaluate_directive(&d_import_selected(&["x"], "m.mld"), &env).await?;
    Ok(())
}

// ===========================================================================
// Namespace and directory imports
// ===========================================================================

#[tokio::test]
async fn namespace_import_supports_field_access() -> MlldResult<()> {
    let resolver = MemoryResolver::new().with_module("m.mld", string_module("x", "hi"));
    let (env, _sink) = env_with_resolver(resolver);

    let document = Document::from_directives(vec![
        d(DirectiveKind::Import {
            clause: ImportClause::Namespace { alias: "ns".into() },
            source: "m.mld".into(),
            import_type: None,
            cache: None,
        }),
        d_show(r("ns.x")),
    ]);
    let outcome = evaluate_document(&document, &env).await?;
    assert_eq!(outcome.document.trim_end(), "hi");
    Ok(())
}

#[tokio::test]
async fn directory_import_assembles_by_stem() -> MlldResult<()> {
    let resolver = MemoryResolver::new().with_directory(
        "lib",
        vec![
            ("greet".into(), string_module("msg", "hello")),
            ("part".into(), string_module("msg", "bye")),
        ],
    );
    let (env, _sink) = env_with_resolver(resolver);

    let document = Document::from_directives(vec![
        d(DirectiveKind::Import {
            clause: ImportClause::Namespace { alias: "lib".into() },
            source: "lib".into(),
            import_type: None,
            cache: None,
        }),
        d_show(r("lib.greet.msg")),
        d_show(r("lib.part.msg")),
    ]);
    let outcome = evaluate_document(&document, &env).await?;
    assert_eq!(outcome.document, "hello\nbye\n");
    Ok(())
}

#[tokio::test]
async fn module_document_output_stays_isolated() -> MlldResult<()> {
    // A module that shows something must not render into the importer's
    // document.
    let module = Document::from_directives(vec![
        d_var("x", s("hi")),
        d_show(s("module noise")),
        d_export(&["x"]),
    ]);
    let resolver = MemoryResolver::new().with_module("m.mld", module);
    let (env, _sink) = env_with_resolver(resolver);

    let document = Document::from_directives(vec![
        d_import_selected(&["x"], "m.mld"),
        d_show(r("x")),
    ]);
    let outcome = evaluate_document(&document, &env).await?;
    assert_eq!(outcome.document, "hi\n");
    Ok(())
}

// ===========================================================================
// Import types
// ===========================================================================

#[tokio::test]
async fn import_type_mismatch_is_fatal() {
    let resolver = MemoryResolver::new().with_module("m.mld", string_module("x", "hi"));
    let (env, _sink) = env_with_resolver(resolver);

    let directive = d(DirectiveKind::Import {
        clause: ImportClause::Selected {
            items: vec![ImportItem {
                name: "x".into(),
                alias: None,
            }],
        },
        source: "m.mld".into(),
        import_type: Some(ImportType::Cached),
        cache: None,
    });
    let err = futures_err(&directive, &env).await;
    assert_eq!(err.code(), "IMPORT_TYPE_MISMATCH");
}

#[tokio::test]
async fn module_type_accepts_registry_resolution() -> MlldResult<()> {
    let resolver = MemoryResolver::new().with_module_kind(
        "@author/mod",
        ResolutionKind::Registry,
        string_module("x", "hi"),
    );
    let (env, _sink) = env_with_resolver(resolver);

    let directive = d(DirectiveKind::Import {
        clause: ImportClause::Selected {
            items: vec![ImportItem {
                name: "x".into(),
                alias: None,
            }],
        },
        source: "@author/mod".into(),
        import_type: Some(ImportType::Module),
        cache: None,
    });
    evaluate_directive(&directive, &env).await?;
    assert!(env.get("x").is_some());
    Ok(())
}

// ===========================================================================
// Environment-variable imports
// ===========================================================================

#[tokio::test]
async fn env_var_import_respects_allowlist() -> MlldResult<()> {
    let mut env_vars = IndexMap::new();
    env_vars.insert("HOME_DIR".to_string(), "/home/user".to_string());
    let config = EvalConfig {
        env_allowlist: vec!["HOME_DIR".into()],
        env_vars,
        ..EvalConfig::default()
    };
    let env = Environment::builder().config(config).build();

    evaluate_directive(&d_import_selected(&["HOME_DIR"], "@input"), &env).await?;
    assert_eq!(
        env.get("HOME_DIR").map(|v| v.value.clone()),
        Some(Value::text("/home/user"))
    );

    let err = futures_err(&d_import_selected(&["SECRET"], "@input"), &env).await;
    assert_eq!(err.code(), "EXPORTED_NAME_NOT_FOUND");
    Ok(())
}

// ===========================================================================
// Export round-trip
// ===========================================================================

#[tokio::test]
async fn module_serialization_round_trips() -> MlldResult<()> {
    let (env, _sink) = common::test_env();

    let directives = vec![
        d_var("greeting", s("hello")),
        d_var("count", common::n(3.0)),
        common::d_exe("loud", &["x"], ExeBody::Language {
            lang: mlld_ast::Lang::Js,
            source: "upper:x".into(),
        }),
        d_export(&["greeting", "count", "loud"]),
    ];
    for directive in &directives {
        evaluate_directive(directive, &env).await?;
    }

    let serialized = serialize_module(&env)?;

    let (fresh, _sink) = common::test_env();
    let names = deserialize_module(&serialized, &fresh)?;
    assert_eq!(
        names,
        vec!["greeting".to_string(), "count".into(), "loud".into()]
    );

    assert_eq!(
        fresh.get("greeting").map(|v| v.value.clone()),
        Some(Value::text("hello"))
    );
    // The reconstituted executable still runs, with its captured shadow
    // environments and the receiving environment as its module scope.
    let result = evaluate_directive(
        &d_var(
            "r",
            Expr::Call(mlld_ast::CallExpr {
                target: "loud".into(),
                args: vec![s("hey")],
            }),
        ),
        &fresh,
    )
    .await?;
    assert_eq!(result, Value::text("HEY"));
    Ok(())
}
