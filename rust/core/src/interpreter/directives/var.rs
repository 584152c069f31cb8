//! `/var @x = <expr>`

use std::sync::Arc;

use mlld_ast::{Directive, Expr};

use crate::env::Environment;
use crate::error::MlldResult;
use crate::value::Value;
use crate::variable::{Variable, VariableSource};

/// Bind a variable in the current scope.
pub async fn evaluate(
    directive: &Directive,
    name: &str,
    value: &Expr,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let evaluated = super::super::expr::evaluate_expr(value, env).await?;

    // The scope snapshot propagates to every value created here.
    let mut security = evaluated.security;
    security.merge(&env.security_snapshot());
    for extra_label in &directive.labels {
        security.labels.insert(extra_label.clone());
    }

    let variable = Variable::new(name, evaluated.value.clone())
        .with_source(VariableSource {
            directive: "var".into(),
            syntax: syntax_of(value).into(),
            interpolated: matches!(value, Expr::Template(_)),
        })
        .with_definition(directive.location.clone())
        .with_security(security);
    env.set(variable);

    Ok(evaluated.value)
}

fn syntax_of(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(_) => "literal",
        Expr::Array { .. } => "array",
        Expr::Object { .. } => "object",
        Expr::Ref(_) => "reference",
        Expr::Template(_) => "template",
        Expr::Load { .. } => "loader",
        Expr::Call(_) => "call",
        Expr::Unary { .. } | Expr::Binary { .. } => "arithmetic",
        Expr::Pipeline(_) => "pipeline",
        Expr::Foreach { .. } => "foreach",
        Expr::For(_) => "for",
    }
}
