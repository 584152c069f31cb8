//! Template interpolation.

use mlld_ast::Template;

use crate::env::Environment;
use crate::error::MlldResult;
use crate::resolve::{resolve_ref, ResolutionContext};
use crate::security::SecurityDescriptor;

/// Interpolate a template, accumulating the security descriptors of every
/// referenced variable.
///
/// # Errors
///
/// Propagates strict-mode resolution failures.
pub fn interpolate_tracked(
    template: &Template,
    env: &Environment,
    rcx: ResolutionContext,
) -> MlldResult<(String, SecurityDescriptor)> {
    let mut out = String::new();
    let mut security = SecurityDescriptor::default();
    for part in &template.parts {
        match part {
            mlld_ast::TemplatePart::Text(text) => out.push_str(text),
            mlld_ast::TemplatePart::Interp(var_ref) => {
                let resolved = resolve_ref(env, var_ref, rcx)?;
                out.push_str(&resolved.value.to_text());
                security.merge(&resolved.security);
            }
        }
    }
    Ok((out, security))
}

/// Interpolate a template in display context.
///
/// # Errors
///
/// Propagates strict-mode resolution failures.
pub fn interpolate(template: &Template, env: &Environment) -> MlldResult<String> {
    interpolate_tracked(template, env, ResolutionContext::Display).map(|(text, _)| text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::variable::Variable;
    use mlld_ast::{TemplatePart, TemplateSyntax, VarRef};

    #[test]
    fn interpolates_in_order() {
        let env = Environment::builder().build();
        env.set(Variable::new("name", Value::text("world")));

        let template = Template {
            parts: vec![
                TemplatePart::Text("hello ".into()),
                TemplatePart::Interp(VarRef::bare("name")),
                TemplatePart::Text("!".into()),
            ],
            syntax: TemplateSyntax::AtSign,
        };
        assert_eq!(interpolate(&template, &env).expect("interpolates"), "hello world!");
    }

    #[test]
    fn missing_names_interpolate_empty() {
        let env = Environment::builder().build();
        let template = Template {
            parts: vec![TemplatePart::Interp(VarRef::bare("ghost"))],
            syntax: TemplateSyntax::DoubleBrace,
        };
        assert_eq!(interpolate(&template, &env).expect("interpolates"), "");
    }
}
