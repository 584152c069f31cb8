//! Module export serialization.
//!
//! Serializing a module environment breaks the executable↔environment
//! cycle by omitting captured environments; deserialization reconstitutes
//! them against the receiving environment, so sibling references resolve
//! there. Variable names, executable bodies, parameters, and captured
//! shadow environments survive the round trip.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::env::Environment;
use crate::error::{MlldError, MlldResult};
use crate::exec::{ExecBodyDef, ExecDef, ShadowEnvSet, ShadowFn};
use crate::value::{TemplateDef, Value};
use crate::variable::Variable;

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum PortableValue {
    Executable {
        name: String,
        params: Vec<String>,
        body: ExecBodyDef,
        shadow: Vec<ShadowFn>,
        /// The captured `@tools` value, carried as its data view.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tools: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mcp_tool: Option<String>,
    },
    Template {
        name: String,
        params: Vec<String>,
        template: mlld_ast::Template,
    },
    Data {
        value: serde_json::Value,
    },
}

/// Serialize a module environment's exports to a portable JSON object.
///
/// # Errors
///
/// Serialization errors from serde.
pub fn serialize_module(env: &Environment) -> MlldResult<serde_json::Value> {
    let bound = env.capture_module();
    let mut out = serde_json::Map::new();

    for name in env.exported_names() {
        let Some(variable) = bound.get(&name) else {
            continue;
        };
        let portable = match variable.value.unwrap_imported() {
            Value::Executable(def) => PortableValue::Executable {
                name: def.name.clone(),
                params: def.params.clone(),
                body: def.body.clone(),
                shadow: all_shadow_fns(&def.shadow),
                tools: def
                    .captured_tools
                    .as_ref()
                    .map(|tools| tools.value.to_json()),
                mcp_tool: def.mcp_tool.clone(),
            },
            Value::Template(def) => PortableValue::Template {
                name: def.name.clone(),
                params: def.params.clone(),
                template: def.template.clone(),
            },
            other => PortableValue::Data {
                value: other.to_json(),
            },
        };
        out.insert(name, serde_json::to_value(portable)?);
    }

    Ok(serde_json::Value::Object(out))
}

fn all_shadow_fns(set: &ShadowEnvSet) -> Vec<ShadowFn> {
    let mut out = Vec::new();
    for lang in [
        mlld_ast::Lang::Js,
        mlld_ast::Lang::Node,
        mlld_ast::Lang::Sh,
        mlld_ast::Lang::Bash,
        mlld_ast::Lang::Python,
    ] {
        for func in set.for_lang(lang) {
            out.push((*func).clone());
        }
    }
    out
}

/// Reconstitute a serialized module into the given environment. Bound
/// executables capture the receiving environment as their module
/// environment.
///
/// # Errors
///
/// Deserialization errors from serde.
pub fn deserialize_module(
    json: &serde_json::Value,
    into: &Arc<Environment>,
) -> MlldResult<Vec<String>> {
    let object = json
        .as_object()
        .ok_or_else(|| MlldError::internal("serialized module is not an object"))?;

    let mut names = Vec::with_capacity(object.len());
    for (name, portable_json) in object {
        let portable: PortableValue = serde_json::from_value(portable_json.clone())?;
        let value = match portable {
            PortableValue::Executable {
                name: exec_name,
                params,
                body,
                shadow,
                tools,
                mcp_tool,
            } => {
                let mut shadow_set = ShadowEnvSet::new();
                for func in shadow {
                    shadow_set.add(func);
                }
                Value::Executable(Arc::new(ExecDef {
                    name: exec_name,
                    params,
                    body,
                    shadow: shadow_set,
                    module_env: Arc::downgrade(into),
                    captured_tools: tools
                        .map(|data| crate::value::EvalValue::new(Value::from_json(data))),
                    mcp_tool,
                }))
            }
            PortableValue::Template {
                name: template_name,
                params,
                template,
            } => Value::Template(Arc::new(TemplateDef {
                name: template_name,
                params,
                template,
            })),
            PortableValue::Data { value } => Value::from_json(value),
        };
        into.set(Variable::new(name.clone(), value));
        names.push(name.clone());
    }

    Ok(names)
}
