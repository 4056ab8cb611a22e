//! Request argument coercion against a descriptor's declared parameters.
//!
//! Runs before any invocation: unconvertible values, missing required
//! parameters, and unexpected extras (on fixed-arity callables) all fail
//! here with `InvalidArgument` and zero calls to the underlying binding.

use serde_json::{Map, Number, Value};

use crate::{
    catalog::{ParamType, ToolDescriptor},
    error::{GatewayError, GatewayResult},
    sdk::CallArgs,
};

/// Coerce a raw JSON argument mapping into typed call arguments, applying
/// declared defaults for absent optional parameters.
pub fn coerce_arguments(
    descriptor: &ToolDescriptor,
    arguments: &Map<String, Value>,
) -> GatewayResult<CallArgs> {
    let mut coerced = CallArgs::new();

    for (name, value) in arguments {
        match descriptor.param(name) {
            Some(param) => {
                let value = coerce_value(value, param.ty).ok_or_else(|| {
                    GatewayError::InvalidArguments(format!(
                        "argument '{}' expected {}, got {}",
                        name,
                        param.ty.label(),
                        type_name(value)
                    ))
                })?;
                coerced.insert(name.clone(), value);
            }
            None if descriptor.accepts_extra_args => {
                coerced.insert(name.clone(), value.clone());
            }
            None => {
                return Err(GatewayError::InvalidArguments(format!(
                    "unexpected argument '{}' for '{}'",
                    name, descriptor.name
                )));
            }
        }
    }

    for param in &descriptor.params {
        if coerced.contains_key(&param.name) {
            continue;
        }
        if let Some(default) = &param.default {
            coerced.insert(param.name.clone(), default.clone());
        } else if param.required {
            return Err(GatewayError::InvalidArguments(format!(
                "missing required argument '{}'",
                param.name
            )));
        }
    }

    Ok(coerced)
}

fn coerce_value(value: &Value, ty: ParamType) -> Option<Value> {
    match ty {
        ParamType::Any => Some(value.clone()),
        ParamType::String => value.is_string().then(|| value.clone()),
        ParamType::Boolean => value.is_boolean().then(|| value.clone()),
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            // A float with no fractional part still satisfies an integer slot.
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::Number(Number::from(f as i64))),
            _ => None,
        },
        ParamType::Number => value.is_number().then(|| value.clone()),
        ParamType::Array => value.is_array().then(|| value.clone()),
        ParamType::Object => value.is_object().then(|| value.clone()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
