use anyhow::{Result, anyhow};
use async_trait::async_trait;
use evalexpr::eval_with_context;
use serde_json::Value;
use tracing::info;
use crate::actions::CustomHandler;
use crate::runtime::context::Args;
use crate::runtime::model::{eval_context, from_eval_value};

#[derive(Debug)]
pub struct LogAction;

#[async_trait]
impl CustomHandler for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, params: Value, _args: &mut Args) -> Result<Value> {
        if let Some(msg) = params.get("msg").and_then(|v| v.as_str()) {
            info!("[LOG] {}", msg);
        } else {
            info!("[LOG] {:?}", params);
        }
        Ok(Value::Null)
    }
}

/// Writes order variables.
///
/// `assignments`: list of `{key, value}` pairs set verbatim.
/// `expression`: `var = expr` evaluated against the current variables.
/// `value`: returned as the node output.
#[derive(Debug)]
pub struct AssignAction;

#[async_trait]
impl CustomHandler for AssignAction {
    fn name(&self) -> &str {
        "assign"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if let Some(expr) = params.get("expression") {
            let expr = expr.as_str().ok_or_else(|| anyhow!("expression must be a string"))?;
            let rhs = expr.split_once('=').map(|(_, r)| r).unwrap_or(expr);
            evalexpr::build_operator_tree::<evalexpr::DefaultNumericTypes>(rhs.trim())
                .map_err(|e| anyhow!("invalid expression '{}': {}", expr, e))?;
        }
        Ok(())
    }

    async fn execute(&self, params: Value, args: &mut Args) -> Result<Value> {
        // 1. Plain assignments
        if let Some(list) = params.get("assignments").and_then(|v| v.as_array()) {
            for item in list {
                if let (Some(k), Some(v)) = (item.get("key").and_then(|s| s.as_str()), item.get("value")) {
                    args.insert(k.to_string(), v.clone());
                }
            }
        }

        // 2. Expression
        if let Some(expr) = params.get("expression").and_then(|v| v.as_str()) {
            let (target_var, rhs) = match expr.split_once('=') {
                Some((left, right)) => (Some(left.trim()), right.trim()),
                None => (None, expr),
            };

            let ctx = eval_context(args);
            let result = eval_with_context(rhs, &ctx)
                .map_err(|e| anyhow!("expression '{}' failed: {}", rhs, e))?;

            if let Some(value) = from_eval_value(result) {
                match target_var {
                    Some(var) => {
                        args.insert(var.to_string(), value);
                    }
                    None if params.get("value").is_none() => return Ok(value),
                    None => {}
                }
            }
        }

        // 3. Output
        Ok(params.get("value").cloned().unwrap_or(Value::Null))
    }
}
