use std::collections::HashMap;
use std::fmt::Debug;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use crate::runtime::context::Args;

pub mod builtin;
pub mod http;

/// 插件接口：所有自动节点的处理器必须实现此 Trait
#[async_trait]
pub trait CustomHandler: Send + Sync + Debug {
    fn name(&self) -> &str;
    /// Checked once at deploy time against the node's raw params.
    fn validate(&self, params: &Value) -> Result<()>;
    /// `args` are the live order variables; handlers may write to them.
    async fn execute(&self, params: Value, args: &mut Args) -> Result<Value>;
}

/// Substitutes `${var}` references in param values with the current arguments.
///
/// A string that is exactly one reference takes the variable's value as is
/// (numbers stay numbers). References inside longer strings are spliced in as
/// text. Unknown variables resolve to null or the empty string.
pub fn resolve_params(params: &HashMap<String, Value>, args: &Args) -> Value {
    let resolved = params.iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, args)))
        .collect::<serde_json::Map<_, _>>();
    Value::Object(resolved)
}

fn resolve_value(value: &Value, args: &Args) -> Value {
    match value {
        Value::String(s) => resolve_str(s, args),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, args)).collect()),
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), resolve_value(v, args))).collect()
        ),
        other => other.clone(),
    }
}

fn resolve_str(s: &str, args: &Args) -> Value {
    if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        if !name.contains("${") && !name.contains('}') {
            return args.get(name.trim()).cloned().unwrap_or(Value::Null);
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                match args.get(after[..end].trim()) {
                    Some(Value::String(v)) => out.push_str(v),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}
