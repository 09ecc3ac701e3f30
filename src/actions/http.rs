use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;
use crate::actions::CustomHandler;
use crate::runtime::context::Args;

/// Calls an HTTP endpoint; the node output is `{status, data}`.
#[derive(Debug)]
pub struct HttpAction {
    client: Client,
}

impl HttpAction {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustomHandler for HttpAction {
    fn name(&self) -> &str {
        "http"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if params.get("url").is_none() {
            return Err(anyhow!("Missing required parameter: url"));
        }
        if let Some(method) = params.get("method").and_then(|v| v.as_str()) {
            method.parse::<reqwest::Method>()
                .map_err(|_| anyhow!("Invalid HTTP method: {}", method))?;
        }
        Ok(())
    }

    async fn execute(&self, params: Value, _args: &mut Args) -> Result<Value> {
        let url = params.get("url").and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Invalid url"))?;

        let method_str = params.get("method").and_then(|v| v.as_str()).unwrap_or("GET");
        let method = method_str.parse::<reqwest::Method>()
            .map_err(|_| anyhow!("Invalid HTTP method: {}", method_str))?;

        let mut builder = self.client.request(method, url);

        if let Some(body) = params.get("body") {
            builder = builder.json(body);
        }

        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v_str) = v.as_str() {
                    builder = builder.header(k, v_str);
                }
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        debug!(url = %url, status, "HTTP call finished");

        // Non-JSON bodies come back as text
        let text = response.text().await?;
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(json!({
            "status": status,
            "data": data
        }))
    }
}
