//! OpenAPI tool protocol: execute a named operation against a remote
//! service described by its OpenAPI document.
//!
//! Documents are fetched once per endpoint and cached behind an atomic
//! snapshot swap. An operation is located by `operationId`; parameters are
//! bound from the merged arguments and the injection map by declared
//! location (path/query/header/body), the HTTP call is performed, and the
//! response is parsed by its declared content type.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{HookError, ToolSpec};

/// Where a bound parameter goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamIn {
    Path,
    Query,
    Header,
    Body,
}

impl ParamIn {
    /// Parses an OpenAPI `in` field or an injection-key prefix.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParamIn::Path),
            "query" => Some(ParamIn::Query),
            "header" => Some(ParamIn::Header),
            "body" => Some(ParamIn::Body),
            _ => None,
        }
    }
}

/// One injected parameter (credentials, fixed properties).
#[derive(Debug, Clone)]
pub struct ParamArg {
    pub name: String,
    pub value: String,
    pub location: ParamIn,
}

#[derive(Debug, Clone)]
struct OperationParam {
    name: String,
    location: ParamIn,
}

#[derive(Debug, Clone)]
struct Operation {
    operation_id: String,
    method: String,
    path: String,
    description: Option<String>,
    params: Vec<OperationParam>,
    body_schema: Option<Value>,
}

/// A parsed OpenAPI document, reduced to what the protocol binds against.
#[derive(Debug)]
pub struct OpenApiDoc {
    server_url: Option<String>,
    operations: Vec<Operation>,
}

impl OpenApiDoc {
    /// Reduces a raw OpenAPI JSON document.
    pub fn parse(doc: &Value) -> Result<Self, HookError> {
        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| HookError::Schema("document has no paths object".into()))?;
        let server_url = doc
            .get("servers")
            .and_then(Value::as_array)
            .and_then(|s| s.first())
            .and_then(|s| s.get("url"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let mut operations = Vec::new();
        for (path, methods) in paths {
            let Some(methods) = methods.as_object() else {
                continue;
            };
            for (method, op) in methods {
                let Some(operation_id) = op.get("operationId").and_then(Value::as_str) else {
                    continue;
                };
                let params = op
                    .get("parameters")
                    .and_then(Value::as_array)
                    .map(|params| {
                        params
                            .iter()
                            .filter_map(|p| {
                                let name = p.get("name")?.as_str()?.to_string();
                                let location = ParamIn::parse(p.get("in")?.as_str()?)?;
                                Some(OperationParam { name, location })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let body_schema = op
                    .get("requestBody")
                    .and_then(|b| b.get("content"))
                    .and_then(|c| c.get("application/json"))
                    .and_then(|j| j.get("schema"))
                    .cloned();
                operations.push(Operation {
                    operation_id: operation_id.to_string(),
                    method: method.to_uppercase(),
                    path: path.clone(),
                    description: op
                        .get("description")
                        .or_else(|| op.get("summary"))
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    params,
                    body_schema,
                });
            }
        }
        Ok(Self {
            server_url,
            operations,
        })
    }

    fn find(&self, operation_id: &str) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|o| o.operation_id == operation_id)
    }

    /// Tool list derived from the operations: one tool per operationId.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.operations
            .iter()
            .map(|op| {
                let schema = op.body_schema.clone().unwrap_or_else(|| {
                    let props: serde_json::Map<String, Value> = op
                        .params
                        .iter()
                        .map(|p| (p.name.clone(), serde_json::json!({"type": "string"})))
                        .collect();
                    serde_json::json!({"type": "object", "properties": props})
                });
                ToolSpec {
                    name: op.operation_id.clone(),
                    description: op.description.clone(),
                    input_schema: schema,
                }
            })
            .collect()
    }
}

/// Executes OpenAPI operations; one shared HTTP client, one cached document
/// per endpoint.
pub struct OpenApiProtocol {
    client: reqwest::Client,
    docs: RwLock<HashMap<String, Arc<OpenApiDoc>>>,
}

impl OpenApiProtocol {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// URL the document is served from. Endpoints that already point at a
    /// JSON document are used as-is; otherwise `/openapi.json` is appended.
    fn doc_url(endpoint_url: &str) -> String {
        if endpoint_url.ends_with(".json") {
            endpoint_url.to_string()
        } else {
            format!("{}/openapi.json", endpoint_url.trim_end_matches('/'))
        }
    }

    /// Fetches (or returns the cached) document for an endpoint.
    pub async fn document(
        &self,
        ctx: &ExecContext,
        endpoint_url: &str,
    ) -> Result<Arc<OpenApiDoc>, HookError> {
        let url = Self::doc_url(endpoint_url);
        if let Some(doc) = self.docs.read().expect("doc cache lock").get(&url) {
            return Ok(doc.clone());
        }
        debug!(request_id = %ctx.request_id, url = %url, "fetching OpenAPI document");
        let raw: Value = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HookError::Transport(format!("schema fetch {url}: {e}")))?
            .error_for_status()
            .map_err(|e| HookError::Schema(format!("schema fetch {url}: {e}")))?
            .json()
            .await
            .map_err(|e| HookError::Schema(format!("schema parse {url}: {e}")))?;
        let doc = Arc::new(OpenApiDoc::parse(&raw)?);
        self.docs
            .write()
            .expect("doc cache lock")
            .insert(url, doc.clone());
        Ok(doc)
    }

    /// Executes `operation_id` with the merged `args` and injected params.
    #[allow(clippy::too_many_arguments)]
    pub async fn call(
        &self,
        ctx: &ExecContext,
        endpoint_url: &str,
        operation_id: &str,
        args: Value,
        injections: &[ParamArg],
        timeout: Duration,
    ) -> Result<TaskValue, HookError> {
        let doc = self.document(ctx, endpoint_url).await?;
        let op = doc.find(operation_id).ok_or_else(|| HookError::UnknownTool {
            hook: endpoint_url.to_string(),
            tool: operation_id.to_string(),
        })?;

        let mut body = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("input".into(), other);
                map
            }
        };

        // Declared path/query/header parameters are pulled out of the body.
        let mut path = op.path.clone();
        let mut query: Vec<(String, String)> = Vec::new();
        let mut headers: Vec<(String, String)> = Vec::new();
        for param in &op.params {
            let value = body.remove(&param.name).map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            });
            let Some(value) = value else { continue };
            match param.location {
                ParamIn::Path => path = path.replace(&format!("{{{}}}", param.name), &value),
                ParamIn::Query => query.push((param.name.clone(), value)),
                ParamIn::Header => headers.push((param.name.clone(), value)),
                ParamIn::Body => {
                    body.insert(param.name.clone(), Value::String(value));
                }
            }
        }
        for inj in injections {
            match inj.location {
                ParamIn::Path => path = path.replace(&format!("{{{}}}", inj.name), &inj.value),
                ParamIn::Query => query.push((inj.name.clone(), inj.value.clone())),
                ParamIn::Header => headers.push((inj.name.clone(), inj.value.clone())),
                ParamIn::Body => {
                    body.insert(inj.name.clone(), Value::String(inj.value.clone()));
                }
            }
        }

        let base = doc
            .server_url
            .clone()
            .unwrap_or_else(|| endpoint_url.trim_end_matches('/').to_string());
        let url = format!("{}{}", base.trim_end_matches('/'), path);

        let method: reqwest::Method = op
            .method
            .parse()
            .map_err(|_| HookError::Schema(format!("bad method {}", op.method)))?;
        let sends_body = matches!(op.method.as_str(), "POST" | "PUT" | "PATCH");
        let mut request = self.client.request(method, &url).timeout(timeout);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        if !query.is_empty() {
            request = request.query(&query);
        }
        if sends_body {
            request = request.json(&Value::Object(body));
        }

        debug!(
            request_id = %ctx.request_id,
            operation = %operation_id,
            url = %url,
            "OpenAPI call"
        );
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                HookError::Timeout
            } else {
                HookError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("application/json"))
            .unwrap_or(false);
        let text = response
            .text()
            .await
            .map_err(|e| HookError::Transport(e.to_string()))?;
        if !status.is_success() {
            let mut body = text;
            body.truncate(512);
            return Err(HookError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if is_json {
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| HookError::Schema(format!("bad JSON response: {e}")))?;
            Ok(TaskValue::Json(value))
        } else {
            Ok(TaskValue::String(text))
        }
    }
}

impl Default for OpenApiProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> Value {
        serde_json::json!({
            "openapi": "3.0.0",
            "info": {"title": "svc", "version": "1"},
            "servers": [{"url": "https://svc.example/api"}],
            "paths": {
                "/items/{id}": {
                    "get": {
                        "operationId": "get_item",
                        "summary": "Fetch one item",
                        "parameters": [
                            {"name": "id", "in": "path", "required": true},
                            {"name": "verbose", "in": "query"}
                        ]
                    }
                },
                "/items": {
                    "post": {
                        "operationId": "create_item",
                        "requestBody": {
                            "content": {"application/json": {"schema": {
                                "type": "object",
                                "properties": {"name": {"type": "string"}}
                            }}}
                        }
                    }
                }
            }
        })
    }

    /// **Scenario**: Parsing finds operations by id with their parameters.
    #[test]
    fn parse_finds_operations() {
        let doc = OpenApiDoc::parse(&sample_doc()).expect("parse");
        let op = doc.find("get_item").expect("operation");
        assert_eq!(op.method, "GET");
        assert_eq!(op.path, "/items/{id}");
        assert_eq!(op.params.len(), 2);
        assert!(doc.find("missing").is_none());
    }

    /// **Scenario**: Tool specs use the body schema when present and fall back
    /// to parameter names otherwise.
    #[test]
    fn tool_specs_from_operations() {
        let doc = OpenApiDoc::parse(&sample_doc()).expect("parse");
        let specs = doc.tool_specs();
        assert_eq!(specs.len(), 2);
        let get = specs.iter().find(|s| s.name == "get_item").unwrap();
        assert!(get.input_schema["properties"]["id"].is_object());
        let create = specs.iter().find(|s| s.name == "create_item").unwrap();
        assert!(create.input_schema["properties"]["name"].is_object());
    }

    /// **Scenario**: A document without paths is a schema error.
    #[test]
    fn parse_requires_paths() {
        assert!(OpenApiDoc::parse(&serde_json::json!({"openapi": "3.0.0"})).is_err());
    }

    /// **Scenario**: Endpoints pointing at a JSON file are used verbatim for
    /// the document fetch.
    #[test]
    fn doc_url_shapes() {
        assert_eq!(
            OpenApiProtocol::doc_url("https://svc.example/spec.json"),
            "https://svc.example/spec.json"
        );
        assert_eq!(
            OpenApiProtocol::doc_url("https://svc.example/"),
            "https://svc.example/openapi.json"
        );
    }
}
