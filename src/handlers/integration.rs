//! Outbound integrations: webhooks, API calls, registered custom
//! functions, external service adapters and sub-workflow calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::info;

use crate::engine::NodeHandler;
use crate::error::{NodeError, WorkflowResult};
use crate::model::{ExecutionContext, ExecutionResult, ExecutionStatus, Node};
use crate::services::{AuthScheme, HttpExecutor, HttpRequest};
use crate::template;

use super::support;

/// Tenant-registered function invoked by `custom_function` nodes.
pub type CustomFunction = Arc<dyn Fn(Value) -> Result<Value, NodeError> + Send + Sync>;

/// Seam for `call_subflow`: runs the child workflow to a terminal state and
/// reports the status it finished with. Wired after engine construction to
/// break the handler/engine dependency loop.
#[async_trait]
pub trait SubflowRunner: Send + Sync {
    async fn run_subflow(
        &self,
        workflow_id: &str,
        input: Value,
        tenant_id: &str,
    ) -> WorkflowResult<(ExecutionContext, ExecutionStatus)>;
}

pub struct IntegrationHandler {
    http: Arc<dyn HttpExecutor>,
    functions: RwLock<HashMap<String, CustomFunction>>,
    subflows: RwLock<Option<Arc<dyn SubflowRunner>>>,
}

impl IntegrationHandler {
    pub fn new(http: Arc<dyn HttpExecutor>) -> Self {
        Self {
            http,
            functions: RwLock::new(HashMap::new()),
            subflows: RwLock::new(None),
        }
    }

    pub fn register_function(&self, name: impl Into<String>, function: CustomFunction) {
        self.functions.write().insert(name.into(), function);
    }

    pub fn set_subflow_runner(&self, runner: Arc<dyn SubflowRunner>) {
        *self.subflows.write() = Some(runner);
    }

    fn auth_scheme(node: &Node) -> AuthScheme {
        match node
            .config_str("authType")
            .unwrap_or_default()
            .to_ascii_uppercase()
            .as_str()
        {
            "BASIC" => AuthScheme::Basic,
            "BEARER" => AuthScheme::Bearer,
            "API_KEY" => AuthScheme::ApiKey,
            "CUSTOM" => AuthScheme::Custom,
            _ => AuthScheme::None,
        }
    }

    async fn http_call(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let url = support::require_resolved(node, ctx, "url")?;
        let method = node.config_str("method").unwrap_or("POST");

        let mut request = HttpRequest::new(url.clone(), method.to_uppercase());
        if let Some(headers) = node.config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let rendered = template::resolve(&template::stringify(value), &ctx.variables);
                request.headers.insert(name.clone(), rendered);
            }
        }
        request.body = support::resolved_map(node, ctx, "body")
            .or_else(|| support::resolved_map(node, ctx, "payload"));
        request.auth = Self::auth_scheme(node);
        request.auth_config = support::resolved_map(node, ctx, "authConfig").unwrap_or(Value::Null);

        let response = self.http.request(request).await?;
        info!(url, status = response.status_code, "outbound call completed");

        let mut output = BTreeMap::new();
        output.insert("statusCode".into(), json!(response.status_code));
        output.insert("responseBody".into(), response.body.clone());
        if response.is_success() {
            Ok(ExecutionResult::success_with(output))
        } else {
            Ok(ExecutionResult::failed(format!(
                "{} returned HTTP {}",
                url, response.status_code
            )))
        }
    }

    async fn custom_function(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let name = support::require_resolved(node, ctx, "functionName")?;
        let input = support::resolved_map(node, ctx, "parameters").unwrap_or_else(|| json!({}));
        let function = self.functions.read().get(&name).cloned();
        let Some(function) = function else {
            return Ok(ExecutionResult::failed(format!(
                "custom function not registered: {name}"
            )));
        };

        let result = function(input)?;
        let mut output = BTreeMap::new();
        output.insert("functionResult".into(), result);
        output.insert("functionName".into(), json!(name));
        Ok(ExecutionResult::success_with(output))
    }

    /// External services share the webhook path once resolved to a URL; a
    /// service without a configured endpoint is a failed node, not a crash.
    async fn external_service(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let service = support::require_resolved(node, ctx, "serviceName")?;
        let action = support::require_resolved(node, ctx, "action")?;
        let Some(url) = support::resolved(node, ctx, "url") else {
            return Ok(ExecutionResult::failed(format!(
                "no endpoint configured for service {service}"
            )));
        };

        let mut request = HttpRequest::new(url, "POST");
        request.body = Some(json!({
            "service": service,
            "action": action,
            "parameters": support::resolved_map(node, ctx, "parameters").unwrap_or(json!({})),
        }));
        request.auth = Self::auth_scheme(node);
        request.auth_config = support::resolved_map(node, ctx, "authConfig").unwrap_or(Value::Null);

        let response = self.http.request(request).await?;
        let succeeded = response.is_success();
        let mut output = BTreeMap::new();
        output.insert("serviceName".into(), json!(service));
        output.insert("action".into(), json!(action));
        output.insert("statusCode".into(), json!(response.status_code));
        output.insert("responseBody".into(), response.body);
        if succeeded {
            Ok(ExecutionResult::success_with(output))
        } else {
            Ok(ExecutionResult::failed(format!(
                "service {service} returned HTTP {}",
                response.status_code
            )))
        }
    }

    async fn call_subflow(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let subflow_id = support::require_resolved(node, ctx, "subflowId")?;
        let input = support::resolved_map(node, ctx, "input")
            .unwrap_or_else(|| Value::Object(ctx.variables.clone().into_iter().collect()));
        let runner = self.subflows.read().clone();
        let Some(runner) = runner else {
            return Ok(ExecutionResult::failed(
                "sub-workflow execution not available",
            ));
        };

        let (child, status) = runner
            .run_subflow(&subflow_id, input, &ctx.tenant_id)
            .await
            .map_err(|e| NodeError::ExecutionError(e.to_string()))?;

        let mut output = BTreeMap::new();
        output.insert("subflowId".into(), json!(subflow_id));
        output.insert("subflowExecutionId".into(), json!(child.execution_id));
        match status {
            ExecutionStatus::Completed => {
                output.insert(
                    "subflowVariables".into(),
                    Value::Object(child.variables.into_iter().collect()),
                );
                Ok(ExecutionResult::success_with(output))
            }
            other => Ok(ExecutionResult::failed(format!(
                "sub-workflow {subflow_id} ended as {other:?} instead of completing"
            ))),
        }
    }
}

#[async_trait]
impl NodeHandler for IntegrationHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "webhook" | "api_call" => self.http_call(node, ctx).await,
            "custom_function" => self.custom_function(node, ctx).await,
            "external_service" => self.external_service(node, ctx).await,
            "call_subflow" => self.call_subflow(node, ctx).await,
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::NodeType;
    use crate::services::StubHttpExecutor;

    use super::*;

    fn setup() -> (IntegrationHandler, Arc<StubHttpExecutor>) {
        let http = Arc::new(StubHttpExecutor::new());
        (IntegrationHandler::new(http.clone()), http)
    }

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("wf-1", 1, "ex-1", "acme", json!({}));
        ctx.set_variable("lead", json!({"id": "l1", "email": "a@x.com"}));
        ctx
    }

    #[tokio::test]
    async fn test_webhook_posts_resolved_body() {
        let (handler, http) = setup();
        http.respond_with("https://hooks.example.com/crm", 200, json!({"ok": true}));
        let node = Node::new("i1", NodeType::Integration, "webhook").with_config(json!({
            "url": "https://hooks.example.com/crm",
            "method": "POST",
            "body": {"leadId": "{{lead.id}}"}
        }));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.output["statusCode"], json!(200));
        let sent = http.requests();
        assert_eq!(sent[0].body.as_ref().unwrap()["leadId"], json!("l1"));
    }

    #[tokio::test]
    async fn test_non_2xx_response_fails_the_node() {
        let (handler, http) = setup();
        http.respond_with("https://hooks.example.com/crm", 503, json!(null));
        let node = Node::new("i1", NodeType::Integration, "api_call")
            .with_config(json!({"url": "https://hooks.example.com/crm", "method": "GET"}));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error_message.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_bearer_auth_applied_from_config() {
        let (handler, http) = setup();
        http.respond_with("https://api.example.com/v1", 200, json!({}));
        let node = Node::new("i1", NodeType::Integration, "api_call").with_config(json!({
            "url": "https://api.example.com/v1",
            "method": "GET",
            "authType": "BEARER",
            "authConfig": {"token": "t0ken"}
        }));

        handler.execute(&node, &mut ctx()).await.unwrap();
        let sent = http.requests();
        assert_eq!(
            sent[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer t0ken")
        );
    }

    #[tokio::test]
    async fn test_custom_function_round_trip() {
        let (handler, _) = setup();
        handler.register_function(
            "score_lead",
            Arc::new(|input: Value| {
                let base = input.get("base").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!({"score": base + 10}))
            }),
        );
        let node = Node::new("i1", NodeType::Integration, "custom_function").with_config(json!({
            "functionName": "score_lead",
            "parameters": {"base": 5}
        }));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert_eq!(result.output["functionResult"]["score"], json!(15));
    }

    #[tokio::test]
    async fn test_unregistered_function_fails_softly() {
        let (handler, _) = setup();
        let node = Node::new("i1", NodeType::Integration, "custom_function")
            .with_config(json!({"functionName": "nope"}));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_external_service_reports_status_and_body() {
        let (handler, http) = setup();
        http.respond_with("https://svc.example.com/score", 200, json!({"score": 92}));
        let node = Node::new("i1", NodeType::Integration, "external_service").with_config(json!({
            "serviceName": "scoring",
            "action": "score_lead",
            "url": "https://svc.example.com/score"
        }));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.output["statusCode"], json!(200));
        assert_eq!(result.output["responseBody"], json!({"score": 92}));
    }

    #[tokio::test]
    async fn test_subflow_without_runner_fails_softly() {
        let (handler, _) = setup();
        let node = Node::new("i1", NodeType::Integration, "call_subflow")
            .with_config(json!({"subflowId": "wf-child"}));

        let result = handler.execute(&node, &mut ctx()).await.unwrap();
        assert!(!result.is_success());
    }
}
