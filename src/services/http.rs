//! Outbound HTTP seam for webhook and API-call nodes.
//!
//! The engine never speaks HTTP itself; integration handlers build an
//! [`HttpRequest`] and hand it to whatever [`HttpExecutor`] is wired in.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthScheme {
    #[default]
    None,
    Basic,
    Bearer,
    ApiKey,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub auth: AuthScheme,
    #[serde(default)]
    pub auth_config: Value,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            body: None,
            auth: AuthScheme::None,
            auth_config: Value::Null,
        }
    }

    /// Materialize the auth scheme as request headers.
    pub fn apply_auth(&mut self) {
        match self.auth {
            AuthScheme::None => {}
            // Real executors must base64-encode the credential pair.
            AuthScheme::Basic => {
                if let (Some(user), Some(pass)) = (
                    self.auth_config.get("username").and_then(Value::as_str),
                    self.auth_config.get("password").and_then(Value::as_str),
                ) {
                    self.headers
                        .insert("Authorization".into(), format!("Basic {user}:{pass}"));
                }
            }
            AuthScheme::Bearer => {
                if let Some(token) = self.auth_config.get("token").and_then(Value::as_str) {
                    self.headers
                        .insert("Authorization".into(), format!("Bearer {token}"));
                }
            }
            AuthScheme::ApiKey => {
                let header = self
                    .auth_config
                    .get("headerName")
                    .and_then(Value::as_str)
                    .unwrap_or("X-API-Key");
                if let Some(key) = self.auth_config.get("apiKey").and_then(Value::as_str) {
                    self.headers.insert(header.to_string(), key.to_string());
                }
            }
            AuthScheme::Custom => {
                if let Some(headers) = self.auth_config.get("headers").and_then(Value::as_object) {
                    for (name, value) in headers {
                        if let Some(value) = value.as_str() {
                            self.headers.insert(name.clone(), value.to_string());
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, NodeError>;
}

/// Canned-response executor for tests and offline runs. Unmatched URLs get
/// a 404.
#[derive(Default)]
pub struct StubHttpExecutor {
    responses: RwLock<HashMap<String, HttpResponse>>,
    requests: RwLock<Vec<HttpRequest>>,
}

impl StubHttpExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, url: &str, status_code: u16, body: Value) {
        self.responses
            .write()
            .insert(url.to_string(), HttpResponse { status_code, body });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.read().clone()
    }
}

#[async_trait]
impl HttpExecutor for StubHttpExecutor {
    async fn request(&self, mut request: HttpRequest) -> Result<HttpResponse, NodeError> {
        request.apply_auth();
        let response = self
            .responses
            .read()
            .get(&request.url)
            .cloned()
            .unwrap_or(HttpResponse {
                status_code: 404,
                body: Value::Null,
            });
        self.requests.write().push(request);
        Ok(response)
    }
}
