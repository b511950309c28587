//! HTTP client for the gateway's execute endpoint.

use async_trait::async_trait;
use serde_json::Value;

use crate::coordinator::{ExecError, ExecuteBackend, ExecutionRequest};

/// Client for `POST /api/v1/agents/{agent_id}/execute`.
///
/// The event stream is orthogonal: this client only covers the direct
/// request/response boundary.
pub struct ExecApi {
    http: reqwest::Client,
    base_url: String,
}

impl ExecApi {
    /// Create a client against the given gateway base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn execute_url(&self, agent_id: &str) -> String {
        format!("{}/api/v1/agents/{agent_id}/execute", self.base_url)
    }
}

#[async_trait]
impl ExecuteBackend for ExecApi {
    async fn execute(&self, request: &ExecutionRequest) -> Result<Value, ExecError> {
        let body = serde_json::json!({
            "goal": request.goal,
            "parameters": request.parameters,
        });

        let response = self
            .http
            .post(self.execute_url(&request.agent_id))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<Value>()
                .await
                .map_err(|e| ExecError::InvalidResponse(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            let message = error_detail(&body).unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    trimmed.to_string()
                }
            });
            Err(ExecError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Pull a human-readable cause out of an error body.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
