//! HttpExecutor - remote executor reached over JSON/HTTP.
//!
//! POSTs the entry context to the endpoint and expects
//! `{"success": bool, "output": string}` back.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use crate::domain::{EntryContext, ExecutionOutcome};
use crate::ports::{Executor, ExecutorError};

const BODY_PREVIEW_LIMIT: usize = 512;

pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpExecutor {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExecutorError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(ExecutorError::Configuration("executor endpoint is empty".into()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ExecutorError::Configuration(format!(
                "executor endpoint must be http(s): {endpoint}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn invoke(&self, context: &EntryContext) -> Result<ExecutionOutcome, ExecutorError> {
        let mut request = self.client.post(&self.endpoint).json(context);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Failed(format!("request to {} timed out", self.endpoint))
            } else {
                ExecutorError::Failed(format!("request to {} failed: {e}", self.endpoint))
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutorError::Failed(format!("reading response body: {e}")))?;

        tracing::debug!(
            endpoint = %self.endpoint,
            task_id = %context.task_id,
            status = status.as_u16(),
            "executor responded"
        );
        interpret(status, &body)
    }
}

fn interpret(status: StatusCode, body: &str) -> Result<ExecutionOutcome, ExecutorError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ExecutorError::Configuration(format!(
            "endpoint rejected credentials (status {}): {}",
            status.as_u16(),
            preview_body(body)
        )));
    }
    if !status.is_success() {
        return Err(ExecutorError::Failed(format!(
            "status {}: {}",
            status.as_u16(),
            preview_body(body)
        )));
    }
    serde_json::from_str(body).map_err(|e| {
        ExecutorError::Failed(format!(
            "failed to decode response body: {e} | body={}",
            preview_body(body)
        ))
    })
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().count() > BODY_PREVIEW_LIMIT {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_body_is_decoded() {
        let outcome = interpret(StatusCode::OK, r#"{"success":true,"output":"done"}"#).unwrap();
        assert_eq!(outcome, ExecutionOutcome::success("done"));
    }

    #[test]
    fn auth_failures_are_configuration_errors() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = interpret(status, "nope").unwrap_err();
            assert!(matches!(err, ExecutorError::Configuration(_)));
        }
    }

    #[test]
    fn other_failures_consume_a_retry() {
        let err = interpret(StatusCode::BAD_GATEWAY, "").unwrap_err();
        match err {
            ExecutorError::Failed(msg) => assert!(msg.contains("502") && msg.contains("<empty body>")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            interpret(StatusCode::OK, "not json").unwrap_err(),
            ExecutorError::Failed(_)
        ));
    }

    #[test]
    fn endpoint_must_be_http() {
        assert!(matches!(
            HttpExecutor::new("", None, Duration::from_secs(1)),
            Err(ExecutorError::Configuration(_))
        ));
        assert!(HttpExecutor::new("ftp://x", None, Duration::from_secs(1)).is_err());
        assert!(HttpExecutor::new("https://agents.local/run", None, Duration::from_secs(1)).is_ok());
    }
}
