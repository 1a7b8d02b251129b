//! Executor port - the worker that actually performs a task.
//!
//! Called once per claimed entry. The engine guarantees at most one concurrent
//! claim, not exactly-once delivery, so implementations must tolerate being
//! invoked again for the same task after a failure or crash.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{EntryContext, EntryResult, ExecutionOutcome};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor failed: {0}")]
    Failed(String),

    #[error("executor timed out after {0:?}")]
    Timeout(Duration),

    #[error("executor misconfigured: {0}")]
    Configuration(String),
}

impl ExecutorError {
    pub fn into_result(self) -> EntryResult {
        match self {
            ExecutorError::Configuration(_) => EntryResult::misconfigured(self.to_string()),
            ExecutorError::Failed(_) | ExecutorError::Timeout(_) => {
                EntryResult::failed(self.to_string())
            }
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn invoke(&self, context: &EntryContext) -> Result<ExecutionOutcome, ExecutorError>;
}
