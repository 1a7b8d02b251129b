//! Outcome model: what an executor reported and how the engine reads it.

use serde::{Deserialize, Serialize};

/// Raw response of an executor call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: String,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }

    /// Classify the response. A "successful" call whose text says the work was
    /// not done counts as an executor failure.
    pub fn into_result(self) -> EntryResult {
        if !self.success {
            return EntryResult::failed(self.output);
        }
        match failure_indicator(&self.output) {
            Some(marker) => EntryResult::failed(format!(
                "executor output indicates non-completion ({marker}): {}",
                truncate(&self.output, 400)
            )),
            None => EntryResult::Success {
                output: self.output,
            },
        }
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Agent error, timeout, or non-completion; consumes a retry.
    Executor,
    /// Missing endpoint, credential or key; retrying cannot help.
    Configuration,
}

/// Result reported for an in-flight entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryResult {
    Success { output: String },
    Failure { error: String, kind: FailureKind },
}

impl EntryResult {
    pub fn success(output: impl Into<String>) -> Self {
        EntryResult::Success {
            output: output.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        EntryResult::Failure {
            error: error.into(),
            kind: FailureKind::Executor,
        }
    }

    pub fn misconfigured(error: impl Into<String>) -> Self {
        EntryResult::Failure {
            error: error.into(),
            kind: FailureKind::Configuration,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EntryResult::Success { .. })
    }
}

const FAILURE_MARKERS: &[&str] = &[
    "unable to complete",
    "i cannot complete",
    "i can't complete",
    "i was unable to",
    "could not complete the task",
    "task failed",
    "blocked:",
    "[blocked]",
    "needs human input",
];

/// First non-completion marker found in `output`, if any.
pub fn failure_indicator(output: &str) -> Option<&'static str> {
    let lower = output.to_ascii_lowercase();
    FAILURE_MARKERS
        .iter()
        .copied()
        .find(|marker| lower.contains(marker))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
