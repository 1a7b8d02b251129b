//! Executor types: the classes of worker a task can be routed to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The class of worker that handles a queue entry.
///
/// Each type has its own independent queue; priority ordering only holds
/// within one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorType {
    CodeAgent,
    ReasoningAgent,
    RemoteAgent,
    Human,
}

impl ExecutorType {
    pub const ALL: [ExecutorType; 4] = [
        ExecutorType::CodeAgent,
        ExecutorType::ReasoningAgent,
        ExecutorType::RemoteAgent,
        ExecutorType::Human,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorType::CodeAgent => "code-agent",
            ExecutorType::ReasoningAgent => "reasoning-agent",
            ExecutorType::RemoteAgent => "remote-agent",
            ExecutorType::Human => "human",
        }
    }

    /// Whether a dispatch pass invokes this executor automatically.
    /// Human entries wait for an operator to claim and complete them.
    pub fn is_automated(self) -> bool {
        !matches!(self, ExecutorType::Human)
    }
}

impl fmt::Display for ExecutorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown executor type '{0}'")]
pub struct UnknownExecutorType(pub String);

impl FromStr for ExecutorType {
    type Err = UnknownExecutorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        ExecutorType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| UnknownExecutorType(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_type_text_form_round_trips() {
        for t in ExecutorType::ALL {
            assert_eq!(t.as_str().parse::<ExecutorType>().unwrap(), t);
            assert_eq!(
                serde_json::to_string(&t).unwrap(),
                format!("\"{}\"", t.as_str())
            );
        }
        assert!("robot".parse::<ExecutorType>().is_err());
    }

    #[test]
    fn only_human_is_manual() {
        assert!(!ExecutorType::Human.is_automated());
        assert!(ExecutorType::CodeAgent.is_automated());
    }
}
