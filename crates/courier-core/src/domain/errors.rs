//! Errors and their operational classification.

use thiserror::Error;

use super::entry::EntryStatus;
use super::ids::{EntryId, TaskId};

/// Operational class of an error.
///
/// - `Conflict`: claim race lost or duplicate active entry; recovered locally
/// - `Executor`: the agent call failed; retried up to the budget
/// - `Configuration`: missing endpoint or key; fatal for the entry, never retried
/// - `DependencyIntegrity`: an edge points at a task that does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    Executor,
    Configuration,
    DependencyIntegrity,
    InvalidInput,
    NotFound,
    Infrastructure,
}

/// Storage-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("store connection poisoned")]
    Poisoned,

    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Engine error returned by dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("task {task} already has an active queue entry {entry}")]
    DuplicateActiveEntry { task: TaskId, entry: EntryId },

    #[error("entry {entry} is {actual}, expected one of {expected:?}")]
    InvalidTransition {
        entry: EntryId,
        actual: EntryStatus,
        expected: &'static [EntryStatus],
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("executor failure: {0}")]
    Executor(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task {task} depends on missing task {depends_on}")]
    DependencyIntegrity { task: String, depends_on: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Conflict(_)
            | DispatchError::DuplicateActiveEntry { .. }
            | DispatchError::InvalidTransition { .. } => ErrorKind::Conflict,
            DispatchError::NotFound(_) => ErrorKind::NotFound,
            DispatchError::Executor(_) => ErrorKind::Executor,
            DispatchError::Configuration(_) => ErrorKind::Configuration,
            DispatchError::DependencyIntegrity { .. } => ErrorKind::DependencyIntegrity,
            DispatchError::InvalidInput(_) => ErrorKind::InvalidInput,
            DispatchError::Store(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<rusqlite::Error> for DispatchError {
    fn from(value: rusqlite::Error) -> Self {
        DispatchError::Store(StoreError::Sql(value))
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(value: serde_json::Error) -> Self {
        DispatchError::Store(StoreError::Json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        let dup = DispatchError::DuplicateActiveEntry {
            task: TaskId::generate(),
            entry: EntryId::generate(),
        };
        assert!(dup.is_conflict());
        assert_eq!(
            DispatchError::Configuration("no endpoint".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            DispatchError::Store(StoreError::Poisoned).kind(),
            ErrorKind::Infrastructure
        );
    }
}
