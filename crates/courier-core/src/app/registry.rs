use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::ExecutorType;
use crate::ports::Executor;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("an executor is already registered for {0}")]
    DuplicateExecutor(ExecutorType),

    #[error("{0} entries are completed by hand and take no executor")]
    NotAutomated(ExecutorType),
}

/// Executors by type.
///
/// Filled during start-up, read-only afterwards.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<ExecutorType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        executor_type: ExecutorType,
        executor: Arc<dyn Executor>,
    ) -> Result<(), RegistryError> {
        if !executor_type.is_automated() {
            return Err(RegistryError::NotAutomated(executor_type));
        }
        if self.executors.contains_key(&executor_type) {
            return Err(RegistryError::DuplicateExecutor(executor_type));
        }
        self.executors.insert(executor_type, executor);
        Ok(())
    }

    pub fn get(&self, executor_type: ExecutorType) -> Option<&Arc<dyn Executor>> {
        self.executors.get(&executor_type)
    }

    pub fn registered_types(&self) -> Vec<ExecutorType> {
        let mut types: Vec<_> = self.executors.keys().copied().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntryContext, ExecutionOutcome};
    use crate::ports::ExecutorError;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn invoke(&self, _context: &EntryContext) -> Result<ExecutionOutcome, ExecutorError> {
            Ok(ExecutionOutcome::success(""))
        }
    }

    #[test]
    fn rejects_duplicates_and_human() {
        let mut reg = ExecutorRegistry::new();
        reg.register(ExecutorType::CodeAgent, Arc::new(Noop)).unwrap();
        assert_eq!(
            reg.register(ExecutorType::CodeAgent, Arc::new(Noop)),
            Err(RegistryError::DuplicateExecutor(ExecutorType::CodeAgent))
        );
        assert_eq!(
            reg.register(ExecutorType::Human, Arc::new(Noop)),
            Err(RegistryError::NotAutomated(ExecutorType::Human))
        );
        assert_eq!(reg.len(), 1);
        assert!(reg.get(ExecutorType::CodeAgent).is_some());
        assert!(reg.get(ExecutorType::RemoteAgent).is_none());
    }
}
