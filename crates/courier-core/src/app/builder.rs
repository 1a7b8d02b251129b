//! DispatcherBuilder - wiring and start-up validation.
//!
//! `build()` fails fast: missing ports, executors listed in
//! `expect_executors()` but never registered, and unusable settings are all
//! reported before the first pass runs.

use std::sync::Arc;

use crate::domain::{ExecutorType, RetryDecider, RetryPolicy};
use crate::impls::PassthroughCipher;
use crate::ports::{
    AuditSink, Clock, Executor, FieldCipher, IdGenerator, QueueStore, StepJournal, SystemClock,
    TaskStore, UlidGenerator,
};

use super::dispatcher::Dispatcher;
use super::lifecycle::EntryLifecycle;
use super::registry::{ExecutorRegistry, RegistryError};
use super::resolver::DependencyResolver;
use super::services::{DispatchSettings, Services};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no {0} configured")]
    MissingPort(&'static str),

    #[error("missing executors: {0:?}. These executor types were expected but not registered.")]
    MissingExecutors(Vec<ExecutorType>),

    #[error("invalid dispatch settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct DispatcherBuilder {
    tasks: Option<Arc<dyn TaskStore>>,
    queue: Option<Arc<dyn QueueStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    journal: Option<Arc<dyn StepJournal>>,
    cipher: Arc<dyn FieldCipher>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    retry_policy: RetryPolicy,
    settings: DispatchSettings,
    registry: ExecutorRegistry,
    expected_executors: Option<Vec<ExecutorType>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            tasks: None,
            queue: None,
            audit: None,
            journal: None,
            cipher: Arc::new(PassthroughCipher),
            clock: Arc::new(SystemClock),
            ids: None,
            retry_policy: RetryPolicy::default(),
            settings: DispatchSettings::default(),
            registry: ExecutorRegistry::new(),
            expected_executors: None,
        }
    }

    /// Use one backend for tasks, queue, audit log and step journal.
    pub fn store<S>(mut self, store: S) -> Self
    where
        S: TaskStore + QueueStore + AuditSink + StepJournal + 'static,
    {
        let store = Arc::new(store);
        let tasks: Arc<dyn TaskStore> = store.clone();
        let queue: Arc<dyn QueueStore> = store.clone();
        let audit: Arc<dyn AuditSink> = store.clone();
        let journal: Arc<dyn StepJournal> = store;
        self.tasks = Some(tasks);
        self.queue = Some(queue);
        self.audit = Some(audit);
        self.journal = Some(journal);
        self
    }

    pub fn tasks(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn QueueStore>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn FieldCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn register(
        mut self,
        executor_type: ExecutorType,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(executor_type, executor)?;
        Ok(self)
    }

    /// Executor types that must be registered by the time `build()` runs.
    pub fn expect_executors(mut self, executor_types: &[ExecutorType]) -> Self {
        self.expected_executors = Some(executor_types.to_vec());
        self
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        if let Some(expected) = &self.expected_executors {
            let registered = self.registry.registered_types();
            let missing: Vec<ExecutorType> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingExecutors(missing));
            }
        }
        validate_settings(&self.settings)?;

        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let services = Services {
            tasks: self.tasks.ok_or(BuildError::MissingPort("task store"))?,
            queue: self.queue.ok_or(BuildError::MissingPort("queue store"))?,
            audit: self.audit.ok_or(BuildError::MissingPort("audit sink"))?,
            journal: self.journal.ok_or(BuildError::MissingPort("step journal"))?,
            cipher: self.cipher,
            clock,
            ids,
            decider: RetryDecider::new(self.retry_policy),
            settings: self.settings,
        };

        let resolver = DependencyResolver::new(services.clone());
        let lifecycle = EntryLifecycle::new(services.clone(), resolver.clone());
        Ok(Dispatcher {
            services,
            registry: self.registry,
            resolver,
            lifecycle,
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_settings(settings: &DispatchSettings) -> Result<(), BuildError> {
    if settings.max_retries == 0 {
        return Err(BuildError::InvalidSettings("max_retries must be at least 1".into()));
    }
    if settings.batch_size == 0 {
        return Err(BuildError::InvalidSettings("batch_size must be at least 1".into()));
    }
    if settings.claim_timeout.is_zero() || settings.executor_timeout.is_zero() {
        return Err(BuildError::InvalidSettings("timeouts must be non-zero".into()));
    }
    // the reaper must never fail an executor call still in progress
    if settings.executor_timeout >= settings.claim_timeout {
        return Err(BuildError::InvalidSettings(
            "executor_timeout must be shorter than claim_timeout".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::ScriptedExecutor;
    use crate::impls::SqliteStore;

    #[test]
    fn build_requires_a_store() {
        let err = DispatcherBuilder::new().build().err().unwrap();
        assert!(matches!(err, BuildError::MissingPort("task store")));
    }

    #[test]
    fn build_reports_missing_executors() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = DispatcherBuilder::new()
            .store(store)
            .register(ExecutorType::CodeAgent, Arc::new(ScriptedExecutor::default()))
            .unwrap()
            .expect_executors(&[ExecutorType::CodeAgent, ExecutorType::RemoteAgent])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingExecutors(missing)) if missing == vec![ExecutorType::RemoteAgent]
        ));
    }

    #[test]
    fn build_rejects_unusable_settings() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = DispatcherBuilder::new()
            .store(store)
            .settings(DispatchSettings {
                max_retries: 0,
                ..DispatchSettings::default()
            })
            .build();
        assert!(matches!(result, Err(BuildError::InvalidSettings(_))));
    }

    #[test]
    fn build_rejects_claims_shorter_than_executor_calls() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = DispatcherBuilder::new()
            .store(store)
            .settings(DispatchSettings {
                claim_timeout: std::time::Duration::from_secs(60),
                executor_timeout: std::time::Duration::from_secs(60),
                ..DispatchSettings::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(BuildError::InvalidSettings(msg)) if msg.contains("claim_timeout")
        ));
    }
}
