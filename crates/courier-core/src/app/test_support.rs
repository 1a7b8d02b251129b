use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{
    EntryContext, ExecutionOutcome, ExecutorType, NewTask, Rating, Task, TaskStatus, TenantId,
};
use crate::impls::SqliteStore;
use crate::ports::{Clock, Executor, ExecutorError, FixedClock, IdGenerator, TaskStore};

use super::{Dispatcher, DispatcherBuilder};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
}

pub fn alice() -> TenantId {
    TenantId::new("alice").unwrap()
}

/// Executor that replays queued responses, then succeeds.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<Result<ExecutionOutcome, ExecutorError>>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn push(&self, response: Result<ExecutionOutcome, ExecutorError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn fail_times(&self, n: usize, error: &str) {
        for _ in 0..n {
            self.push(Err(ExecutorError::Failed(error.to_string())));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn invoke(&self, _context: &EntryContext) -> Result<ExecutionOutcome, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ExecutionOutcome::success("done")))
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub store: SqliteStore,
    pub clock: Arc<FixedClock>,
    pub agent: Arc<ScriptedExecutor>,
    pub tenant: TenantId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    /// `configure` sees a builder with store, clock and a scripted executor
    /// for both agent types already set.
    pub fn with(configure: impl FnOnce(DispatcherBuilder) -> DispatcherBuilder) -> Self {
        let store = SqliteStore::open_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(t0()));
        let agent = Arc::new(ScriptedExecutor::default());
        let builder = Dispatcher::builder()
            .store(store.clone())
            .clock(clock.clone())
            .register(ExecutorType::CodeAgent, agent.clone())
            .unwrap()
            .register(ExecutorType::ReasoningAgent, agent.clone())
            .unwrap();
        let dispatcher = configure(builder).build().unwrap();
        Self {
            dispatcher,
            store,
            clock,
            agent,
            tenant: alice(),
        }
    }

    pub async fn task(&self, title: &str, status: TaskStatus) -> Task {
        self.rated_task(title, 3, 3, status).await
    }

    pub async fn rated_task(
        &self,
        title: &str,
        urgency: u8,
        importance: u8,
        status: TaskStatus,
    ) -> Task {
        let new = NewTask::new(title)
            .with_ratings(Rating::new(urgency).unwrap(), Rating::new(importance).unwrap());
        let id = self.dispatcher.services.ids.task_id();
        self.store
            .create_task(&self.tenant, id, &new, status, self.clock.now())
            .await
            .unwrap()
    }

    pub async fn task_status(&self, task: &Task) -> TaskStatus {
        self.store
            .get_task(&self.tenant, task.id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}
