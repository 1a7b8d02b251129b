//! Domain model (ids, tasks, queue entries, dependencies, decisions, audit).

pub mod audit;
pub mod decision;
pub mod dependency;
pub mod entry;
pub mod errors;
pub mod executor;
pub mod ids;
pub mod outcome;
pub mod task;

pub use audit::{DispatchAction, DispatchLogEntry};
pub use decision::{Decision, RetryDecider, RetryPolicy};
pub use dependency::{DependencyGraph, DependencyKind, TaskDependency};
pub use entry::{EntryContext, EntryStatus, NewEntry, Priority, QueueEntry};
pub use errors::{DispatchError, ErrorKind, StoreError};
pub use executor::{ExecutorType, UnknownExecutorType};
pub use ids::{EntryId, InvalidTenant, ParseIdError, TaskId, TenantId};
pub use outcome::{EntryResult, ExecutionOutcome, FailureKind};
pub use task::{NewTask, Rating, Task, TaskField, TaskPatch, TaskPatchBuilder, TaskStatus};
