//! App - dispatch engine built on the ports.
//!
//! # Components
//! - **Dispatcher**: bounded dispatch passes (reap, resume, enqueue, claim, invoke, apply)
//! - **DispatcherBuilder**: wiring with fail-fast validation
//! - **ExecutorRegistry**: executors by type
//! - **EntryLifecycle**: claim / complete / fail / cancel transitions
//! - **DependencyResolver**: fan-in release of blocked tasks
//! - **Reaper**: claim expiry
//! - **Maintenance**: quarantine reset and garbage collection
//! - **Planner**: plan submission
//! - **QueueStatus**: depth and audit views

pub mod builder;
pub mod dispatcher;
pub mod lifecycle;
pub mod maintenance;
pub mod planner;
pub mod reaper;
pub mod registry;
pub mod resolver;
pub mod services;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::dispatcher::{Dispatcher, EnqueueReport, PassReport};
pub use self::lifecycle::{Applied, EntryLifecycle};
pub use self::maintenance::{DEFAULT_RETENTION_DAYS, Maintenance};
pub use self::planner::{PlanReport, PlannedTask, Planner};
pub use self::reaper::{CLAIM_EXPIRED, Reaper};
pub use self::registry::{ExecutorRegistry, RegistryError};
pub use self::resolver::{DependencyResolver, Resolution};
pub use self::services::DispatchSettings;
pub use self::status::QueueStatus;
