//! courier-core
//!
//! Task execution queue and dispatch engine.
//!
//! # Modules
//! - **domain**: tasks, queue entries, dependencies, retry decisions, audit records, errors
//! - **router**: title-prefix routing to executor types
//! - **ports**: TaskStore, QueueStore, Executor, AuditSink, StepJournal, Clock, ...
//! - **app**: Dispatcher and its builder, resolver, reaper, planner, maintenance, status
//! - **impls**: SqliteStore, HttpExecutor, PassthroughCipher
//! - **config**: `courier.toml`

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod router;

pub use app::{Dispatcher, DispatcherBuilder, PassReport};
pub use config::{ConfigError, CourierConfig};
pub use domain::{DispatchError, ErrorKind};
