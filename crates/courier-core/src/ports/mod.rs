//! Ports - the seams between the dispatch engine and the outside world.
//!
//! Each trait is implemented once for production (`impls`) and swapped in tests
//! where determinism matters (`FixedClock`, scripted executors).

pub mod audit_sink;
pub mod cipher;
pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod journal;
pub mod queue_store;
pub mod task_store;

pub use self::audit_sink::AuditSink;
pub use self::cipher::{CipherError, FieldCipher};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{Executor, ExecutorError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::journal::{PendingApply, Step, StepJournal};
pub use self::queue_store::{DepthRow, FailedAttempt, QueueStore, ResetFilter};
pub use self::task_store::TaskStore;
