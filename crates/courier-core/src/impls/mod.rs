//! Impls - production implementations of the ports.
//!
//! - **SqliteStore**: tasks, queue, audit log and step journal in one SQLite file
//! - **HttpExecutor**: remote executor over JSON/HTTP
//! - **PassthroughCipher**: no-op field cipher for plaintext stores

pub mod cipher;
pub mod http_executor;
pub mod sqlite;

pub use self::cipher::PassthroughCipher;
pub use self::http_executor::HttpExecutor;
pub use self::sqlite::SqliteStore;
