//! FieldCipher port - field-level decryption of task content.
//!
//! Used only when snapshotting an entry context. The queue treats stored
//! task fields as opaque.

use thiserror::Error;

use crate::domain::{DispatchError, TenantId};

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("no encryption key for tenant {0}")]
    MissingKey(String),

    #[error("cannot decrypt field '{field}': {reason}")]
    Corrupt { field: &'static str, reason: String },
}

impl From<CipherError> for DispatchError {
    fn from(value: CipherError) -> Self {
        match value {
            CipherError::MissingKey(_) => DispatchError::Configuration(value.to_string()),
            CipherError::Corrupt { .. } => DispatchError::InvalidInput(value.to_string()),
        }
    }
}

pub trait FieldCipher: Send + Sync {
    fn decrypt(
        &self,
        tenant: &TenantId,
        field: &'static str,
        stored: &str,
    ) -> Result<String, CipherError>;
}
