use crate::domain::TenantId;
use crate::ports::{CipherError, FieldCipher};

/// Cipher for stores that keep task fields in plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl FieldCipher for PassthroughCipher {
    fn decrypt(
        &self,
        _tenant: &TenantId,
        _field: &'static str,
        stored: &str,
    ) -> Result<String, CipherError> {
        Ok(stored.to_string())
    }
}
