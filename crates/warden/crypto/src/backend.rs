use warden_types::EntityId;

use crate::error::CryptoError;

/// Key-management and signing backend, keyed by entity identity.
///
/// The engine never touches private keys itself; everything that needs one
/// goes through this boundary. [`crate::InMemoryKeyring`] is the reference
/// implementation used for tests and single-process deployments.
pub trait CryptoBackend: Send + Sync {
    /// Sign a digest as `identity`.
    fn sign(&self, identity: &EntityId, digest: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Check a signature made by `identity` over `digest`.
    fn verify(
        &self,
        identity: &EntityId,
        signature: &[u8],
        digest: &[u8],
    ) -> Result<bool, CryptoError>;

    /// Wrap a symmetric key so only `identity` can recover it.
    fn wrap_key(&self, identity: &EntityId, key: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Recover a symmetric key wrapped for `identity`.
    fn unwrap_key(&self, identity: &EntityId, wrapped: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Asymmetric encryption to `identity`.
    fn encrypt(&self, identity: &EntityId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Asymmetric decryption as `identity`.
    fn decrypt(&self, identity: &EntityId, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}
