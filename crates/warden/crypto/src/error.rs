use thiserror::Error;
use warden_types::EntityId;

/// Errors from signing, verification and encryption.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no key material for identity: {0}")]
    UnknownIdentity(EntityId),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("object is not signed")]
    NotSigned,

    #[error("signature chain is empty")]
    EmptyChain,

    #[error("key wrapping failed: {0}")]
    KeyWrap(String),

    #[error("invalid symmetric key length")]
    InvalidKey,

    #[error("ciphertext is malformed")]
    MalformedCiphertext,

    #[error("authenticated decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("message type mismatch: expected {expected}, found {found}")]
    MessageTypeMismatch { expected: String, found: String },

    #[error("lock poisoned")]
    LockPoisoned,
}
