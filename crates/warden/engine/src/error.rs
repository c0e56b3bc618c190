use thiserror::Error;
use warden_crypto::CryptoError;
use warden_nonce::NonceError;
use warden_types::{EntityId, PackageId};

/// Errors surfaced by engine setup and helpers.
///
/// Pipeline aborts are not errors; see [`crate::AbortReason`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("nonce error: {0}")]
    Nonce(#[from] NonceError),

    #[error("package error: {0}")]
    Package(#[from] PackageError),

    #[error("tracing initialisation failed: {0}")]
    Telemetry(String),
}

/// Package acquisition and verification errors.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("package not found: {0}")]
    NotFound(PackageId),

    #[error("package {container} signatures invalid: {reason}")]
    SignaturesInvalid { container: PackageId, reason: String },

    #[error("package {0} content does not match its manifest hash")]
    ContentHashMismatch(PackageId),

    #[error("container {0} has not been loaded")]
    NotLoaded(PackageId),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("package store lock poisoned")]
    LockPoisoned,
}

/// Plugin emission and execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("no plugin registered for {0}")]
    UnknownPlugin(PackageId),

    #[error("package {package} is not part of container {container}")]
    WrongContainer {
        package: PackageId,
        container: PackageId,
    },

    #[error("invalid plugin configuration: {0}")]
    InvalidConfiguration(String),

    #[error("plugin execution failed: {0}")]
    Execution(String),

    #[error("plugin panicked")]
    Panicked,

    #[error("plugin registry lock poisoned")]
    LockPoisoned,
}

/// Outbound transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport rejected message for {0}")]
    Rejected(EntityId),

    #[error("transport lock poisoned")]
    LockPoisoned,
}

/// Access-rules provider errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("access rules unavailable: {0}")]
    Unavailable(String),

    #[error("access rules lock poisoned")]
    LockPoisoned,
}
