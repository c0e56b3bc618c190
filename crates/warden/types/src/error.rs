use thiserror::Error;

/// Errors raised while parsing identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),
}
