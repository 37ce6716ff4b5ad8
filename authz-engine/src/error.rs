use authz_schema::SchemaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthzError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Role {role} doesn't exist in {namespace}")]
    RoleNamespaceMismatch { role: String, namespace: String },

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Metadata value for {key} is not a string")]
    InvalidMetadata { key: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Authorization engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Authorization engine error: {0}")]
    Engine(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Relation store and engine disagree: {0}")]
    Inconsistent(String),

    #[error("Maximum recursion depth exceeded")]
    MaxDepthExceeded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification callers map onto their own transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Unavailable,
    Internal,
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_)
            | Self::RoleNamespaceMismatch { .. }
            | Self::InvalidRelation(_)
            | Self::InvalidMetadata { .. } => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::EngineUnavailable(_) | Self::Timeout(_) => ErrorKind::Unavailable,
            Self::Engine(_)
            | Self::Storage(_)
            | Self::Migration(_)
            | Self::Inconsistent(_)
            | Self::MaxDepthExceeded
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<config::ConfigError> for AuthzError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<sqlx::Error> for AuthzError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::Timeout("database connection".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthzError>;
