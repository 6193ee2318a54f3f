/// Error type for cache operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("No cached value at '{0}'")]
    NotFound(String),

    #[error("Reserved key '{0}' cannot be used as an operation name")]
    ReservedKey(String),

    #[error("Operation '{operation}' requires argument field '{field}'")]
    MissingIdField { operation: String, field: String },

    #[error("Malformed entity event: {0}")]
    MalformedEvent(String),

    #[error("The root cache node has no parent and cannot be deleted")]
    RootDeletion,

    #[error("Invalid operation arguments: {0}")]
    InvalidArguments(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Reconciliation failed: {0}")]
    Reconcile(String),

    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

impl CacheError {
    /// Returns true for the expected, locally recovered cache-miss condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }

    /// Returns true for errors that indicate a programming mistake rather than
    /// a runtime condition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CacheError::ReservedKey(_)
                | CacheError::MissingIdField { .. }
                | CacheError::MalformedEvent(_)
                | CacheError::RootDeletion
                | CacheError::InvalidArguments(_)
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
