use thiserror::Error;

/// Failures raised by [`crate::store::QuestTaskStore`].
///
/// Every variant is recoverable: the store checks its inputs before writing
/// anything, so a returned error always means the previous state is intact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A required field was empty or missing.
    #[error("{0}")]
    Validation(String),

    /// A quest with the same name (ignoring case) already exists.
    #[error("quest with this name already exists: {0}")]
    DuplicateName(String),

    #[error("quest not found: {0}")]
    QuestNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A snapshot could not be decoded or violates the data model.
    #[error("invalid snapshot: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
