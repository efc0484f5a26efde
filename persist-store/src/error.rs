use thiserror::Error;

/// Errors that can occur in the persistent state store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No child is managed under the given id
    #[error("No state is managed under id \"{0}\"")]
    NotManaged(String),

    /// Internal lock was poisoned by a panicking writer
    #[error("Internal lock poisoned")]
    LockPoisoned,
}

/// Result type for persistent store operations
pub type Result<T> = std::result::Result<T, StoreError>;
