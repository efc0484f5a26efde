//! Error types for propnet-core

use thiserror::Error;

use crate::key::ValueType;

/// Result type for property operations
pub type Result<T> = std::result::Result<T, PropertyError>;

/// Errors that can occur while reading or mutating properties
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    /// The property does not exist on this endpoint
    #[error("Property not found: {0}")]
    NotFound(String),

    /// The property exists but cannot be written
    #[error("Property is read-only: {0}")]
    ReadOnly(String),

    /// The value failed validation
    #[error("Invalid property value: {0}")]
    InvalidValue(String),

    /// The value could not be coerced to the property's type
    #[error("Type mismatch for {key}: expected {expected}")]
    TypeMismatch { key: String, expected: ValueType },

    /// The operation is not supported by this property or link
    #[error("Operation unsupported: {0}")]
    Unsupported(String),

    /// The operation was interrupted before it completed
    #[error("Operation interrupted")]
    Interrupted,

    /// Unexpected fault in the underlying technology
    #[error("Technology error: {0}")]
    Technology(String),
}

impl PropertyError {
    /// Whether this error reports a rejected value rather than a fault
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            PropertyError::ReadOnly(_)
                | PropertyError::InvalidValue(_)
                | PropertyError::TypeMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for PropertyError {
    fn from(err: serde_json::Error) -> Self {
        PropertyError::InvalidValue(err.to_string())
    }
}
