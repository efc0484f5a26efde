use persist_store::StoreError;
use propnet_core::PropertyError;
use thiserror::Error;

/// Errors that can occur while managing pairings
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PairingError {
    /// A creation argument was rejected; the pairing was rolled back
    #[error("Bad value for \"{param}\": {message}")]
    InvalidArguments { param: String, message: String },

    /// Creation was interrupted; the pairing was rolled back
    #[error("Pairing configuration interrupted")]
    Interrupted,

    /// Error from a pairing's properties
    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    /// Error from the persistent state store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for pairing operations
pub type Result<T> = std::result::Result<T, PairingError>;
