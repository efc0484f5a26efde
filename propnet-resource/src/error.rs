//! Resource errors and their mapping onto response codes

use propnet_core::PropertyError;
use propnet_pairing::PairingError;
use thiserror::Error;

use crate::message::{Code, Response};

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Failures local to one request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("No payload")]
    NoPayload,

    #[error("Unsupported content format: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Decode(String),

    #[error("Unable to encode response: {0}")]
    Encode(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Not acceptable")]
    NotAcceptable,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Pairing(#[from] PairingError),
}

/// The one mapping from errors to response codes
///
/// Property errors keep their message so the peer can see why a write was
/// refused. Unexpected faults only surface their summary.
pub fn status_for_error(error: &ResourceError) -> (Code, Option<String>) {
    match error {
        ResourceError::NoPayload | ResourceError::Decode(_) | ResourceError::BadRequest(_) => {
            (Code::BadRequest, Some(error.to_string()))
        }
        ResourceError::UnsupportedFormat(_) => (Code::UnsupportedContentFormat, None),
        ResourceError::Encode(_) => (Code::InternalServerError, Some(error.to_string())),
        ResourceError::NotAcceptable => (Code::NotAcceptable, None),
        ResourceError::MethodNotAllowed => (Code::MethodNotAllowed, None),
        ResourceError::NotFound => (Code::NotFound, None),
        ResourceError::Property(error) => status_for_property_error(error),
        ResourceError::Pairing(error) => match error {
            PairingError::InvalidArguments { .. } => (Code::BadRequest, Some(error.to_string())),
            PairingError::Interrupted => (Code::ServiceUnavailable, None),
            PairingError::Property(error) => status_for_property_error(error),
            PairingError::Store(_) => (Code::InternalServerError, Some(error.to_string())),
        },
    }
}

fn status_for_property_error(error: &PropertyError) -> (Code, Option<String>) {
    match error {
        PropertyError::NotFound(_) => (Code::NotFound, None),
        PropertyError::ReadOnly(_)
        | PropertyError::InvalidValue(_)
        | PropertyError::TypeMismatch { .. } => (Code::Forbidden, Some(error.to_string())),
        PropertyError::Unsupported(_) => (Code::NotImplemented, Some(error.to_string())),
        PropertyError::Interrupted => (Code::ServiceUnavailable, None),
        PropertyError::Technology(_) => (Code::InternalServerError, Some(error.to_string())),
    }
}

impl ResourceError {
    /// Whether the failure came from an interrupted wait
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            ResourceError::Property(PropertyError::Interrupted)
                | ResourceError::Pairing(PairingError::Interrupted)
                | ResourceError::Pairing(PairingError::Property(PropertyError::Interrupted))
        )
    }

    pub fn to_response(&self) -> Response {
        match status_for_error(self) {
            (code, Some(message)) => Response::message(code, message),
            (code, None) => Response::empty(code),
        }
    }
}
