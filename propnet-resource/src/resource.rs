//! The resource contract and the single completion path every request ends on

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::decode_value;
use crate::error::{status_for_error, ResourceError, Result};
use crate::format::ContentFormat;
use crate::message::{Code, InboundRequest, Response};
use serde_json::Value;

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A response was sent
    Responded,
    /// The peer went away before a response could be sent
    Abandoned,
    /// The awaited operation was interrupted; "service unavailable" was sent
    ///
    /// Callers that own the surrounding task should treat this as a
    /// cancellation rather than a success.
    Interrupted,
}

/// Something that answers inbound requests
#[async_trait]
pub trait Resource: Send + Sync {
    async fn handle(&self, request: InboundRequest) -> Completion;
}

/// Run a request on `runtime`, returning a handle to its completion
pub fn spawn_request(
    resource: Arc<dyn Resource>,
    request: InboundRequest,
    runtime: &Handle,
) -> JoinHandle<Completion> {
    runtime.spawn(async move { resource.handle(request).await })
}

/// Await `operation` unless the peer stops waiting first
pub(crate) async fn await_live<T, F>(request: &mut InboundRequest, operation: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        result = operation => Some(result),
        _ = request.closed() => None,
    }
}

/// Send the response for `result`, or note that nobody is listening
pub(crate) fn finish(mut request: InboundRequest, result: Result<Response>) -> Completion {
    if !request.is_live() {
        debug!(method = %request.method(), path = %request.path().join("/"), "Request abandoned before completion");
        return Completion::Abandoned;
    }

    match result {
        Ok(response) => {
            debug!(code = %response.code, "Responding");
            request.respond(response);
            Completion::Responded
        }
        Err(error) => {
            let (code, _) = status_for_error(&error);
            if code == Code::InternalServerError {
                warn!(method = %request.method(), path = %request.path().join("/"), "Request failed: {}", error);
            } else {
                debug!(code = %code, "Request refused: {}", error);
            }
            request.respond(error.to_response());
            if error.is_interrupted() {
                Completion::Interrupted
            } else {
                Completion::Responded
            }
        }
    }
}

/// Await `operation` and finish the request with its outcome
pub(crate) async fn complete<F>(mut request: InboundRequest, operation: F) -> Completion
where
    F: Future<Output = Result<Response>>,
{
    match await_live(&mut request, operation).await {
        Some(result) => finish(request, result),
        None => {
            debug!(path = %request.path().join("/"), "Request abandoned while pending");
            Completion::Abandoned
        }
    }
}

/// Parse a body that must be present
pub(crate) fn required_body(request: &InboundRequest) -> Result<Value> {
    optional_body(request)?.ok_or(ResourceError::NoPayload)
}

/// Parse a body that may be absent
///
/// Bodies without a declared format are read as plain text.
pub(crate) fn optional_body(request: &InboundRequest) -> Result<Option<Value>> {
    if request.payload().is_empty() {
        return Ok(None);
    }

    let format = match request.content_format() {
        None => ContentFormat::TextPlain,
        Some(media) => media
            .format()
            .ok_or_else(|| ResourceError::UnsupportedFormat(media.to_string()))?,
    };

    decode_value(request.payload(), format).map(Some)
}
