//! Request and response model
//!
//! An [`InboundRequest`] carries everything a resource needs to answer one
//! request, including the one-shot channel its response goes back on. The
//! peer holds the matching [`PendingResponse`]; dropping it abandons the
//! request.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use propnet_core::WatcherId;
use tokio::sync::{mpsc, oneshot};

use crate::format::{ContentFormat, MediaType};

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Response code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Content,
    Changed,
    Created,
    Deleted,
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    UnsupportedContentFormat,
    InternalServerError,
    NotImplemented,
    ServiceUnavailable,
}

impl Code {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Code::Content | Code::Changed | Code::Created | Code::Deleted
        )
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Code::Content => "2.05 Content",
            Code::Changed => "2.04 Changed",
            Code::Created => "2.01 Created",
            Code::Deleted => "2.02 Deleted",
            Code::BadRequest => "4.00 Bad Request",
            Code::Forbidden => "4.03 Forbidden",
            Code::NotFound => "4.04 Not Found",
            Code::MethodNotAllowed => "4.05 Method Not Allowed",
            Code::NotAcceptable => "4.06 Not Acceptable",
            Code::UnsupportedContentFormat => "4.15 Unsupported Content-Format",
            Code::InternalServerError => "5.00 Internal Server Error",
            Code::NotImplemented => "5.01 Not Implemented",
            Code::ServiceUnavailable => "5.03 Service Unavailable",
        };
        f.write_str(text)
    }
}

/// A response to an inbound request or an observe notification
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: Code,
    pub content_format: Option<ContentFormat>,
    /// Freshness hint
    pub max_age: Option<Duration>,
    /// Content fingerprint
    pub etag: Option<[u8; 8]>,
    pub payload: Bytes,
}

impl Response {
    /// A response with no body
    pub fn empty(code: Code) -> Self {
        Self {
            code,
            content_format: None,
            max_age: None,
            etag: None,
            payload: Bytes::new(),
        }
    }

    /// A response whose body is a diagnostic message
    pub fn message(code: Code, message: impl Into<String>) -> Self {
        Self {
            content_format: Some(ContentFormat::TextPlain),
            payload: Bytes::from(message.into()),
            ..Self::empty(code)
        }
    }

    pub fn content(format: ContentFormat, payload: Bytes) -> Self {
        Self {
            content_format: Some(format),
            payload,
            ..Self::empty(Code::Content)
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_etag(mut self, etag: [u8; 8]) -> Self {
        self.etag = Some(etag);
        self
    }

    /// The payload as UTF-8 text, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Observation control carried by a read
pub enum Observe {
    /// Start sending a notification for every change to `sink`
    Register {
        id: WatcherId,
        sink: mpsc::UnboundedSender<Response>,
    },
    /// Stop notifications for `id`
    Deregister { id: WatcherId },
}

impl fmt::Debug for Observe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observe::Register { id, .. } => f.debug_struct("Register").field("id", id).finish(),
            Observe::Deregister { id } => f.debug_struct("Deregister").field("id", id).finish(),
        }
    }
}

/// A request waiting to be answered
pub struct InboundRequest {
    method: Method,
    path: Vec<String>,
    trailing_slash: bool,
    queries: Vec<String>,
    accept: Option<MediaType>,
    content_format: Option<MediaType>,
    payload: Bytes,
    observe: Option<Observe>,
    responder: Option<oneshot::Sender<Response>>,
}

impl InboundRequest {
    /// Start building a request for `path` relative to the resource root
    pub fn builder(method: Method, path: &str) -> RequestBuilder {
        RequestBuilder::new(method, path)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Path segments relative to the resource handling the request
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn has_trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Value of the first `name=value` query
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.queries.iter().find_map(|query| {
            let (key, value) = query.split_once('=')?;
            (key == name).then_some(value)
        })
    }

    pub fn accept(&self) -> Option<&MediaType> {
        self.accept.as_ref()
    }

    pub fn content_format(&self) -> Option<&MediaType> {
        self.content_format.as_ref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn observe(&self) -> Option<&Observe> {
        self.observe.as_ref()
    }

    pub fn take_observe(&mut self) -> Option<Observe> {
        self.observe.take()
    }

    /// Drop the first `count` path segments
    ///
    /// Used when handing a request down to a child resource.
    pub fn strip_prefix(&mut self, count: usize) {
        let count = count.min(self.path.len());
        self.path.drain(..count);
    }

    /// Whether the peer is still waiting for a response
    pub fn is_live(&self) -> bool {
        self.responder
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Resolves once the peer stops waiting
    pub async fn closed(&mut self) {
        if let Some(tx) = self.responder.as_mut() {
            tx.closed().await;
        }
    }

    /// Send the response
    ///
    /// Returns `false` if the peer had already gone away or a response was
    /// already sent.
    pub fn respond(&mut self, response: Response) -> bool {
        match self.responder.take() {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("method", &self.method)
            .field("path", &self.path.join("/"))
            .field("trailing_slash", &self.trailing_slash)
            .field("queries", &self.queries)
            .field("accept", &self.accept)
            .field("content_format", &self.content_format)
            .field("payload_len", &self.payload.len())
            .field("observe", &self.observe)
            .finish()
    }
}

/// The peer's side of an [`InboundRequest`]
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    /// Wait for the response
    ///
    /// Returns `None` if the request was dropped without an answer.
    pub async fn recv(self) -> Option<Response> {
        self.rx.await.ok()
    }

    /// Take the response if it has already been sent
    pub fn try_recv(&mut self) -> Option<Response> {
        self.rx.try_recv().ok()
    }
}

/// Builder for [`InboundRequest`]
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    path: Vec<String>,
    trailing_slash: bool,
    queries: Vec<String>,
    accept: Option<MediaType>,
    content_format: Option<MediaType>,
    payload: Bytes,
    observe: Option<Observe>,
}

impl RequestBuilder {
    fn new(method: Method, path: &str) -> Self {
        let trimmed = path.trim_start_matches('/');
        let trailing_slash = !trimmed.is_empty() && trimmed.ends_with('/');
        let path = trimmed
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            method,
            path,
            trailing_slash,
            queries: Vec::new(),
            accept: None,
            content_format: None,
            payload: Bytes::new(),
            observe: None,
        }
    }

    /// Append one query token, `inc` or `d=0.5`
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.queries.push(query.into());
        self
    }

    /// Append every `&`-separated token of a raw query string
    pub fn query_string(mut self, raw: &str) -> Self {
        self.queries.extend(
            url::form_urlencoded::parse(raw.as_bytes()).map(|(key, value)| {
                if value.is_empty() && !raw_has_assignment(raw, &key) {
                    key.into_owned()
                } else {
                    format!("{key}={value}")
                }
            }),
        );
        self
    }

    pub fn accept(mut self, media: impl Into<MediaType>) -> Self {
        self.accept = Some(media.into());
        self
    }

    pub fn content_format(mut self, media: impl Into<MediaType>) -> Self {
        self.content_format = Some(media.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn observe(mut self, observe: Observe) -> Self {
        self.observe = Some(observe);
        self
    }

    pub fn build(self) -> (InboundRequest, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let request = InboundRequest {
            method: self.method,
            path: self.path,
            trailing_slash: self.trailing_slash,
            queries: self.queries,
            accept: self.accept,
            content_format: self.content_format,
            payload: self.payload,
            observe: self.observe,
            responder: Some(tx),
        };
        (request, PendingResponse { rx })
    }
}

/// Distinguish `?k=` from `?k` in a raw query string
fn raw_has_assignment(raw: &str, key: &str) -> bool {
    raw.split('&').any(|token| {
        token
            .split_once('=')
            .map(|(k, _)| k == key)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parsing() {
        let (request, _pending) = InboundRequest::builder(Method::Get, "/s/onof/v").build();
        assert_eq!(request.path(), ["s", "onof", "v"]);
        assert!(!request.has_trailing_slash());

        let (request, _pending) = InboundRequest::builder(Method::Get, "s/").build();
        assert_eq!(request.path(), ["s"]);
        assert!(request.has_trailing_slash());

        let (request, _pending) = InboundRequest::builder(Method::Get, "").build();
        assert!(request.path().is_empty());
        assert!(!request.has_trailing_slash());
    }

    #[test]
    fn test_query_string() {
        let (request, _pending) = InboundRequest::builder(Method::Post, "s/levl/v")
            .query_string("inc&d=0.5")
            .build();
        assert_eq!(request.queries(), ["inc", "d=0.5"]);
        assert_eq!(request.query_value("d"), Some("0.5"));
        assert_eq!(request.query_value("inc"), None);
    }

    #[tokio::test]
    async fn test_respond_once() {
        let (mut request, pending) = InboundRequest::builder(Method::Get, "s").build();
        assert!(request.is_live());
        assert!(request.respond(Response::empty(Code::Changed)));
        assert!(!request.respond(Response::empty(Code::Changed)));
        assert!(!request.is_live());

        let response = pending.recv().await.unwrap();
        assert_eq!(response.code, Code::Changed);
    }

    #[tokio::test]
    async fn test_abandoned_request() {
        let (mut request, pending) = InboundRequest::builder(Method::Get, "s").build();
        drop(pending);

        assert!(!request.is_live());
        request.closed().await;
        assert!(!request.respond(Response::empty(Code::Content)));
    }

    #[test]
    fn test_response_builders() {
        let response = Response::message(Code::BadRequest, "No payload");
        assert_eq!(response.text(), "No payload");
        assert!(!response.code.is_success());

        let response = Response::content(ContentFormat::Json, Bytes::from_static(b"1"))
            .with_max_age(Duration::from_secs(30))
            .with_etag([1; 8]);
        assert_eq!(response.max_age, Some(Duration::from_secs(30)));
        assert!(response.code.is_success());
    }
}
