//! Mapping between HTTP messages and the resource request model

use propnet_resource::{Code, ContentFormat, MediaType, Method, Response};
use warp::http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, ETAG};
use warp::http::StatusCode;

/// Resource method for an HTTP method
pub fn method_from_http(method: &warp::http::Method) -> Option<Method> {
    match *method {
        warp::http::Method::GET => Some(Method::Get),
        warp::http::Method::POST => Some(Method::Post),
        warp::http::Method::PUT => Some(Method::Put),
        warp::http::Method::DELETE => Some(Method::Delete),
        _ => None,
    }
}

/// HTTP status for a response code
pub fn status_for_code(code: Code) -> StatusCode {
    match code {
        Code::Content => StatusCode::OK,
        Code::Changed | Code::Deleted => StatusCode::NO_CONTENT,
        Code::Created => StatusCode::CREATED,
        Code::BadRequest => StatusCode::BAD_REQUEST,
        Code::Forbidden => StatusCode::FORBIDDEN,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        Code::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
        Code::UnsupportedContentFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Code::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        Code::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        Code::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Read an `Accept` header
///
/// Entries are taken in order and quality values are ignored. Wildcards mean
/// no preference. If only unsupported types are named the first one is kept
/// so the request can be refused as "not acceptable".
pub fn parse_accept(header: &str) -> Option<MediaType> {
    let mut unknown = None;

    for entry in header.split(',') {
        let essence = entry.split(';').next().unwrap_or_default().trim();
        if essence.is_empty() || essence == "*/*" || essence.ends_with("/*") {
            continue;
        }
        match ContentFormat::from_mime(essence) {
            Some(format) => return Some(MediaType::Known(format)),
            None => {
                unknown.get_or_insert_with(|| MediaType::Unknown(essence.to_string()));
            }
        }
    }

    unknown
}

/// Build the HTTP reply for a resource response
pub fn to_reply(response: Response) -> warp::reply::Response {
    let status = status_for_code(response.code);
    let body = if status == StatusCode::NO_CONTENT {
        warp::hyper::Body::empty()
    } else {
        warp::hyper::Body::from(response.payload)
    };

    let mut reply = warp::reply::Response::new(body);
    *reply.status_mut() = status;

    let headers = reply.headers_mut();
    if let Some(format) = response.content_format {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.mime()));
    }
    if let Some(max_age) = response.max_age {
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", max_age.as_secs())) {
            headers.insert(CACHE_CONTROL, value);
        }
    }
    if let Some(etag) = response.etag {
        let hex: String = etag.iter().map(|b| format!("{b:02x}")).collect();
        if let Ok(value) = HeaderValue::from_str(&format!("\"{hex}\"")) {
            headers.insert(ETAG, value);
        }
    }

    reply
}

/// A reply carrying only a status and a short message
pub fn status_reply(code: Code, message: &str) -> warp::reply::Response {
    to_reply(Response::message(code, message))
}
