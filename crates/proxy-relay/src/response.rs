use std::convert::Infallible;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use url_authz::DenyReason;

/// Body type returned by every handler. Streaming bodies end early on
/// upstream failure instead of surfacing an error, so the error type is
/// [`Infallible`].
pub type ProxyBody = UnsyncBoxBody<Bytes, Infallible>;

pub fn empty_body() -> ProxyBody {
    Empty::new().boxed_unsync()
}

pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).boxed_unsync()
}

/// A plain-text response with the given status.
pub fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(message.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Map a refused admission onto its HTTP status.
pub fn deny_response(reason: DenyReason) -> Response<ProxyBody> {
    let status = match reason {
        DenyReason::BadRequest => StatusCode::BAD_REQUEST,
        DenyReason::NotFound => StatusCode::NOT_FOUND,
        DenyReason::Unauthorized => StatusCode::UNAUTHORIZED,
        DenyReason::Forbidden => StatusCode::FORBIDDEN,
    };
    text_response(status, &reason.to_string())
}

/// The response for any upstream connect or pre-header failure.
pub fn bad_gateway() -> Response<ProxyBody> {
    text_response(StatusCode::BAD_GATEWAY, "upstream request failed")
}
