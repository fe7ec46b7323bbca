//! Relay handlers: given an admitted target URL, carry the request to it.
//!
//! [`handle_http`] streams an HTTP(S) exchange through to the target;
//! [`handle_ws`] completes the caller's WebSocket upgrade and pumps frames
//! both ways. Admission itself lives in `url-authz`; this crate only maps
//! its decisions onto wire behavior.

mod hooks;
mod http_relay;
mod response;
mod ws_relay;

pub use hooks::{
    target_from_query, upstream_query, DefaultHooks, RelayHooks, AUTH_SIG_PARAM, TARGET_PARAM,
};
pub use http_relay::handle_http;
pub use response::{deny_response, empty_body, full_body, text_response, ProxyBody};
pub use ws_relay::handle_ws;

use std::net::IpAddr;

use http::header::{HeaderMap, HeaderName};

/// Per-request facts the host hands the relay handlers.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    /// Address of the caller, appended to `X-Forwarded-For`.
    pub peer_ip: IpAddr,
    /// Scheme the caller reached us over, for `X-Forwarded-Proto`.
    pub scheme: &'static str,
    /// Whether the host authenticated the caller.
    pub authenticated: bool,
}

/// Whether the request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    header_has_token(headers, http::header::CONNECTION, "upgrade")
        && header_has_token(headers, http::header::UPGRADE, "websocket")
}

fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}
