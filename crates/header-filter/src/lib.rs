//! # header-filter
//!
//! Pure functions computing the header sets a relay forwards in each
//! direction.
//!
//! Toward the upstream, hop-by-hop and connection-identity headers are
//! stripped and the standard forwarded-chain headers (`X-Forwarded-For`,
//! `X-Forwarded-Host`, `X-Forwarded-Proto`) are appended.  Toward the
//! original caller, content-framing and CORS response headers are stripped
//! so the host application's own CORS layer stays the single source of
//! truth.
//!
//! Nothing here performs I/O or inspects bodies; both transforms are plain
//! `HeaderMap -> HeaderMap` functions.

use std::net::IpAddr;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Inbound request headers never forwarded upstream.
///
/// Content framing is re-derived by the upstream client, the WebSocket
/// negotiation headers are re-derived by the upstream handshake, and the
/// host's own `Host`/`Authorization` values are meaningless to the target.
const STRIPPED_REQUEST_HEADERS: &[HeaderName] = &[
    header::HOST,
    header::AUTHORIZATION,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::UPGRADE,
    header::TE,
    header::TRAILER,
    header::PROXY_AUTHORIZATION,
    header::PROXY_AUTHENTICATE,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_PROTOCOL,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_ACCEPT,
];

/// Upstream response headers never relayed back to the caller.
///
/// `Content-Length` is intentionally kept: the relayed body is unmodified,
/// and dropping the length breaks range/seek behavior for media responses.
const STRIPPED_RESPONSE_HEADERS: &[HeaderName] = &[
    header::TRANSFER_ENCODING,
    header::CONTENT_ENCODING,
    header::CONNECTION,
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Connection facts about the inbound caller needed to extend the
/// forwarded chain.
#[derive(Debug, Clone)]
pub struct ForwardInfo<'a> {
    /// Resolved peer IP of the direct caller.
    pub peer_ip: IpAddr,
    /// The inbound request's `Host` value, if any.
    pub host: Option<&'a str>,
    /// The scheme the inbound request arrived over ("http" or "https").
    pub scheme: &'a str,
}

/// Compute the header set for the outbound upstream request.
pub fn outbound_request_headers(inbound: &HeaderMap, info: &ForwardInfo<'_>) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len() + 3);

    for (name, value) in inbound {
        if STRIPPED_REQUEST_HEADERS.contains(name) || name.as_str() == "keep-alive" {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    // X-Forwarded-For: append our peer to any existing chain.
    let forwarded_for = match inbound
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(chain) => format!("{chain}, {}", info.peer_ip),
        None => info.peer_ip.to_string(),
    };
    insert_str(&mut out, X_FORWARDED_FOR, &forwarded_for);

    // X-Forwarded-Host / X-Forwarded-Proto: preserve an existing value, else
    // derive from the inbound request.
    match inbound.get(X_FORWARDED_HOST) {
        Some(existing) => {
            out.insert(HeaderName::from_static(X_FORWARDED_HOST), existing.clone());
        }
        None => {
            if let Some(host) = info.host {
                insert_str(&mut out, X_FORWARDED_HOST, host);
            }
        }
    }
    match inbound.get(X_FORWARDED_PROTO) {
        Some(existing) => {
            out.insert(HeaderName::from_static(X_FORWARDED_PROTO), existing.clone());
        }
        None => insert_str(&mut out, X_FORWARDED_PROTO, info.scheme),
    }

    out
}

/// Compute the header set relayed back to the original caller.
///
/// All `Access-Control-*` response headers are removed: the host's CORS
/// middleware asserts that it is the only writer of those headers, and a
/// duplicated value from upstream would be rejected.
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream {
        if STRIPPED_RESPONSE_HEADERS.contains(name)
            || *name == header::CONTENT_TYPE
            || name.as_str() == "keep-alive"
            || name.as_str().starts_with("access-control-")
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    // Content-Type is re-set explicitly from the upstream value rather than
    // copied in the loop, mirroring how the relay re-frames the body.
    if let Some(content_type) = upstream.get(header::CONTENT_TYPE) {
        out.insert(header::CONTENT_TYPE, content_type.clone());
    }

    out
}

fn insert_str(map: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        map.insert(HeaderName::from_static(name), value);
    }
}
