use std::time::SystemTime;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use header_filter::ForwardInfo;
use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, WebSocketStream};
use tracing::{debug, warn};
use url::Url;
use url_authz::{Decision, UrlAuthorizer};

use crate::hooks::{upstream_query, RelayHooks};
use crate::response::{bad_gateway, deny_response, empty_body, text_response, ProxyBody};
use crate::RequestContext;

/// Relay a WebSocket session to the admitted target.
///
/// The upstream connection is dialed first; only once it is up do we answer
/// the caller's upgrade, so a refused or unreachable target surfaces as a
/// plain HTTP error instead of a half-open socket. The caller's offered
/// subprotocols are re-sent upstream and echoed back verbatim.
pub async fn handle_ws<B>(
    mut req: Request<B>,
    authz: &UrlAuthorizer,
    hooks: &dyn RelayHooks,
    ctx: &RequestContext,
) -> Response<ProxyBody> {
    let key = match req.headers().get(header::SEC_WEBSOCKET_KEY) {
        Some(key) => key.clone(),
        None => {
            return text_response(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key");
        }
    };
    let version_ok = req
        .headers()
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|value| value.as_bytes() == b"13")
        .unwrap_or(false);
    if !version_ok {
        return text_response(StatusCode::BAD_REQUEST, "unsupported WebSocket version");
    }

    let target = hooks.target(req.uri(), req.headers());
    let decision =
        match authz.authorize(target.as_deref(), ctx.authenticated, SystemTime::now()) {
            Ok(decision) => decision,
            Err(reason) => {
                debug!(%reason, "WebSocket relay refused");
                return deny_response(reason);
            }
        };
    if let Err(reason) = hooks.permit(&decision.url, ctx) {
        debug!(%reason, url = %decision.url, "WebSocket relay vetoed");
        return deny_response(reason);
    }

    let Decision { mut url, tls, .. } = decision;
    if let Err(response) = map_to_ws_scheme(&mut url) {
        return response;
    }
    if let Some(extra) = upstream_query(req.uri()) {
        let merged = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
            _ => extra,
        };
        url.set_query(Some(&merged));
    }

    let mut upstream_req = match url.as_str().into_client_request() {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, url = %url, "target is not a valid WebSocket URL");
            return bad_gateway();
        }
    };

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok());
    let forwarded = header_filter::outbound_request_headers(
        req.headers(),
        &ForwardInfo {
            peer_ip: ctx.peer_ip,
            host,
            scheme: ctx.scheme,
        },
    );
    upstream_req.headers_mut().extend(forwarded);

    let offered_protocols = req.headers().get(header::SEC_WEBSOCKET_PROTOCOL).cloned();
    if let Some(protocols) = &offered_protocols {
        upstream_req
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, protocols.clone());
    }

    let connector = Connector::Rustls(tls);
    let (upstream_ws, _upstream_response) =
        match connect_async_tls_with_config(upstream_req, None, false, Some(connector)).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, url = %url, "upstream WebSocket connect failed");
                return bad_gateway();
            }
        };

    let upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let upgraded = match upgrade.await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                debug!(error = %err, "inbound upgrade never completed");
                return;
            }
        };
        let inbound =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        if let Err(err) = relay(inbound, upstream_ws).await {
            debug!(error = %err, "WebSocket relay ended");
        }
    });

    let accept = derive_accept_key(key.as_bytes());
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::try_from(accept) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }
    if let Some(protocols) = offered_protocols {
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocols);
    }
    response
}

/// Rewrite an http(s) target onto the matching ws(s) scheme; ws/wss pass
/// through unchanged.
fn map_to_ws_scheme(url: &mut Url) -> Result<(), Response<ProxyBody>> {
    let mapped = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Ok(()),
    };
    if url.set_scheme(mapped).is_err() {
        warn!(url = %url, "could not rewrite target onto a WebSocket scheme");
        return Err(bad_gateway());
    }
    Ok(())
}

/// Pump frames in both directions until either side closes or fails.
/// Dropping the losing half tears down its socket.
async fn relay<C, U>(
    inbound: WebSocketStream<C>,
    upstream: WebSocketStream<U>,
) -> Result<(), WsError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (inbound_write, inbound_read) = inbound.split();
    let (upstream_write, upstream_read) = upstream.split();

    tokio::select! {
        result = pump(inbound_read, upstream_write) => result,
        result = pump(upstream_read, inbound_write) => result,
    }
}

// Ping frames are forwarded like everything else, and both stream stacks
// additionally auto-reply to pings they receive, so a relayed ping earns
// its sender a second pong.
async fn pump<R, W>(mut reader: R, mut writer: W) -> Result<(), WsError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = reader.next().await {
        let message = message?;
        let is_close = message.is_close();
        writer.send(message).await?;
        if is_close {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_schemes_map_to_ws() {
        let mut url = Url::parse("http://h/stream").unwrap();
        map_to_ws_scheme(&mut url).ok().unwrap();
        assert_eq!(url.scheme(), "ws");

        let mut url = Url::parse("https://h/stream").unwrap();
        map_to_ws_scheme(&mut url).ok().unwrap();
        assert_eq!(url.scheme(), "wss");
    }

    #[test]
    fn ws_schemes_pass_through() {
        let mut url = Url::parse("wss://h/stream").unwrap();
        map_to_ws_scheme(&mut url).ok().unwrap();
        assert_eq!(url.scheme(), "wss");
    }
}
