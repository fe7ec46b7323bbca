use std::time::SystemTime;

use futures_util::StreamExt;
use header_filter::ForwardInfo;
use http::{header, Request, Response};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tracing::{debug, warn};
use url::Url;
use url_authz::{Decision, DenyReason, UrlAuthorizer};

use crate::hooks::{upstream_query, RelayHooks};
use crate::response::{bad_gateway, deny_response, ProxyBody};
use crate::RequestContext;

/// Relay one HTTP exchange to the admitted target.
///
/// The inbound body is read fully before the upstream request is issued;
/// the upstream response body is streamed back chunk by chunk. Upstream
/// failure before headers maps to 502, failure mid-stream just ends the
/// body.
pub async fn handle_http<B>(
    req: Request<B>,
    authz: &UrlAuthorizer,
    hooks: &dyn RelayHooks,
    ctx: &RequestContext,
) -> Response<ProxyBody>
where
    B: http_body::Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();

    let target = hooks.target(&parts.uri, &parts.headers);
    let decision =
        match authz.authorize(target.as_deref(), ctx.authenticated, SystemTime::now()) {
            Ok(decision) => decision,
            Err(reason) => {
                debug!(%reason, "HTTP relay refused");
                return deny_response(reason);
            }
        };
    if let Err(reason) = hooks.permit(&decision.url, ctx) {
        debug!(%reason, url = %decision.url, "HTTP relay vetoed");
        return deny_response(reason);
    }

    let Decision { mut url, tls, .. } = decision;
    merge_forwarded_query(&mut url, upstream_query(&parts.uri));

    let inbound_body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            debug!(error = %err, "failed to read inbound request body");
            return deny_response(DenyReason::BadRequest);
        }
    };

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok());
    let outbound_headers = header_filter::outbound_request_headers(
        &parts.headers,
        &ForwardInfo {
            peer_ip: ctx.peer_ip,
            host,
            scheme: ctx.scheme,
        },
    );

    // Redirects are not followed: the caller was authorized for this URL,
    // not for wherever it points next.
    let client = match reqwest::Client::builder()
        .use_preconfigured_tls((*tls).clone())
        .redirect(reqwest::redirect::Policy::none())
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "failed to build upstream HTTP client");
            return bad_gateway();
        }
    };

    let upstream = match client
        .request(parts.method.clone(), url.clone())
        .headers(outbound_headers)
        .body(inbound_body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, url = %url, "upstream request failed");
            return bad_gateway();
        }
    };

    let status = upstream.status();
    let headers = header_filter::response_headers(upstream.headers());

    // The status line is already on the wire once streaming starts, so a
    // mid-stream upstream error can only end the body early.
    let stream = upstream.bytes_stream().scan((), |_, chunk| {
        futures_util::future::ready(match chunk {
            Ok(bytes) => Some(Ok(Frame::data(bytes))),
            Err(err) => {
                debug!(error = %err, "upstream body ended mid-stream");
                None
            }
        })
    });

    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn merge_forwarded_query(url: &mut Url, extra: Option<String>) {
    if let Some(extra) = extra {
        let merged = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
            _ => extra,
        };
        url.set_query(Some(&merged));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_query_appends_to_existing() {
        let mut url = Url::parse("http://h/stream?token=abc").unwrap();
        merge_forwarded_query(&mut url, Some("fps=30".to_string()));
        assert_eq!(url.query(), Some("token=abc&fps=30"));
    }

    #[test]
    fn forwarded_query_sets_when_absent() {
        let mut url = Url::parse("http://h/stream").unwrap();
        merge_forwarded_query(&mut url, Some("fps=30".to_string()));
        assert_eq!(url.query(), Some("fps=30"));

        let mut untouched = Url::parse("http://h/stream?a=1").unwrap();
        merge_forwarded_query(&mut untouched, None);
        assert_eq!(untouched.query(), Some("a=1"));
    }
}
