use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use proxy_relay::{
    empty_body, full_body, is_websocket_upgrade, text_response, DefaultHooks, ProxyBody,
    RequestContext,
};
use tls_policy::TlsPolicyResolver;
use url_authz::{AuthorizerOptions, GrantRegistry, GrantRequest, UrlAuthorizer};

use crate::config::Config;

/// Shared per-process state handed to every connection task.
pub struct App {
    authz: UrlAuthorizer,
    prefix: String,
    auth_token: Option<String>,
}

impl App {
    fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        match &self.auth_token {
            None => true,
            Some(token) => headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .is_some_and(|presented| presented == token),
        }
    }
}

/// A bound listener, ready to serve.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    app: Arc<App>,
}

impl Server {
    /// Build the shared state and bind the listen socket.
    pub async fn bind(config: &Config) -> anyhow::Result<Self> {
        let tls = Arc::new(
            TlsPolicyResolver::new().context("failed to build TLS client configurations")?,
        );
        let registry = Arc::new(GrantRegistry::new());
        let authz = UrlAuthorizer::new(
            registry,
            tls,
            AuthorizerOptions {
                dynamic_urls: config.proxy.dynamic_urls,
                ssl_verification: config.proxy.ssl_verification,
                ssl_ciphers: config.proxy.ssl_ciphers,
                url_patterns: config.proxy.url_patterns.clone(),
            },
        )
        .context("invalid allowed URL pattern in configuration")?;

        let app = Arc::new(App {
            authz,
            prefix: config.proxy.prefix.trim_end_matches('/').to_string(),
            auth_token: config.auth.token.clone(),
        });

        let listen_addr: SocketAddr = config
            .network
            .listen_addr
            .parse()
            .context("invalid listen address")?;
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind {listen_addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound address")?;

        Ok(Self {
            listener,
            local_addr,
            app,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr, prefix = %self.app.prefix, "webgate listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signalled, stopping accept loop");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let app = Arc::clone(&self.app);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { Ok::<_, Infallible>(dispatch(app, peer, req).await) }
                        });

                        if let Err(err) = auto::Builder::new(TokioExecutor::new())
                            .serve_connection_with_upgrades(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(error = %err, %peer, "connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

/// Route one request: grant administration, then the relay routes under the
/// configured prefix.
async fn dispatch(app: Arc<App>, peer: SocketAddr, req: Request<Incoming>) -> Response<ProxyBody> {
    let ctx = RequestContext {
        peer_ip: peer.ip(),
        scheme: "http",
        authenticated: app.is_authenticated(req.headers()),
    };

    let path = req.uri().path().to_string();
    let grant_path = format!("{}/grant", app.prefix);

    if path == grant_path && req.method() == Method::POST {
        return create_grant(&app, req, &ctx).await;
    }
    if req.method() == Method::DELETE {
        if let Some(id) = path
            .strip_prefix(grant_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            return delete_grant(&app, id, &ctx);
        }
    }

    if path == app.prefix || path.starts_with(&format!("{}/", app.prefix)) {
        if is_websocket_upgrade(req.headers()) || path == format!("{}/ws", app.prefix) {
            return proxy_relay::handle_ws(req, &app.authz, &DefaultHooks, &ctx).await;
        }
        return proxy_relay::handle_http(req, &app.authz, &DefaultHooks, &ctx).await;
    }

    text_response(StatusCode::NOT_FOUND, "no such route")
}

/// `POST {prefix}/grant` with a JSON grant request; responds with the
/// resolved id. Stands in for the host's `create_proxied_url` service.
async fn create_grant(
    app: &App,
    req: Request<Incoming>,
    ctx: &RequestContext,
) -> Response<ProxyBody> {
    if !app.authz.dynamic_urls_enabled() {
        return text_response(StatusCode::NOT_FOUND, "dynamic URLs are disabled");
    }
    if !ctx.authenticated {
        return text_response(StatusCode::UNAUTHORIZED, "authentication required");
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            debug!(error = %err, "failed to read grant request body");
            return text_response(StatusCode::BAD_REQUEST, "unreadable request body");
        }
    };
    let request: GrantRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return text_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid grant request: {err}"),
            );
        }
    };

    match app
        .authz
        .registry()
        .create(request, SystemTime::now())
    {
        Ok(url_id) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "url_id": url_id }),
        ),
        Err(err) => text_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

/// `DELETE {prefix}/grant/{id}`. Stands in for `delete_proxied_url`.
fn delete_grant(app: &App, id: &str, ctx: &RequestContext) -> Response<ProxyBody> {
    if !app.authz.dynamic_urls_enabled() {
        return text_response(StatusCode::NOT_FOUND, "dynamic URLs are disabled");
    }
    if !ctx.authenticated {
        return text_response(StatusCode::UNAUTHORIZED, "authentication required");
    }

    match app.authz.registry().delete(id, SystemTime::now()) {
        Ok(()) => Response::new(empty_body()),
        Err(err) => text_response(StatusCode::NOT_FOUND, &err.to_string()),
    }
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
