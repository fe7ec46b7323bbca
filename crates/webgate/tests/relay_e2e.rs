//! End-to-end tests: a webgate instance in front of local echo upstreams.

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::header::HeaderValue;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use webgate::config::Config;
use webgate::server::Server;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// HTTP upstream that reflects the request back in the body
/// (`echo:{method}:{path?query}:{body}`) and in `x-echo-*` headers.
async fn spawn_http_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let _ = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service_fn(echo_service))
                    .await;
            });
        }
    });
    addr
}

async fn echo_service(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_default();
    let forwarded_for = req.headers().get("x-forwarded-for").cloned();
    let has_auth = req.headers().contains_key(http::header::AUTHORIZATION);
    let body = req.into_body().collect().await.unwrap().to_bytes();

    let mut response = Response::new(Full::new(Bytes::from(format!(
        "echo:{method}:{path_and_query}:{}",
        String::from_utf8_lossy(&body)
    ))));
    let headers = response.headers_mut();
    headers.insert("x-upstream", HeaderValue::from_static("yes"));
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "x-echo-auth",
        HeaderValue::from_static(if has_auth { "present" } else { "absent" }),
    );
    if let Some(value) = forwarded_for {
        headers.insert("x-echo-forwarded-for", value);
    }
    Ok(response)
}

/// WebSocket upstream that echoes text and binary frames.
async fn spawn_ws_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        if ws.send(message).await.is_err() {
                            break;
                        }
                    } else if message.is_close() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

async fn spawn_gate(mut config: Config) -> SocketAddr {
    config.network.listen_addr = "127.0.0.1:0".to_string();
    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(async move {
        let _ = server.serve(std::future::pending()).await;
    });
    addr
}

fn gate_config(patterns: &[String]) -> Config {
    let mut config = Config::default();
    config.proxy.url_patterns = patterns.to_vec();
    config
}

fn proxy_url(gate: SocketAddr, target: &str) -> String {
    let mut url = Url::parse(&format!("http://{gate}/api/proxy/")).unwrap();
    url.query_pairs_mut().append_pair("url", target);
    url.to_string()
}

// ---------------------------------------------------------------------------
// HTTP relay
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn relays_to_statically_allowed_target() {
    let echo = spawn_http_echo().await;
    let gate = spawn_gate(gate_config(&[format!("http://{echo}/*")])).await;

    let response = reqwest::get(proxy_url(gate, &format!("http://{echo}/hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-upstream").unwrap(),
        &HeaderValue::from_static("yes")
    );
    // CORS headers from the upstream must not reach the caller.
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
    assert_eq!(
        response
            .headers()
            .get("x-echo-forwarded-for")
            .and_then(|v| v.to_str().ok()),
        Some("127.0.0.1")
    );

    let body = response.text().await.unwrap();
    assert!(body.starts_with("echo:GET:/hello"), "body was {body:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn forwards_method_body_and_residual_query() {
    let echo = spawn_http_echo().await;
    let gate = spawn_gate(gate_config(&[format!("http://{echo}/*")])).await;

    let mut url = Url::parse(&format!("http://{gate}/api/proxy/")).unwrap();
    url.query_pairs_mut()
        .append_pair("url", &format!("http://{echo}/submit"))
        .append_pair("authSig", "ey123")
        .append_pair("session", "abc");

    let client = reqwest::Client::new();
    let response = client
        .post(url.as_str())
        .body("ping")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    assert_eq!(body, "echo:POST:/submit?session=abc:ping");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_target_is_bad_request() {
    let gate = spawn_gate(gate_config(&[])).await;
    let response = reqwest::get(format!("http://{gate}/api/proxy/"))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn unmatched_target_is_not_found() {
    let echo = spawn_http_echo().await;
    let gate = spawn_gate(gate_config(&[format!("http://{echo}/allowed/*")])).await;

    let response = reqwest::get(proxy_url(gate, &format!("http://{echo}/other")))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_upstream_is_bad_gateway() {
    // Port 1 is reserved and nothing listens on it.
    let gate = spawn_gate(gate_config(&["http://127.0.0.1:1/*".to_string()])).await;

    let response = reqwest::get(proxy_url(gate, "http://127.0.0.1:1/x"))
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
}

// ---------------------------------------------------------------------------
// Grant administration
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn single_use_grant_admits_exactly_once() {
    let echo = spawn_http_echo().await;
    let gate = spawn_gate(gate_config(&[])).await;
    let client = reqwest::Client::new();

    let created = client
        .post(format!("http://{gate}/api/proxy/grant"))
        .json(&serde_json::json!({ "url_pattern": format!("http://{echo}/*") }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 200);
    let body: serde_json::Value = created.json().await.unwrap();
    assert!(!body["url_id"].as_str().unwrap().is_empty());

    let target = proxy_url(gate, &format!("http://{echo}/once"));
    let first = reqwest::get(&target).await.unwrap();
    assert_eq!(first.status(), 200);

    let second = reqwest::get(&target).await.unwrap();
    assert_eq!(second.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn grants_can_be_deleted_by_id() {
    let echo = spawn_http_echo().await;
    let gate = spawn_gate(gate_config(&[])).await;
    let client = reqwest::Client::new();

    let created = client
        .post(format!("http://{gate}/api/proxy/grant"))
        .json(&serde_json::json!({
            "url_pattern": format!("http://{echo}/*"),
            "url_id": "cam",
            "open_limit": 0,
        }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = created.json().await.unwrap();
    assert_eq!(body["url_id"], "cam");

    let deleted = client
        .delete(format!("http://{gate}/api/proxy/grant/cam"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let relayed = reqwest::get(proxy_url(gate, &format!("http://{echo}/x")))
        .await
        .unwrap();
    assert_eq!(relayed.status(), 404);

    let again = client
        .delete(format!("http://{gate}/api/proxy/grant/cam"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
    assert!(again.text().await.unwrap().contains("cam"));
}

#[tokio::test(flavor = "multi_thread")]
async fn grant_endpoints_hidden_when_dynamic_urls_disabled() {
    let mut config = gate_config(&[]);
    config.proxy.dynamic_urls = false;
    let gate = spawn_gate(config).await;

    let response = reqwest::Client::new()
        .post(format!("http://{gate}/api/proxy/grant"))
        .json(&serde_json::json!({ "url_pattern": "http://h/*" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_grant_request_is_bad_request() {
    let gate = spawn_gate(gate_config(&[])).await;

    let response = reqwest::Client::new()
        .post(format!("http://{gate}/api/proxy/grant"))
        .json(&serde_json::json!({ "url_id": "missing-pattern" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

// ---------------------------------------------------------------------------
// Authentication shim
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn bearer_token_gates_the_relay() {
    let echo = spawn_http_echo().await;
    let mut config = gate_config(&[format!("http://{echo}/*")]);
    config.auth.token = Some("secret".to_string());
    let gate = spawn_gate(config).await;

    let target = proxy_url(gate, &format!("http://{echo}/hello"));
    let anonymous = reqwest::get(&target).await.unwrap();
    assert_eq!(anonymous.status(), 401);

    let authed = reqwest::Client::new()
        .get(&target)
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(authed.status(), 200);
    // The caller's credential never reaches the upstream.
    assert_eq!(
        authed
            .headers()
            .get("x-echo-auth")
            .and_then(|v| v.to_str().ok()),
        Some("absent")
    );
}

// ---------------------------------------------------------------------------
// WebSocket relay
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn websocket_frames_round_trip() {
    let echo = spawn_ws_echo().await;
    let gate = spawn_gate(gate_config(&[format!("ws://{echo}/*")])).await;

    let mut url = Url::parse(&format!("ws://{gate}/api/proxy/ws")).unwrap();
    url.query_pairs_mut()
        .append_pair("url", &format!("ws://{echo}/"));

    let (mut ws, _) = tokio_tungstenite::connect_async(url.to_string())
        .await
        .unwrap();

    ws.send(Message::Text("hello".to_string())).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Text("hello".to_string()));

    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Binary(vec![1, 2, 3]));

    ws.close(None).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn caller_close_tears_down_upstream_connection() {
    // Upstream reports over a oneshot when its connection ends.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
            if (message.is_text() || message.is_binary())
                && ws.send(message).await.is_err()
            {
                break;
            }
        }
        let _ = closed_tx.send(());
    });

    let gate = spawn_gate(gate_config(&[format!("ws://{upstream_addr}/*")])).await;
    let mut url = Url::parse(&format!("ws://{gate}/api/proxy/ws")).unwrap();
    url.query_pairs_mut()
        .append_pair("url", &format!("ws://{upstream_addr}/"));

    let (mut ws, _) = tokio_tungstenite::connect_async(url.to_string())
        .await
        .unwrap();
    ws.send(Message::Text("ping".to_string())).await.unwrap();
    assert!(ws.next().await.unwrap().unwrap().is_text());

    ws.close(None).await.unwrap();
    drop(ws);

    // The relay must propagate the close to the upstream side.
    tokio::time::timeout(std::time::Duration::from_secs(5), closed_rx)
        .await
        .expect("upstream connection still open after caller closed")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn websocket_to_unmatched_target_fails_handshake() {
    let gate = spawn_gate(gate_config(&[])).await;

    let mut url = Url::parse(&format!("ws://{gate}/api/proxy/ws")).unwrap();
    url.query_pairs_mut().append_pair("url", "ws://elsewhere/");

    let result = tokio_tungstenite::connect_async(url.to_string()).await;
    assert!(result.is_err());
}
