//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use gateway::error::{GatewayError, GatewayResult};
use gateway::http::Transport;
use gateway::ratelimit::{RateLimitDecision, RateLimiter};
use gateway::{Exchange, Gateway, HttpServer};

/// What the scripted backend does on one attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    Status(u16),
    /// Connection-level failure.
    Fail,
    /// Wait, then answer 200.
    Hang(Duration),
}

/// A request as seen by the transport.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

/// In-process transport that plays back a list of outcomes. The last
/// outcome repeats once the list is used up.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    last: Mutex<Outcome>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Outcome::Status(200)),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(vec![Outcome::Status(200)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last_url(&self) -> Option<String> {
        self.seen.lock().unwrap().last().map(|s| s.url.clone())
    }

    fn next(&self) -> Outcome {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(outcome) = script.pop_front() {
            *last = outcome;
        }
        last.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn forward(&self, exchange: &mut Exchange) -> GatewayResult<Response<Body>> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let url = exchange
            .request_url()
            .map(|u| u.to_string())
            .unwrap_or_default();
        self.seen.lock().unwrap().push(Seen {
            method: exchange.method().clone(),
            url: url.clone(),
            headers: exchange.headers().clone(),
        });

        let status = match self.next() {
            Outcome::Status(code) => code,
            Outcome::Fail => return Err(GatewayError::UpstreamConnection("connection refused".into())),
            Outcome::Hang(delay) => {
                tokio::time::sleep(delay).await;
                200
            }
        };
        Ok(Response::builder()
            .status(StatusCode::from_u16(status).unwrap())
            .header("x-upstream-attempt", attempt.to_string())
            .body(Body::from(url))
            .unwrap())
    }
}

/// Limiter returning a fixed decision and recording each call.
pub struct StubLimiter {
    allowed: bool,
    remaining: u64,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubLimiter {
    pub fn allowing(remaining: u64) -> Arc<Self> {
        Arc::new(Self {
            allowed: true,
            remaining,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            allowed: false,
            remaining: 0,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(route_id, key)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RateLimiter for StubLimiter {
    async fn is_allowed(&self, route_id: &str, key: &str) -> GatewayResult<RateLimitDecision> {
        self.calls
            .lock()
            .unwrap()
            .push((route_id.to_string(), key.to_string()));
        let decision = if self.allowed {
            RateLimitDecision::allowed(Some(self.remaining))
        } else {
            RateLimitDecision::denied()
        };
        Ok(decision.with_header("X-RateLimit-Remaining", self.remaining.to_string()))
    }
}

pub fn exchange(method: Method, uri: &str) -> Exchange {
    Exchange::new(
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
}

pub fn get(uri: &str) -> Exchange {
    exchange(Method::GET, uri)
}

pub fn with_header(mut exchange: Exchange, name: &'static str, value: &'static str) -> Exchange {
    exchange
        .headers_mut()
        .append(name, axum::http::HeaderValue::from_static(value));
    exchange
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Start a programmable raw HTTP/1.1 backend on an ephemeral port.
///
/// `f` receives the request path (with query) and returns status and body.
/// The request path is also echoed back in `x-backend-path`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = Vec::with_capacity(1024);
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let path = head
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();

                let (status, body) = f(path.clone()).await;
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nx-backend-path: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    path,
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Serve `gateway` on an ephemeral port and return its address.
pub async fn start_gateway(gateway: Arc<Gateway>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = HttpServer::build_router(gateway).into_make_service_with_connect_info::<SocketAddr>();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}
