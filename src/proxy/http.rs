//! HTTP proxy: CONNECT tunneling plus absolute-URI forwarding.
//!
//! CONNECT is tunneled blindly once the filter allows it; there is no TLS
//! interception. Denials are structured 403s so callers can distinguish
//! policy blocks from origin failures.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::error::{Result, SandboxError};
use crate::proxy::filter::NetworkFilter;

/// Body of a policy denial.
pub const BLOCKED_BODY: &str = "Connection blocked by network allowlist";

/// Header marking a policy denial.
pub const BLOCKED_HEADER: (&str, &str) = ("X-Proxy-Error", "blocked-by-allowlist");

/// HTTP proxy server on an ephemeral localhost port.
pub struct HttpProxy {
    listener: Option<TcpListener>,
    port: u16,
    filter: Arc<NetworkFilter>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl HttpProxy {
    pub async fn bind(filter: NetworkFilter) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        tracing::debug!("HTTP proxy listening on 127.0.0.1:{port}");

        Ok(Self {
            listener: Some(listener),
            port,
            filter: Arc::new(filter),
            shutdown_tx: Mutex::new(None),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Spawn the accept loop. The loop lives on a detached task, so the
    /// listener never keeps the process alive on its own.
    pub fn start(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| SandboxError::Proxy("HTTP proxy already started".to_string()))?;

        let filter = self.filter.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let filter = filter.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, addr, filter).await {
                                        tracing::debug!("HTTP proxy connection {addr}: {e}");
                                    }
                                });
                            }
                            Err(e) => tracing::error!("HTTP proxy accept error: {e}"),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("HTTP proxy shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop accepting. Safe to call repeatedly; "not running" is not an
    /// error.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    _addr: SocketAddr,
    filter: Arc<NetworkFilter>,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let io = TokioIo::new(stream);

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(
            io,
            service_fn(move |req| {
                let filter = filter.clone();
                async move {
                    if req.method() == Method::CONNECT {
                        handle_connect(req, filter).await
                    } else {
                        handle_forward(req, filter).await
                    }
                }
            }),
        )
        .with_upgrades()
        .await?;

    Ok(())
}

/// CONNECT: filter, dial the origin, then 200 + bidirectional splice.
async fn handle_connect(
    req: Request<hyper::body::Incoming>,
    filter: Arc<NetworkFilter>,
) -> std::result::Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let host = req.uri().host().unwrap_or_default().to_string();
    let port = req.uri().port_u16().unwrap_or(443);

    if host.is_empty() {
        return Ok(status_response(StatusCode::BAD_REQUEST, "Malformed CONNECT target"));
    }

    if !filter.check(&host, port).await {
        tracing::debug!("HTTP proxy denied CONNECT {host}:{port}");
        return Ok(blocked_response());
    }

    // Dial before answering so a dead origin surfaces as 502, not as a
    // half-open tunnel.
    let origin = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!("HTTP proxy CONNECT {host}:{port} dial failed: {e}");
            return Ok(status_response(StatusCode::BAD_GATEWAY, "Failed to connect to target"));
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = tunnel(upgraded, origin).await {
                    tracing::debug!("HTTP proxy tunnel {host}:{port}: {e}");
                }
            }
            Err(e) => tracing::debug!("HTTP proxy upgrade {host}:{port}: {e}"),
        }
    });

    Ok(Response::new(empty_body()))
}

async fn tunnel(
    upgraded: hyper::upgrade::Upgraded,
    origin: TcpStream,
) -> std::io::Result<()> {
    let mut upgraded = TokioIo::new(upgraded);
    let (mut origin_read, mut origin_write) = origin.into_split();
    let (mut client_read, mut client_write) = tokio::io::split(&mut upgraded);

    let to_origin = tokio::io::copy(&mut client_read, &mut origin_write);
    let to_client = tokio::io::copy(&mut origin_read, &mut client_write);

    tokio::select! {
        r = to_origin => r.map(|_| ()),
        r = to_client => r.map(|_| ()),
    }
}

/// Absolute-URI forward proxying for plain HTTP.
async fn handle_forward(
    req: Request<hyper::body::Incoming>,
    filter: Arc<NetworkFilter>,
) -> std::result::Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let host = req
        .uri()
        .host()
        .or_else(|| {
            req.headers()
                .get(hyper::header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.split(':').next().unwrap_or(h))
        })
        .unwrap_or_default()
        .to_string();
    let port = req.uri().port_u16().unwrap_or(80);

    if host.is_empty() {
        return Ok(status_response(StatusCode::BAD_REQUEST, "Missing request host"));
    }

    if !filter.check(&host, port).await {
        tracing::debug!("HTTP proxy denied {} {host}:{port}", req.method());
        return Ok(blocked_response());
    }

    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("HTTP proxy dial {host}:{port} failed: {e}");
            return Ok(status_response(StatusCode::BAD_GATEWAY, "Failed to connect to target"));
        }
    };

    let io = TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!("HTTP proxy handshake {host}:{port} failed: {e}");
            return Ok(status_response(StatusCode::BAD_GATEWAY, "Upstream handshake failed"));
        }
    };

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("HTTP proxy upstream connection: {e}");
        }
    });

    match sender.send_request(req).await {
        Ok(resp) => Ok(resp.map(|b| b.boxed())),
        Err(e) => {
            tracing::debug!("HTTP proxy upstream request: {e}");
            Ok(status_response(StatusCode::BAD_GATEWAY, "Upstream request failed"))
        }
    }
}

fn blocked_response() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(BLOCKED_HEADER.0, BLOCKED_HEADER.1)
        .body(full_body(BLOCKED_BODY))
        .unwrap_or_else(|_| Response::new(full_body(BLOCKED_BODY)))
}

fn status_response(status: StatusCode, body: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .body(full_body(body))
        .unwrap_or_else(|_| Response::new(full_body(body)))
}

fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn full_body(s: &str) -> BoxBody<Bytes, hyper::Error> {
    Full::new(Bytes::from(s.to_string()))
        .map_err(|never| match never {})
        .boxed()
}
