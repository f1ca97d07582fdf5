use crate::dispatcher::{Dispatcher, InboundRequest};
use anyhow::Context;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

const X_REQUEST_ID: &str = "x-request-id";
const X_REAL_IP: &str = "x-real-ip";

/// Public HTTP server answering every site
pub struct SiteServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SiteServer {
    /// Bind the listening socket; failing here is a startup error
    pub async fn bind(
        bind_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind site server to {}", bind_addr))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            dispatcher,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = self.listener;
        info!(addr = %self.local_addr, "Site server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let dispatcher = Arc::clone(&self.dispatcher);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, addr, dispatcher).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again; treat it as shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Site server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { handle_request(req, addr, dispatcher).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let start = Instant::now();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let client_ip = real_ip(req.headers(), addr);

    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let host = request_host(&parts.headers, &parts.uri);
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    let inbound = InboundRequest {
        method: parts.method,
        host: host.clone(),
        path: path.clone(),
        query: parts.uri.query().map(String::from),
        headers: parts.headers,
        body,
    };

    let mut response = dispatcher.handle(inbound).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    info!(
        ip = %client_ip,
        method = %method,
        host = %host,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        request_id = %request_id,
        "Request served"
    );

    Ok(response)
}

/// Client address, as reported by a fronting proxy when there is one
fn real_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Host header, or the URI authority for HTTP/2 requests that only carry `:authority`
fn request_host(headers: &HeaderMap, uri: &hyper::Uri) -> String {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherOptions;
    use crate::store::MemoryStore;

    async fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(
            Dispatcher::new(DispatcherOptions::default(), Arc::new(MemoryStore::new()))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_bind_fails_when_port_is_taken() {
        let (_tx, rx) = watch::channel(false);
        let any_port: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let first = SiteServer::bind(any_port, dispatcher().await, rx.clone())
            .await
            .unwrap();

        let err = SiteServer::bind(first.local_addr(), dispatcher().await, rx)
            .await
            .err()
            .expect("second bind on the same port must fail");
        assert!(err.to_string().contains("Failed to bind site server"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let any_port: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = SiteServer::bind(any_port, dispatcher().await, rx)
            .await
            .unwrap();
        let handle = tokio::spawn(server.run());

        tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_real_ip_prefers_header() {
        let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(real_ip(&headers, addr), "10.0.0.1");

        headers.insert(X_REAL_IP, HeaderValue::from_static("203.0.113.9"));
        assert_eq!(real_ip(&headers, addr), "203.0.113.9");

        headers.insert(X_REAL_IP, HeaderValue::from_static(""));
        assert_eq!(real_ip(&headers, addr), "10.0.0.1");
    }

    #[test]
    fn test_request_host() {
        let mut headers = HeaderMap::new();
        let uri: hyper::Uri = "http://abc.localhost:5103/test".parse().unwrap();
        assert_eq!(request_host(&headers, &uri), "abc.localhost:5103");

        headers.insert(HOST, HeaderValue::from_static("admin-abc.localhost"));
        assert_eq!(request_host(&headers, &uri), "admin-abc.localhost");

        let relative: hyper::Uri = "/test".parse().unwrap();
        assert_eq!(request_host(&HeaderMap::new(), &relative), "");
    }
}
