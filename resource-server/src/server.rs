//! HTTP server exposing mounted resources

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::time::Duration;

use bytes::Bytes;
use propnet_resource::{spawn_request, Code, Completion, InboundRequest, MediaType};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warp::Filter;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::http::{method_from_http, parse_accept, status_reply, to_reply};
use crate::router::ResourceRouter;

/// HTTP server for endpoint resources
///
/// Every request to `/<mount>/<path>` is turned into an
/// [`InboundRequest`] for the resource mounted under `<mount>`, and the
/// resource's response is written back with its freshness hint as
/// `Cache-Control: max-age` and its fingerprint as `ETag`.
///
/// # Example
///
/// ```no_run
/// use resource_server::{ResourceRouter, ResourceServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let router = ResourceRouter::new();
///     let server = ResourceServer::start(ServerConfig::default(), router.clone())
///         .await
///         .expect("Failed to start resource server");
///
///     println!("Serving at {}", server.base_url());
///     server.shutdown().await.unwrap();
/// }
/// ```
pub struct ResourceServer {
    /// The port the server is bound to
    port: u16,
    /// Base URL of the mounted resources
    base_url: String,
    router: ResourceRouter,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ResourceServer {
    /// Bind the first free port of the configured range and start serving
    pub async fn start(config: ServerConfig, router: ResourceRouter) -> Result<Self> {
        config.validate()?;

        let (start, end) = config.port_range;
        let port = Self::find_available_port(config.bind_addr, start, end)
            .ok_or(ServerError::NoAvailablePort { start, end })?;

        let host = if config.bind_addr.is_unspecified() {
            Self::detect_local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            config.bind_addr
        };
        let base_url = format!("http://{}", SocketAddr::new(host, port));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (ready_tx, mut ready_rx) = mpsc::channel::<std::result::Result<SocketAddr, String>>(1);

        let server_handle = Self::start_server(
            SocketAddr::new(config.bind_addr, port),
            router.clone(),
            config.request_timeout,
            shutdown_rx,
            ready_tx,
        );

        match ready_rx.recv().await {
            Some(Ok(addr)) => info!("Resource server listening on {addr}"),
            Some(Err(e)) => return Err(ServerError::Bind(e)),
            None => return Err(ServerError::StartFailed),
        }

        Ok(Self {
            port,
            base_url,
            router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL, e.g. `http://192.168.1.20:5683`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn router(&self) -> &ResourceRouter {
        &self.router
    }

    /// Stop accepting requests and wait for the server task to finish
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.server_handle.take() {
            handle.await?;
        }
        info!(port = self.port, "Resource server stopped");
        Ok(())
    }

    /// Find an available port in the given range.
    fn find_available_port(addr: IpAddr, start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(addr, port))
    }

    fn is_port_available(addr: IpAddr, port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(addr, port)).is_ok()
    }

    /// Detect the address peers would use to reach this host.
    ///
    /// Connecting a UDP socket sends nothing; it only selects a route.
    fn detect_local_ip() -> Option<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        Some(socket.local_addr().ok()?.ip())
    }

    fn start_server(
        addr: SocketAddr,
        router: ResourceRouter,
        request_timeout: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
        ready_tx: mpsc::Sender<std::result::Result<SocketAddr, String>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let route = warp::method()
                .and(warp::path::full())
                .and(
                    warp::query::raw()
                        .or(warp::any().map(String::new))
                        .unify(),
                )
                .and(warp::header::optional::<String>("accept"))
                .and(warp::header::optional::<String>("content-type"))
                .and(warp::body::bytes())
                .and_then(move |method, path, query, accept, content_type, body| {
                    let router = router.clone();
                    async move {
                        Ok::<_, warp::Rejection>(
                            dispatch(
                                router,
                                method,
                                path,
                                query,
                                accept,
                                content_type,
                                body,
                                request_timeout,
                            )
                            .await,
                        )
                    }
                });

            let served = warp::serve(route).try_bind_with_graceful_shutdown(addr, async move {
                shutdown_rx.recv().await;
            });

            match served {
                Ok((addr, server)) => {
                    let _ = ready_tx.send(Ok(addr)).await;
                    server.await;
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string())).await;
                }
            }
        })
    }
}

impl std::fmt::Debug for ResourceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceServer")
            .field("port", &self.port)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Hand one HTTP request to its resource and wait for the answer
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    router: ResourceRouter,
    method: warp::http::Method,
    path: warp::path::FullPath,
    query: String,
    accept: Option<String>,
    content_type: Option<String>,
    body: Bytes,
    request_timeout: Duration,
) -> warp::reply::Response {
    debug!(method = %method, path = path.as_str(), "HTTP request");

    let Some(method) = method_from_http(&method) else {
        return status_reply(Code::MethodNotAllowed, "Method not allowed");
    };

    let full = path.as_str().trim_start_matches('/');
    let (mount, rest) = full.split_once('/').unwrap_or((full, ""));
    let Some(resource) = router.route(mount).await else {
        return status_reply(Code::NotFound, "Not found");
    };

    let mut builder = InboundRequest::builder(method, rest).query_string(&query);
    if let Some(accept) = accept.as_deref().and_then(parse_accept) {
        builder = builder.accept(accept);
    }
    if let Some(content_type) = content_type.as_deref() {
        builder = builder.content_format(MediaType::parse(content_type));
    }
    let (request, pending) = builder.payload(body).build();

    let task = spawn_request(resource, request, &tokio::runtime::Handle::current());

    match tokio::time::timeout(request_timeout, pending.recv()).await {
        Ok(Some(response)) => to_reply(response),
        Ok(None) => match task.await {
            Ok(Completion::Interrupted) => status_reply(Code::ServiceUnavailable, "Interrupted"),
            Ok(completion) => {
                warn!(?completion, "Request finished without a response");
                status_reply(Code::InternalServerError, "No response")
            }
            Err(e) => {
                warn!("Request task failed: {}", e);
                status_reply(Code::InternalServerError, "Request failed")
            }
        },
        Err(_) => {
            debug!(mount = mount, "Request timed out");
            status_reply(Code::ServiceUnavailable, "Timed out")
        }
    }
}
