//! WebSocket Gateway Server
//!
//! Accepts client connections and serves them over HTTP/1.1. `GET /health`
//! is answered directly; `GET /ws` is validated, upgraded, and then run as
//! one reader and one writer task per connection.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, instrument, warn};

use crate::hub::dispatcher::Dispatcher;
use crate::network::protocol::{decode_frames, error_frame};
use crate::network::session::Session;

/// Upgrade path.
pub const WS_PATH: &str = "/ws";
/// Health check path.
pub const HEALTH_PATH: &str = "/health";

type WsStream = WebSocketStream<TokioIo<Upgraded>>;
type HttpResponse = Response<Full<Bytes>>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-session outbound queue capacity.
    pub outbound_queue_size: usize,
    /// Bound on a single write, and on reading the upgrade request headers.
    pub write_wait: Duration,
    /// Longest a connection may stay silent before it is dropped.
    pub pong_wait: Duration,
    /// Keepalive ping interval. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound WebSocket message.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8087)),
            max_connections: 10_000,
            outbound_queue_size: 256,
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 4096,
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decrements the live connection count when dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Query parameters required on the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectParams {
    token: String,
    path: String,
}

/// What every HTTP connection task needs from the server.
#[derive(Clone)]
struct ConnectionContext {
    config: ServerConfig,
    dispatcher: Dispatcher,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

/// The gateway server.
pub struct GatewayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Frame dispatcher (and through it, the hub).
    dispatcher: Dispatcher,
    /// Live WebSocket connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GatewayServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayServerError> {
        info!("Gateway listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawn the HTTP/1.1 task owning one accepted socket.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let header_timeout = self.config.write_wait;
        let ctx = ConnectionContext {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
            connections: Arc::clone(&self.connections),
            shutdown_tx: self.shutdown_tx.clone(),
        };

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let ctx = ctx.clone();
                async move { Ok::<_, Infallible>(route(req, ctx)) }
            });
            let connection = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(header_timeout)
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();
            if let Err(e) = connection.await {
                debug!("Connection from {} ended: {}", addr, e);
            }
        });
    }

    /// Stop accepting and tell open connections to close.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live WebSocket connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn route(req: Request<Incoming>, ctx: ConnectionContext) -> HttpResponse {
    let path = req.uri().path();
    if path != HEALTH_PATH && path != WS_PATH {
        return text_response(StatusCode::NOT_FOUND, "not found");
    }
    if req.method() != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }
    if path == HEALTH_PATH {
        return text_response(StatusCode::OK, "OK");
    }
    upgrade(req, ctx)
}

/// Validate an upgrade request and answer `101`, handing the upgraded
/// socket to its own task. Everything that can be refused is refused here,
/// before the handshake completes.
fn upgrade(mut req: Request<Incoming>, ctx: ConnectionContext) -> HttpResponse {
    let params = match connect_params(&req) {
        Ok(params) => params,
        Err(resp) => return resp,
    };
    let accept = match websocket_accept(&req) {
        Ok(accept) => accept,
        Err(resp) => return resp,
    };

    if ctx.connections.fetch_add(1, Ordering::SeqCst) >= ctx.config.max_connections {
        ctx.connections.fetch_sub(1, Ordering::SeqCst);
        warn!(max = ctx.config.max_connections, "Connection limit reached, rejecting");
        return text_response(StatusCode::SERVICE_UNAVAILABLE, "connection limit reached");
    }
    let slot = ConnectionSlot(Arc::clone(&ctx.connections));
    let shutdown_rx = ctx.shutdown_tx.subscribe();

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let _slot = slot;
        match on_upgrade.await {
            Ok(upgraded) => serve_socket(upgraded, params, ctx, shutdown_rx).await,
            Err(e) => debug!(error = %e, "upgrade failed"),
        }
    });

    let mut resp = Response::new(Full::default());
    *resp.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = resp.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    resp
}

/// Run one upgraded connection from login to teardown.
async fn serve_socket(
    upgraded: Upgraded,
    params: ConnectParams,
    ctx: ConnectionContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let ConnectionContext { config, dispatcher, .. } = ctx;
    let ConnectParams { token, path } = params;

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    let mut ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(ws_config)).await;

    let (session, outbound) = Session::new(config.outbound_queue_size);
    let conn_id = session.conn_id().clone();

    if let Err(e) = dispatcher.authenticate(&session, &token).await {
        info!(conn_id = %conn_id, error = %e, "login rejected");
        let _ = ws.send(Message::Binary(error_frame(e.to_string()).to_vec())).await;
        let _ = ws.close(None).await;
        return;
    }

    let hub = dispatcher.hub().clone();
    if hub.register(session.clone()).await.is_err() {
        error!(conn_id = %conn_id, "hub unavailable, dropping connection");
        let _ = ws.close(None).await;
        return;
    }
    info!(conn_id = %conn_id, user_id = %session.user_id(), "client connected");

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_pump(sink, outbound, config.clone()));

    if let Err(e) = dispatcher.join_path(&session, &path).await {
        warn!(conn_id = %conn_id, path = %path, error = %e, "initial join failed");
        session.send_error(e.to_string());
    }

    read_pump(stream, &session, &dispatcher, &config, &mut shutdown_rx).await;

    // Closing the queue lets the writer drain and send a close frame.
    if hub.unregister(session.clone()).await.is_err() {
        session.close();
    }
    if timeout(config.write_wait, writer).await.is_err() {
        debug!(conn_id = %conn_id, "writer did not finish in time");
    }
    let connected_for = Utc::now() - session.connected_at();
    info!(
        conn_id = %conn_id,
        user_id = %session.user_id(),
        secs = connected_for.num_seconds(),
        "client disconnected"
    );
}

/// Read frames until the client leaves, goes silent, or the server stops.
async fn read_pump(
    mut stream: SplitStream<WsStream>,
    session: &Arc<Session>,
    dispatcher: &Dispatcher,
    config: &ServerConfig,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let conn_id = session.conn_id();
    loop {
        tokio::select! {
            msg = timeout(config.pong_wait, stream.next()) => {
                match msg {
                    Err(_) => {
                        debug!(conn_id = %conn_id, "read deadline passed");
                        break;
                    }
                    Ok(Some(Ok(Message::Binary(data)))) => {
                        handle_binary(session, dispatcher, data).await;
                    }
                    Ok(Some(Ok(Message::Text(_)))) => {
                        session.send_error("text messages are not supported");
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        debug!(conn_id = %conn_id, "client closed");
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        debug!(conn_id = %conn_id, error = %e, "read error");
                        break;
                    }
                    // Ping/pong only refresh the read deadline.
                    Ok(Some(Ok(_))) => {}
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(conn_id = %conn_id, "server shutting down");
                break;
            }
        }
    }
}

async fn handle_binary(session: &Arc<Session>, dispatcher: &Dispatcher, data: Vec<u8>) {
    let data = Bytes::from(data);
    let frames = match decode_frames(data.clone()) {
        Ok(frames) => frames,
        Err(e) => {
            let head = hex::encode(&data[..data.len().min(16)]);
            debug!(conn_id = %session.conn_id(), error = %e, head = %head, "undecodable message");
            session.send_error(e.to_string());
            return;
        }
    };
    for frame in frames {
        if let Err(e) = dispatcher.dispatch(session, frame).await {
            warn!(conn_id = %session.conn_id(), user_id = %session.user_id(), error = %e, "dispatch failed");
            session.send_error(e.to_string());
        }
    }
}

/// Drain the outbound queue into the socket, batching whatever is ready,
/// and ping on a fixed period.
async fn write_pump(mut sink: SplitSink<WsStream, Message>, mut outbound: mpsc::Receiver<Bytes>, config: ServerConfig) {
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        let msg = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(first) => {
                    let mut batch = BytesMut::from(&first[..]);
                    while let Ok(next) = outbound.try_recv() {
                        batch.extend_from_slice(&next);
                    }
                    Message::Binary(batch.to_vec())
                }
                None => {
                    let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match timeout(config.write_wait, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "write failed");
                return;
            }
            Err(_) => {
                debug!("write deadline passed");
                return;
            }
        }
    }
}

/// Pull `token` and `path` from an upgrade request, or build the rejection.
fn connect_params<B>(req: &Request<B>) -> Result<ConnectParams, HttpResponse> {
    let query = req.uri().query().unwrap_or_default();
    let mut token = None;
    let mut path = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "token" if !value.is_empty() => token = Some(value.into_owned()),
            "path" if !value.is_empty() => path = Some(value.into_owned()),
            _ => {}
        }
    }

    match (token, path) {
        (Some(token), Some(path)) => Ok(ConnectParams { token, path }),
        (None, _) => Err(text_response(StatusCode::BAD_REQUEST, "token is missing")),
        (_, None) => Err(text_response(StatusCode::BAD_REQUEST, "path is missing")),
    }
}

/// Check the RFC 6455 upgrade headers and compute `Sec-WebSocket-Accept`.
fn websocket_accept<B>(req: &Request<B>) -> Result<HeaderValue, HttpResponse> {
    let headers = req.headers();
    let lists = |name: HeaderName, wanted: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(wanted))
    };

    if !lists(header::CONNECTION, "upgrade") || !lists(header::UPGRADE, "websocket") {
        return Err(text_response(StatusCode::BAD_REQUEST, "websocket upgrade required"));
    }
    if !headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .is_some_and(|v| v.as_bytes() == b"13")
    {
        return Err(text_response(StatusCode::BAD_REQUEST, "unsupported websocket version"));
    }
    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or_else(|| text_response(StatusCode::BAD_REQUEST, "websocket key is missing"))?;

    HeaderValue::from_str(&derive_accept_key(key.as_bytes()))
        .map_err(|_| text_response(StatusCode::BAD_REQUEST, "invalid websocket key"))
}

fn text_response(status: StatusCode, body: &'static str) -> HttpResponse {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp
}
