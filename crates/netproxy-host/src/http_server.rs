//! HTTP server entity.
//!
//! An axum fallback route accepts every request, reads its body, parks the
//! connection under a fresh request id and emits a `Request` event. The
//! connection is answered when the caller sends a `Response` call for that
//! id. A request whose client goes away is unparked, so answering it later
//! fails with `unknown requestId`.

use crate::entity::{
    already_listening, bind_listener, closed_while_binding, resolve_bind_host, spawn_entity,
    Lifecycle, Slot,
};
use crate::host::HostContext;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use axum::Router;
use dashmap::DashMap;
use netproxy_proto::{HttpServerCall, HttpServerEvent, HttpServerProtocol, HttpServerReply, ListenOptions};
use netproxy_types::http::{HttpRequest, HttpResponse, HttpSocketInfo};
use netproxy_types::{NetAddress, ProxyError, ProxyResult};
use netproxy_wire::{CallHandler, Entity, EntityId, Port};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// State reachable from both the entity and the route handler.
struct Shared {
    life: Arc<Lifecycle<HttpServerProtocol>>,
    pending: DashMap<u64, oneshot::Sender<Response>>,
    next_request_id: AtomicU64,
}

#[derive(Clone)]
struct RouteState {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    max_body_bytes: usize,
}

struct Running {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
}

pub struct HttpServerEntity {
    id: EntityId,
    ctx: HostContext,
    shared: Arc<Shared>,
    running: Slot<Running>,
}

impl HttpServerEntity {
    pub fn spawn(ctx: &HostContext, id: EntityId, port_end: Port<HttpServerProtocol>) -> Arc<Self> {
        let (sender, receiver) = port_end.split();
        let life = Lifecycle::new(id, sender.clone());
        let shutdown = life.subscribe();
        let entity = Arc::new(Self {
            id,
            ctx: ctx.clone(),
            shared: Arc::new(Shared {
                life,
                pending: DashMap::new(),
                next_request_id: AtomicU64::new(0),
            }),
            running: Slot::new(),
        });
        spawn_entity(&ctx.registry, entity.clone(), sender, receiver, shutdown);
        entity
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running.map(|r| r.local_addr)
    }

    async fn listen(&self, options: ListenOptions) -> ProxyResult<()> {
        if self.shared.life.is_disposed() {
            return Err(ProxyError::Disposed(self.id));
        }
        let ticket = self.running.reserve().ok_or_else(already_listening)?;
        let result = self.start_serving(ticket, options).await;
        if result.is_err() {
            self.running.release(ticket);
        }
        result
    }

    async fn start_serving(&self, ticket: u64, options: ListenOptions) -> ProxyResult<()> {
        let ip = resolve_bind_host(&self.ctx, options.hostname.as_deref()).await?;
        let backlog = options.backlog.unwrap_or(self.ctx.config.tcp.default_backlog);
        let listener = bind_listener(SocketAddr::new(ip, options.port.unwrap_or(0)), backlog)?;
        let local_addr = listener.local_addr()?;

        let state = RouteState {
            shared: Arc::clone(&self.shared),
            local_addr,
            max_body_bytes: self.ctx.config.http.max_body_bytes,
        };
        let app = Router::new().fallback(forward_request).with_state(state);
        let life = Arc::clone(&self.shared.life);

        let started = self.running.fill_with(ticket, || {
            let (stop, mut stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                let server = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                );
                tokio::select! {
                    result = server => {
                        if let Err(e) = result {
                            warn!(id = life.id(), error = %e, "HTTP server error");
                            life.emit(HttpServerEvent::Error(e.to_string()));
                        }
                    }
                    _ = stop_rx.changed() => {}
                }
                info!(id = life.id(), %local_addr, "HTTP server stopped");
                life.emit(HttpServerEvent::Close);
            });
            Running { local_addr, stop }
        });
        if !started {
            debug!(id = self.id, %local_addr, "Listen cancelled by close");
            return Err(closed_while_binding());
        }

        info!(id = self.id, %local_addr, backlog, "HTTP server listening");
        Ok(())
    }

    /// Stop accepting, or cancel a listen still binding. Parked requests can
    /// still be answered.
    fn stop(&self) -> bool {
        match self.running.take() {
            Some(running) => {
                running.stop.send_replace(true);
                true
            }
            None => false,
        }
    }

    fn respond(&self, request_id: u64, response: HttpResponse) -> ProxyResult<()> {
        let Some((_, waiter)) = self.shared.pending.remove(&request_id) else {
            return Err(ProxyError::UnknownRequest(request_id));
        };
        let response = build_response(response)?;
        if waiter.send(response).is_err() {
            debug!(id = self.id, request_id, "HTTP client went away before the response");
        }
        Ok(())
    }
}

/// Removes a parked request when its connection future is dropped.
struct Parked {
    shared: Arc<Shared>,
    request_id: u64,
}

impl Drop for Parked {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.request_id);
    }
}

async fn forward_request(
    State(state): State<RouteState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > state.max_body_bytes) {
        return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
    }
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(%peer, error = %e, "Failed to read HTTP request body");
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let shared = &state.shared;
    let request_id = shared.next_request_id.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    shared.pending.insert(request_id, tx);
    let _parked = Parked {
        shared: Arc::clone(shared),
        request_id,
    };

    let request = HttpRequest {
        method: parts.method.to_string(),
        url: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        http_version: version_text(parts.version).to_string(),
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
        socket: HttpSocketInfo {
            local_address: Some(state.local_addr.ip().to_string()),
            local_port: Some(state.local_addr.port()),
            remote_address: Some(peer.ip().to_string()),
            remote_port: Some(peer.port()),
        },
    };
    debug!(id = shared.life.id(), request_id, method = %request.method, url = %request.url, "HTTP request parked");
    shared.life.emit(HttpServerEvent::Request {
        request_id,
        request,
    });

    match rx.await {
        Ok(response) => response,
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Server closed").into_response(),
    }
}

fn version_text(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

fn invalid(message: impl std::fmt::Display) -> ProxyError {
    ProxyError::Io(io::Error::new(io::ErrorKind::InvalidInput, message.to_string()))
}

fn build_response(response: HttpResponse) -> ProxyResult<Response> {
    let status = StatusCode::from_u16(response.status_code).map_err(invalid)?;
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(invalid)?;
        let value = HeaderValue::from_str(value).map_err(invalid)?;
        builder = builder.header(name, value);
    }
    let body = response.body.map(Body::from).unwrap_or_else(Body::empty);
    builder.body(body).map_err(invalid)
}

#[async_trait]
impl CallHandler<HttpServerProtocol> for HttpServerEntity {
    type Error = ProxyError;

    async fn handle(&self, call: HttpServerCall) -> ProxyResult<HttpServerReply> {
        match call {
            HttpServerCall::Address => Ok(HttpServerReply::Address(
                self.local_addr().map(NetAddress::from),
            )),
            HttpServerCall::Listen(options) => {
                self.listen(options).await?;
                Ok(HttpServerReply::Done)
            }
            HttpServerCall::Response {
                request_id,
                response,
            } => {
                self.respond(request_id, response)?;
                Ok(HttpServerReply::Done)
            }
            HttpServerCall::Close => {
                self.stop();
                Ok(HttpServerReply::Done)
            }
            HttpServerCall::Dispose => {
                Entity::dispose(self);
                Ok(HttpServerReply::Done)
            }
        }
    }
}

impl Entity for HttpServerEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "http_server"
    }

    fn dispose(&self) {
        if self.shared.life.begin_dispose() {
            debug!(id = self.id, "Disposing HTTP server");
        }
        self.stop();
        // Dropping the waiters answers parked requests with 503.
        self.shared.pending.clear();
    }
}
