//! Caller-side HTTP server.
//!
//! Requests arrive as events; each one is run through an [`HttpHandler`] on
//! its own task and answered with a `Response` call. A handler error becomes
//! a 500 whose body is the error text.

use crate::ProxyCallResult;
use async_trait::async_trait;
use netproxy_proto::{HttpServerCall, HttpServerEvent, HttpServerProtocol, HttpServerReply, ListenOptions};
use netproxy_types::http::{HttpRequest, HttpResponse};
use netproxy_types::NetAddress;
use netproxy_wire::{EventReceiver, Port, Transport, WireError};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the response to one proxied HTTP request.
#[async_trait]
pub trait HttpHandler: Send + Sync + 'static {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HandlerError>;
}

/// Answers every request with `404 Not Found`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundHandler;

#[async_trait]
impl HttpHandler for NotFoundHandler {
    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse, HandlerError> {
        Ok(HttpResponse::text(404, "Not Found"))
    }
}

pub struct HttpServerProxy {
    transport: Arc<Transport<HttpServerProtocol>>,
}

impl HttpServerProxy {
    /// Wrap `port`, answering requests with `handler`. The returned receiver
    /// carries the remaining events (`Close`, `Error`).
    pub fn new(
        port: Port<HttpServerProtocol>,
        handler: Arc<dyn HttpHandler>,
    ) -> (Self, EventReceiver<HttpServerProtocol>) {
        let (transport, events) = Transport::new(port);
        let transport = Arc::new(transport);
        let (others_tx, others_rx) = mpsc::unbounded_channel();

        tokio::spawn(route_requests(
            events,
            Arc::downgrade(&transport),
            handler,
            others_tx,
        ));

        (Self { transport }, others_rx)
    }

    async fn done(&self, method: &'static str, call: HttpServerCall) -> ProxyCallResult<()> {
        match self.transport.call(call).await? {
            HttpServerReply::Done => Ok(()),
            other => Err(WireError::unexpected(method, other)),
        }
    }

    pub async fn address(&self) -> ProxyCallResult<Option<NetAddress>> {
        match self.transport.call(HttpServerCall::Address).await? {
            HttpServerReply::Address(addr) => Ok(addr),
            other => Err(WireError::unexpected("address", other)),
        }
    }

    pub async fn listen(&self, options: ListenOptions) -> ProxyCallResult<()> {
        self.done("listen", HttpServerCall::Listen(options)).await
    }

    pub async fn close(&self) -> ProxyCallResult<()> {
        self.done("close", HttpServerCall::Close).await
    }

    pub async fn dispose(&self) -> ProxyCallResult<()> {
        let result = self.done("dispose", HttpServerCall::Dispose).await;
        self.transport.dispose();
        result
    }
}

async fn route_requests(
    mut events: EventReceiver<HttpServerProtocol>,
    transport: Weak<Transport<HttpServerProtocol>>,
    handler: Arc<dyn HttpHandler>,
    others: mpsc::UnboundedSender<HttpServerEvent>,
) {
    while let Some(event) = events.recv().await {
        let HttpServerEvent::Request {
            request_id,
            request,
        } = event
        else {
            let _ = others.send(event);
            continue;
        };

        let handler = Arc::clone(&handler);
        let transport = transport.clone();
        tokio::spawn(async move {
            let response = match handler.handle(request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(request_id, error = %e, "HTTP handler failed");
                    HttpResponse::text(500, e.to_string())
                }
            };
            let Some(transport) = transport.upgrade() else {
                return;
            };
            if let Err(e) = transport
                .call(HttpServerCall::Response {
                    request_id,
                    response,
                })
                .await
            {
                warn!(request_id, error = %e, "Failed to deliver HTTP response");
            }
        });
    }
}
