//! HTTP server vocabulary.
//!
//! Each inbound request is announced with a `Request` event carrying a fresh
//! request id. The caller answers it with a `Response` call for that id.

use crate::ListenOptions;
use netproxy_types::http::{HttpRequest, HttpResponse};
use netproxy_types::NetAddress;
use netproxy_wire::{Named, Protocol};

/// Marker for an HTTP server channel.
pub enum HttpServerProtocol {}

impl Protocol for HttpServerProtocol {
    const ENTITY: &'static str = "http_server";
    type Call = HttpServerCall;
    type Reply = HttpServerReply;
    type Event = HttpServerEvent;
}

#[derive(Debug)]
pub enum HttpServerCall {
    Address,
    Listen(ListenOptions),
    Response {
        request_id: u64,
        response: HttpResponse,
    },
    Close,
    Dispose,
}

impl Named for HttpServerCall {
    fn name(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Listen(_) => "listen",
            Self::Response { .. } => "response",
            Self::Close => "close",
            Self::Dispose => "dispose",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum HttpServerReply {
    Address(Option<NetAddress>),
    Done,
}

#[derive(Debug)]
pub enum HttpServerEvent {
    Request {
        request_id: u64,
        request: HttpRequest,
    },
    Close,
    Error(String),
}

impl Named for HttpServerEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Close => "close",
            Self::Error(_) => "error",
        }
    }
}
