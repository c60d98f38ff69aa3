//! Sandboxed side of netproxy.
//!
//! Each proxy wraps a [`Transport`](netproxy_wire::Transport) over the
//! caller's end of an entity channel and exposes the entity's calls as
//! typed async methods. Events are handed out as a separate receiver when
//! the proxy is created.

pub mod http_server;
pub mod tcp_server;
pub mod tcp_socket;
pub mod udp_socket;

pub use http_server::{HandlerError, HttpHandler, HttpServerProxy, NotFoundHandler};
pub use tcp_server::TcpServerProxy;
pub use tcp_socket::TcpSocketProxy;
pub use udp_socket::UdpSocketProxy;

use netproxy_wire::WireError;

/// Result of a proxied call.
pub type ProxyCallResult<T> = Result<T, WireError>;
