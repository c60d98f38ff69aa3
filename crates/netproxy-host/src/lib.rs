//! Privileged side of netproxy.
//!
//! Each proxied resource is an entity: a tokio socket or server wrapped in a
//! [`CallHandler`](netproxy_wire::CallHandler) and served over its own
//! channel. [`Host`] creates top-level entities and hands back the caller's
//! end of their channels; servers create further entities as connections
//! arrive.

pub mod entity;
pub mod host;
pub mod http_server;
pub mod tcp_server;
pub mod tcp_socket;
pub mod udp_socket;

pub use host::{Host, HostContext};
pub use http_server::HttpServerEntity;
pub use tcp_server::TcpServerEntity;
pub use tcp_socket::TcpSocketEntity;
pub use udp_socket::UdpSocketEntity;
