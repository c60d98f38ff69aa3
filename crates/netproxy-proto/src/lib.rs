//! Call, reply and event vocabularies for each proxied entity kind.
//!
//! Every entity kind is a [`Protocol`](netproxy_wire::Protocol) marker type
//! with closed enums for its calls, replies and events. Both sides match on
//! these exhaustively; there is no lookup by method name.

pub mod http_server;
pub mod tcp_server;
pub mod tcp_socket;
pub mod udp_socket;

pub use http_server::{HttpServerCall, HttpServerEvent, HttpServerProtocol, HttpServerReply};
pub use tcp_server::{TcpServerCall, TcpServerEvent, TcpServerProtocol, TcpServerReply};
pub use tcp_socket::{TcpSocketCall, TcpSocketEvent, TcpSocketProtocol, TcpSocketReply};
pub use udp_socket::{BindOptions, UdpSocketCall, UdpSocketEvent, UdpSocketProtocol, UdpSocketReply};

use serde::{Deserialize, Serialize};

/// Arguments of a server `Listen` call. Unset fields take platform defaults:
/// an ephemeral port, every interface, the configured backlog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenOptions {
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub backlog: Option<u32>,
}

impl ListenOptions {
    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}
