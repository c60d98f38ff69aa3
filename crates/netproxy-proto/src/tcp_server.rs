//! TCP server vocabulary.

use crate::tcp_socket::TcpSocketProtocol;
use crate::ListenOptions;
use netproxy_types::NetAddress;
use netproxy_wire::{Named, Port, Protocol};

/// Marker for a TCP server channel.
pub enum TcpServerProtocol {}

impl Protocol for TcpServerProtocol {
    const ENTITY: &'static str = "tcp_server";
    type Call = TcpServerCall;
    type Reply = TcpServerReply;
    type Event = TcpServerEvent;
}

#[derive(Debug)]
pub enum TcpServerCall {
    Address,
    Listen(ListenOptions),
    Close,
    Dispose,
}

impl Named for TcpServerCall {
    fn name(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Listen(_) => "listen",
            Self::Close => "close",
            Self::Dispose => "dispose",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TcpServerReply {
    Address(Option<NetAddress>),
    Done,
}

#[derive(Debug)]
pub enum TcpServerEvent {
    Close,
    /// An accepted connection. The port is the caller's end of the new
    /// socket entity's channel.
    Connection(Port<TcpSocketProtocol>),
    Error(String),
}

impl Named for TcpServerEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Connection(_) => "connection",
            Self::Error(_) => "error",
        }
    }
}
