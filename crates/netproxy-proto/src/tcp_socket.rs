//! TCP socket vocabulary.

use bytes::Bytes;
use netproxy_types::NetAddress;
use netproxy_wire::{Named, Protocol};
use std::time::Duration;

/// Marker for a TCP socket channel.
pub enum TcpSocketProtocol {}

impl Protocol for TcpSocketProtocol {
    const ENTITY: &'static str = "tcp_socket";
    type Call = TcpSocketCall;
    type Reply = TcpSocketReply;
    type Event = TcpSocketEvent;
}

#[derive(Debug)]
pub enum TcpSocketCall {
    RemoteAddress,
    LocalAddress,
    /// OS descriptor of the socket, where the platform has one.
    Fd,
    SetKeepAlive {
        enable: bool,
        initial_delay: Option<Duration>,
    },
    /// Emit `Timeout` after this much inactivity. Zero disables.
    SetTimeout {
        timeout: Duration,
    },
    SetNoDelay {
        no_delay: bool,
    },
    Connected,
    /// Connect to the host and port the socket was created for.
    Connect,
    Close,
    Dispose,
    Write(Bytes),
}

impl Named for TcpSocketCall {
    fn name(&self) -> &'static str {
        match self {
            Self::RemoteAddress => "remote_address",
            Self::LocalAddress => "local_address",
            Self::Fd => "fd",
            Self::SetKeepAlive { .. } => "set_keep_alive",
            Self::SetTimeout { .. } => "set_timeout",
            Self::SetNoDelay { .. } => "set_no_delay",
            Self::Connected => "connected",
            Self::Connect => "connect",
            Self::Close => "close",
            Self::Dispose => "dispose",
            Self::Write(_) => "write",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TcpSocketReply {
    Address(Option<NetAddress>),
    Fd(Option<i64>),
    Connected(bool),
    Done,
}

#[derive(Debug)]
pub enum TcpSocketEvent {
    Connect,
    Close,
    /// The peer finished sending.
    End,
    Timeout,
    Error(String),
    Data(Bytes),
}

impl Named for TcpSocketEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Close => "close",
            Self::End => "end",
            Self::Timeout => "timeout",
            Self::Error(_) => "error",
            Self::Data(_) => "data",
        }
    }
}
