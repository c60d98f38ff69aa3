//! UDP socket vocabulary.

use bytes::Bytes;
use netproxy_types::{NetAddress, RemoteInfo};
use netproxy_wire::{Named, Protocol};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Marker for a UDP socket channel.
pub enum UdpSocketProtocol {}

impl Protocol for UdpSocketProtocol {
    const ENTITY: &'static str = "udp_socket";
    type Call = UdpSocketCall;
    type Reply = UdpSocketReply;
    type Event = UdpSocketEvent;
}

/// Arguments of `Bind`. Unset port means ephemeral, unset address means any.
///
/// Addresses here and in `Connect`/`Send` are IP literals or hostnames; the
/// host resolves hostnames the same way TCP sockets do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOptions {
    pub port: Option<u16>,
    pub address: Option<String>,
    /// Refuse to share the port with other sockets.
    #[serde(default)]
    pub exclusive: bool,
}

#[derive(Debug)]
pub enum UdpSocketCall {
    RemoteAddress,
    LocalAddress,
    Fd,
    AddMembership {
        group: Ipv4Addr,
        interface: Option<Ipv4Addr>,
    },
    DropMembership {
        group: Ipv4Addr,
        interface: Option<Ipv4Addr>,
    },
    Bind(BindOptions),
    SetBroadcast(bool),
    SetMulticastInterface(Ipv4Addr),
    SetMulticastLoopback(bool),
    SetMulticastTtl(u32),
    SetRecvBufferSize(usize),
    SetSendBufferSize(usize),
    SetTtl(u32),
    /// Fix the default destination. Address defaults to loopback.
    Connect {
        port: u16,
        address: Option<String>,
    },
    /// Drop the default destination. The socket stays bound.
    Disconnect,
    Close,
    Dispose,
    /// Send a datagram. Destination may be omitted on a connected socket.
    Send {
        data: Bytes,
        port: Option<u16>,
        address: Option<String>,
    },
}

impl Named for UdpSocketCall {
    fn name(&self) -> &'static str {
        match self {
            Self::RemoteAddress => "remote_address",
            Self::LocalAddress => "local_address",
            Self::Fd => "fd",
            Self::AddMembership { .. } => "add_membership",
            Self::DropMembership { .. } => "drop_membership",
            Self::Bind(_) => "bind",
            Self::SetBroadcast(_) => "set_broadcast",
            Self::SetMulticastInterface(_) => "set_multicast_interface",
            Self::SetMulticastLoopback(_) => "set_multicast_loopback",
            Self::SetMulticastTtl(_) => "set_multicast_ttl",
            Self::SetRecvBufferSize(_) => "set_recv_buffer_size",
            Self::SetSendBufferSize(_) => "set_send_buffer_size",
            Self::SetTtl(_) => "set_ttl",
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::Close => "close",
            Self::Dispose => "dispose",
            Self::Send { .. } => "send",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum UdpSocketReply {
    Address(Option<NetAddress>),
    Fd(Option<i64>),
    Done,
}

#[derive(Debug)]
pub enum UdpSocketEvent {
    Listening,
    Connect,
    Close,
    Error(String),
    Message { data: Bytes, rinfo: RemoteInfo },
}

impl Named for UdpSocketEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Connect => "connect",
            Self::Close => "close",
            Self::Error(_) => "error",
            Self::Message { .. } => "message",
        }
    }
}
