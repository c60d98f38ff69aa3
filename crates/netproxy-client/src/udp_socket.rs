use crate::ProxyCallResult;
use bytes::Bytes;
use netproxy_proto::{BindOptions, UdpSocketCall, UdpSocketProtocol, UdpSocketReply};
use netproxy_types::NetAddress;
use netproxy_wire::{EventReceiver, Named, Port, Transport, WireError};
use std::net::Ipv4Addr;

/// Caller-side handle to a proxied UDP socket.
pub struct UdpSocketProxy {
    transport: Transport<UdpSocketProtocol>,
}

impl UdpSocketProxy {
    pub fn new(port: Port<UdpSocketProtocol>) -> (Self, EventReceiver<UdpSocketProtocol>) {
        let (transport, events) = Transport::new(port);
        (Self { transport }, events)
    }

    async fn done(&self, call: UdpSocketCall) -> ProxyCallResult<()> {
        let method = call.name();
        match self.transport.call(call).await? {
            UdpSocketReply::Done => Ok(()),
            other => Err(WireError::unexpected(method, other)),
        }
    }

    async fn address(&self, call: UdpSocketCall) -> ProxyCallResult<Option<NetAddress>> {
        let method = call.name();
        match self.transport.call(call).await? {
            UdpSocketReply::Address(addr) => Ok(addr),
            other => Err(WireError::unexpected(method, other)),
        }
    }

    pub async fn remote_address(&self) -> ProxyCallResult<Option<NetAddress>> {
        self.address(UdpSocketCall::RemoteAddress).await
    }

    pub async fn local_address(&self) -> ProxyCallResult<Option<NetAddress>> {
        self.address(UdpSocketCall::LocalAddress).await
    }

    pub async fn fd(&self) -> ProxyCallResult<Option<i64>> {
        match self.transport.call(UdpSocketCall::Fd).await? {
            UdpSocketReply::Fd(fd) => Ok(fd),
            other => Err(WireError::unexpected("fd", other)),
        }
    }

    pub async fn bind(&self, options: BindOptions) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::Bind(options)).await
    }

    pub async fn add_membership(
        &self,
        group: Ipv4Addr,
        interface: Option<Ipv4Addr>,
    ) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::AddMembership { group, interface }).await
    }

    pub async fn drop_membership(
        &self,
        group: Ipv4Addr,
        interface: Option<Ipv4Addr>,
    ) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::DropMembership { group, interface }).await
    }

    pub async fn set_broadcast(&self, on: bool) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::SetBroadcast(on)).await
    }

    pub async fn set_multicast_interface(&self, iface: Ipv4Addr) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::SetMulticastInterface(iface)).await
    }

    pub async fn set_multicast_loopback(&self, on: bool) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::SetMulticastLoopback(on)).await
    }

    pub async fn set_multicast_ttl(&self, ttl: u32) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::SetMulticastTtl(ttl)).await
    }

    pub async fn set_recv_buffer_size(&self, size: usize) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::SetRecvBufferSize(size)).await
    }

    pub async fn set_send_buffer_size(&self, size: usize) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::SetSendBufferSize(size)).await
    }

    pub async fn set_ttl(&self, ttl: u32) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::SetTtl(ttl)).await
    }

    /// `address` is an IP literal or a hostname and defaults to loopback.
    pub async fn connect(&self, port: u16, address: Option<&str>) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::Connect {
            port,
            address: address.map(str::to_string),
        })
        .await
    }

    pub async fn disconnect(&self) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::Disconnect).await
    }

    /// Send to `port`/`address`, or to the connected peer when `port` is `None`.
    pub async fn send(
        &self,
        data: impl Into<Bytes>,
        port: Option<u16>,
        address: Option<&str>,
    ) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::Send {
            data: data.into(),
            port,
            address: address.map(str::to_string),
        })
        .await
    }

    pub async fn close(&self) -> ProxyCallResult<()> {
        self.done(UdpSocketCall::Close).await
    }

    pub async fn dispose(&self) -> ProxyCallResult<()> {
        let result = self.done(UdpSocketCall::Dispose).await;
        self.transport.dispose();
        result
    }
}
