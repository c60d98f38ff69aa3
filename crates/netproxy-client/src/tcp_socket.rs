use crate::ProxyCallResult;
use bytes::Bytes;
use netproxy_proto::{TcpSocketCall, TcpSocketProtocol, TcpSocketReply};
use netproxy_types::NetAddress;
use netproxy_wire::{EventReceiver, Named, Port, Transport, WireError};
use std::time::Duration;

/// Caller-side handle to a proxied TCP socket.
pub struct TcpSocketProxy {
    transport: Transport<TcpSocketProtocol>,
}

impl TcpSocketProxy {
    pub fn new(port: Port<TcpSocketProtocol>) -> (Self, EventReceiver<TcpSocketProtocol>) {
        let (transport, events) = Transport::new(port);
        (Self { transport }, events)
    }

    async fn done(&self, call: TcpSocketCall) -> ProxyCallResult<()> {
        let method = call.name();
        match self.transport.call(call).await? {
            TcpSocketReply::Done => Ok(()),
            other => Err(WireError::unexpected(method, other)),
        }
    }

    async fn address(&self, call: TcpSocketCall) -> ProxyCallResult<Option<NetAddress>> {
        let method = call.name();
        match self.transport.call(call).await? {
            TcpSocketReply::Address(addr) => Ok(addr),
            other => Err(WireError::unexpected(method, other)),
        }
    }

    pub async fn remote_address(&self) -> ProxyCallResult<Option<NetAddress>> {
        self.address(TcpSocketCall::RemoteAddress).await
    }

    pub async fn local_address(&self) -> ProxyCallResult<Option<NetAddress>> {
        self.address(TcpSocketCall::LocalAddress).await
    }

    pub async fn fd(&self) -> ProxyCallResult<Option<i64>> {
        match self.transport.call(TcpSocketCall::Fd).await? {
            TcpSocketReply::Fd(fd) => Ok(fd),
            other => Err(WireError::unexpected("fd", other)),
        }
    }

    pub async fn connected(&self) -> ProxyCallResult<bool> {
        match self.transport.call(TcpSocketCall::Connected).await? {
            TcpSocketReply::Connected(connected) => Ok(connected),
            other => Err(WireError::unexpected("connected", other)),
        }
    }

    pub async fn connect(&self) -> ProxyCallResult<()> {
        self.done(TcpSocketCall::Connect).await
    }

    pub async fn write(&self, data: impl Into<Bytes>) -> ProxyCallResult<()> {
        self.done(TcpSocketCall::Write(data.into())).await
    }

    pub async fn set_keep_alive(
        &self,
        enable: bool,
        initial_delay: Option<Duration>,
    ) -> ProxyCallResult<()> {
        self.done(TcpSocketCall::SetKeepAlive {
            enable,
            initial_delay,
        })
        .await
    }

    /// Zero disables the idle timeout.
    pub async fn set_timeout(&self, timeout: Duration) -> ProxyCallResult<()> {
        self.done(TcpSocketCall::SetTimeout { timeout }).await
    }

    pub async fn set_no_delay(&self, no_delay: bool) -> ProxyCallResult<()> {
        self.done(TcpSocketCall::SetNoDelay { no_delay }).await
    }

    pub async fn close(&self) -> ProxyCallResult<()> {
        self.done(TcpSocketCall::Close).await
    }

    /// Dispose the remote socket, then detach from the channel.
    pub async fn dispose(&self) -> ProxyCallResult<()> {
        let result = self.done(TcpSocketCall::Dispose).await;
        self.transport.dispose();
        result
    }
}
