use crate::ProxyCallResult;
use netproxy_proto::{ListenOptions, TcpServerCall, TcpServerProtocol, TcpServerReply};
use netproxy_types::NetAddress;
use netproxy_wire::{EventReceiver, Port, Transport, WireError};

/// Caller-side handle to a proxied TCP server.
///
/// Accepted connections arrive as `Connection` events carrying a
/// `Port<TcpSocketProtocol>`; wrap it with
/// [`TcpSocketProxy::new`](crate::TcpSocketProxy::new).
pub struct TcpServerProxy {
    transport: Transport<TcpServerProtocol>,
}

impl TcpServerProxy {
    pub fn new(port: Port<TcpServerProtocol>) -> (Self, EventReceiver<TcpServerProtocol>) {
        let (transport, events) = Transport::new(port);
        (Self { transport }, events)
    }

    async fn done(&self, method: &'static str, call: TcpServerCall) -> ProxyCallResult<()> {
        match self.transport.call(call).await? {
            TcpServerReply::Done => Ok(()),
            other => Err(WireError::unexpected(method, other)),
        }
    }

    pub async fn address(&self) -> ProxyCallResult<Option<NetAddress>> {
        match self.transport.call(TcpServerCall::Address).await? {
            TcpServerReply::Address(addr) => Ok(addr),
            other => Err(WireError::unexpected("address", other)),
        }
    }

    pub async fn listen(&self, options: ListenOptions) -> ProxyCallResult<()> {
        self.done("listen", TcpServerCall::Listen(options)).await
    }

    pub async fn close(&self) -> ProxyCallResult<()> {
        self.done("close", TcpServerCall::Close).await
    }

    pub async fn dispose(&self) -> ProxyCallResult<()> {
        let result = self.done("dispose", TcpServerCall::Dispose).await;
        self.transport.dispose();
        result
    }
}
