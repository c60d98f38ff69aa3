//! Host entry point: creates top-level entities.

use crate::http_server::HttpServerEntity;
use crate::tcp_server::TcpServerEntity;
use crate::tcp_socket::TcpSocketEntity;
use crate::udp_socket::UdpSocketEntity;
use netproxy_proto::{
    HttpServerProtocol, TcpServerProtocol, TcpSocketProtocol, UdpSocketProtocol,
};
use netproxy_resolve::ResolutionDispatcher;
use netproxy_types::ProxyConfig;
use netproxy_wire::{channel, EntityRegistry, Port};
use std::sync::Arc;
use tracing::info;

/// State shared by every entity a host creates.
#[derive(Clone)]
pub struct HostContext {
    pub registry: EntityRegistry,
    pub dispatcher: Arc<ResolutionDispatcher>,
    pub config: Arc<ProxyConfig>,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// The privileged side. Every `tcp_socket`/`tcp_server`/... call creates an
/// entity, registers it and returns the caller's end of its channel.
#[derive(Debug, Clone)]
pub struct Host {
    ctx: HostContext,
}

impl Host {
    /// Host with the system resolver and mDNS settings from `config`.
    pub fn new(config: ProxyConfig) -> Self {
        let dispatcher = Arc::new(ResolutionDispatcher::from_config(&config.mdns));
        Self::with_dispatcher(config, dispatcher)
    }

    pub fn with_dispatcher(config: ProxyConfig, dispatcher: Arc<ResolutionDispatcher>) -> Self {
        Self {
            ctx: HostContext {
                registry: EntityRegistry::new(),
                dispatcher,
                config: Arc::new(config),
            },
        }
    }

    pub fn context(&self) -> &HostContext {
        &self.ctx
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.ctx.registry
    }

    pub fn dispatcher(&self) -> &Arc<ResolutionDispatcher> {
        &self.ctx.dispatcher
    }

    /// An unconnected TCP socket for `host:port`.
    pub fn tcp_socket(&self, host: &str, port: u16) -> Port<TcpSocketProtocol> {
        let (caller, callee) = channel();
        TcpSocketEntity::spawn(&self.ctx, self.ctx.registry.next_id(), host, port, callee);
        caller
    }

    pub fn tcp_server(&self) -> Port<TcpServerProtocol> {
        let (caller, callee) = channel();
        TcpServerEntity::spawn(&self.ctx, self.ctx.registry.next_id(), callee);
        caller
    }

    pub fn udp_socket(&self) -> Port<UdpSocketProtocol> {
        let (caller, callee) = channel();
        UdpSocketEntity::spawn(&self.ctx, self.ctx.registry.next_id(), callee);
        caller
    }

    pub fn http_server(&self) -> Port<HttpServerProtocol> {
        let (caller, callee) = channel();
        HttpServerEntity::spawn(&self.ctx, self.ctx.registry.next_id(), callee);
        caller
    }

    /// Dispose every live entity.
    pub fn shutdown(&self) {
        let live = self.ctx.registry.len();
        self.ctx.registry.dispose_all();
        info!(disposed = live, "Host shut down");
    }
}
