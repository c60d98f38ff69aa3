//! TCP server entity.
//!
//! Each accepted connection becomes its own socket entity: a fresh id from the
//! registry, a fresh channel, and a `Connection` event that carries the
//! caller's end of that channel. From then on the connection is independent
//! of the server.

use crate::entity::{
    already_listening, bind_listener, closed_while_binding, resolve_bind_host, spawn_entity,
    Lifecycle, Slot,
};
use crate::host::HostContext;
use crate::tcp_socket::TcpSocketEntity;
use async_trait::async_trait;
use netproxy_proto::{
    ListenOptions, TcpServerCall, TcpServerEvent, TcpServerProtocol, TcpServerReply,
    TcpSocketProtocol,
};
use netproxy_types::{NetAddress, ProxyError, ProxyResult};
use netproxy_wire::{channel, CallHandler, Entity, EntityId, Port};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct Listening {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

pub struct TcpServerEntity {
    id: EntityId,
    ctx: HostContext,
    life: Arc<Lifecycle<TcpServerProtocol>>,
    listening: Slot<Listening>,
}

impl TcpServerEntity {
    pub fn spawn(ctx: &HostContext, id: EntityId, port_end: Port<TcpServerProtocol>) -> Arc<Self> {
        let (sender, receiver) = port_end.split();
        let life = Lifecycle::new(id, sender.clone());
        let shutdown = life.subscribe();
        let entity = Arc::new(Self {
            id,
            ctx: ctx.clone(),
            life,
            listening: Slot::new(),
        });
        spawn_entity(&ctx.registry, entity.clone(), sender, receiver, shutdown);
        entity
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.map(|l| l.local_addr)
    }

    async fn listen(&self, options: ListenOptions) -> ProxyResult<()> {
        if self.life.is_disposed() {
            return Err(ProxyError::Disposed(self.id));
        }
        let ticket = self.listening.reserve().ok_or_else(already_listening)?;
        let result = self.start_listening(ticket, options).await;
        if result.is_err() {
            self.listening.release(ticket);
        }
        result
    }

    async fn start_listening(&self, ticket: u64, options: ListenOptions) -> ProxyResult<()> {
        let ip = resolve_bind_host(&self.ctx, options.hostname.as_deref()).await?;
        let backlog = options.backlog.unwrap_or(self.ctx.config.tcp.default_backlog);
        let listener = bind_listener(SocketAddr::new(ip, options.port.unwrap_or(0)), backlog)?;
        let local_addr = listener.local_addr()?;

        let started = self.listening.fill_with(ticket, || Listening {
            local_addr,
            accept_task: tokio::spawn(accept_loop(
                listener,
                self.ctx.clone(),
                Arc::clone(&self.life),
            )),
        });
        if !started {
            debug!(id = self.id, %local_addr, "Listen cancelled by close");
            return Err(closed_while_binding());
        }

        info!(id = self.id, %local_addr, backlog, "TCP server listening");
        Ok(())
    }

    /// Stop accepting, or cancel a listen still binding. Already accepted
    /// connections are unaffected.
    fn stop(&self) -> bool {
        match self.listening.take() {
            Some(listening) => {
                listening.accept_task.abort();
                info!(id = self.id, local_addr = %listening.local_addr, "TCP server closed");
                true
            }
            None => false,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: HostContext,
    life: Arc<Lifecycle<TcpServerProtocol>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let id = ctx.registry.next_id();
                let (caller_end, entity_end) = channel::<TcpSocketProtocol>();
                TcpSocketEntity::spawn_accepted(&ctx, id, stream, peer, entity_end);
                debug!(server = life.id(), socket = id, %peer, "Accepted connection");
                life.emit(TcpServerEvent::Connection(caller_end));
            }
            Err(e) => {
                error!(server = life.id(), error = %e, "TCP accept error");
                life.emit(TcpServerEvent::Error(e.to_string()));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl CallHandler<TcpServerProtocol> for TcpServerEntity {
    type Error = ProxyError;

    async fn handle(&self, call: TcpServerCall) -> ProxyResult<TcpServerReply> {
        match call {
            TcpServerCall::Address => Ok(TcpServerReply::Address(
                self.local_addr().map(NetAddress::from),
            )),
            TcpServerCall::Listen(options) => {
                self.listen(options).await?;
                Ok(TcpServerReply::Done)
            }
            TcpServerCall::Close => {
                if self.stop() {
                    self.life.emit(TcpServerEvent::Close);
                }
                Ok(TcpServerReply::Done)
            }
            TcpServerCall::Dispose => {
                Entity::dispose(self);
                Ok(TcpServerReply::Done)
            }
        }
    }
}

impl Entity for TcpServerEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "tcp_server"
    }

    fn dispose(&self) {
        if self.life.begin_dispose() {
            debug!(id = self.id, "Disposing TCP server");
        }
        self.stop();
    }
}
