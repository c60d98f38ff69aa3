//! UDP socket entity.

use crate::entity::{raw_fd, resolve_bind_host, resolve_peer_host, spawn_entity, Lifecycle};
use crate::host::HostContext;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use netproxy_proto::{BindOptions, UdpSocketCall, UdpSocketEvent, UdpSocketProtocol, UdpSocketReply};
use netproxy_types::{NetAddress, ProxyError, ProxyResult, RemoteInfo};
use netproxy_wire::{CallHandler, Entity, EntityId, Port};
use socket2::{Domain, SockAddr, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_536;

pub struct UdpSocketEntity {
    id: EntityId,
    ctx: HostContext,
    life: Arc<Lifecycle<UdpSocketProtocol>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    remote: Mutex<Option<SocketAddr>>,
}

impl UdpSocketEntity {
    pub fn spawn(ctx: &HostContext, id: EntityId, port_end: Port<UdpSocketProtocol>) -> Arc<Self> {
        let (sender, receiver) = port_end.split();
        let life = Lifecycle::new(id, sender.clone());
        let shutdown = life.subscribe();
        let entity = Arc::new(Self {
            id,
            ctx: ctx.clone(),
            life,
            socket: Mutex::new(None),
            receiver: Mutex::new(None),
            remote: Mutex::new(None),
        });
        spawn_entity(&ctx.registry, entity.clone(), sender, receiver, shutdown);
        entity
    }

    fn bound(&self) -> ProxyResult<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ProxyError::NotBound)
    }

    async fn bind(&self, options: BindOptions) -> ProxyResult<Arc<UdpSocket>> {
        let ip = resolve_bind_host(&self.ctx, options.address.as_deref()).await?;
        self.bind_addr(SocketAddr::new(ip, options.port.unwrap_or(0)), options.exclusive)
    }

    fn bind_addr(&self, addr: SocketAddr, exclusive: bool) -> ProxyResult<Arc<UdpSocket>> {
        if self.life.is_disposed() {
            return Err(ProxyError::Disposed(self.id));
        }
        let mut slot = self.socket.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "Socket is already bound").into());
        }

        let socket = Arc::new(open_socket(addr, exclusive)?);
        let local = socket.local_addr()?;

        let handle = tokio::spawn(receive_loop(Arc::clone(&socket), Arc::clone(&self.life)));
        *self.receiver.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        *slot = Some(Arc::clone(&socket));
        drop(slot);

        info!(id = self.id, %local, exclusive, "UDP socket bound");
        self.life.emit(UdpSocketEvent::Listening);
        Ok(socket)
    }

    /// Bind to an ephemeral port of the right family if not bound yet.
    fn bound_or_bind(&self, peer: IpAddr) -> ProxyResult<Arc<UdpSocket>> {
        if let Ok(socket) = self.bound() {
            return Ok(socket);
        }
        let any = match peer {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        self.bind_addr(SocketAddr::new(any, 0), false)
    }

    async fn connect(&self, port: u16, address: Option<&str>) -> ProxyResult<()> {
        let ip = resolve_peer_host(&self.ctx, address).await?;
        let peer = SocketAddr::new(ip, port);
        let socket = self.bound_or_bind(ip)?;
        socket.connect(peer).await?;
        *self.remote.lock().unwrap_or_else(|e| e.into_inner()) = Some(peer);
        debug!(id = self.id, %peer, "UDP socket connected");
        self.life.emit(UdpSocketEvent::Connect);
        Ok(())
    }

    fn disconnect(&self) -> ProxyResult<()> {
        let mut remote = self.remote.lock().unwrap_or_else(|e| e.into_inner());
        let Some(peer) = *remote else {
            return Err(ProxyError::NotConnected);
        };
        let socket = self.bound()?;
        dissolve_peer(&socket, peer)?;
        *remote = None;
        debug!(id = self.id, %peer, "UDP socket disconnected");
        Ok(())
    }

    async fn send(&self, data: Bytes, port: Option<u16>, address: Option<&str>) -> ProxyResult<()> {
        let connected = *self.remote.lock().unwrap_or_else(|e| e.into_inner());
        match (port, connected) {
            (None, Some(_)) => {
                let socket = self.bound()?;
                socket.send(&data).await?;
            }
            (None, None) => return Err(ProxyError::NotConnected),
            (Some(_), Some(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "Socket is connected; destination must be omitted",
                )
                .into());
            }
            (Some(port), None) => {
                let ip = resolve_peer_host(&self.ctx, address).await?;
                let socket = self.bound_or_bind(ip)?;
                socket.send_to(&data, SocketAddr::new(ip, port)).await?;
            }
        }
        Ok(())
    }

    /// Release the socket. Returns `true` if one was bound.
    fn release(&self) -> bool {
        if let Some(handle) = self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.remote.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
    }

    fn with_socket(&self, apply: impl FnOnce(&UdpSocket) -> io::Result<()>) -> ProxyResult<UdpSocketReply> {
        let socket = self.bound()?;
        apply(socket.as_ref())?;
        Ok(UdpSocketReply::Done)
    }
}

fn open_socket(addr: SocketAddr, exclusive: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(socket2::Protocol::UDP))?;
    if !exclusive {
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Drop the default destination of a connected datagram socket.
#[cfg(unix)]
fn dissolve_peer(socket: &UdpSocket, _peer: SocketAddr) -> io::Result<()> {
    // SAFETY: `try_init` hands over zeroed storage; tagging it `AF_UNSPEC`
    // yields a valid unspecified address.
    let ((), unspecified) = unsafe {
        SockAddr::try_init(|storage, _len| {
            (*storage).ss_family = libc::AF_UNSPEC as libc::sa_family_t;
            Ok(())
        })
    }?;
    match SockRef::from(socket).connect(&unspecified) {
        // Some kernels dissolve the association and still report this.
        Err(e) if e.raw_os_error() == Some(libc::EAFNOSUPPORT) => Ok(()),
        other => other,
    }
}

/// Drop the default destination of a connected datagram socket.
#[cfg(not(unix))]
fn dissolve_peer(socket: &UdpSocket, peer: SocketAddr) -> io::Result<()> {
    let any = match peer {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SockRef::from(socket).connect(&SockAddr::from(SocketAddr::new(any, 0)))
}

async fn receive_loop(socket: Arc<UdpSocket>, life: Arc<Lifecycle<UdpSocketProtocol>>) {
    let mut buf = BytesMut::with_capacity(MAX_DATAGRAM);
    loop {
        buf.clear();
        buf.reserve(MAX_DATAGRAM);
        match socket.recv_buf_from(&mut buf).await {
            Ok((size, from)) => {
                let data = buf.split_to(size).freeze();
                life.emit(UdpSocketEvent::Message {
                    data,
                    rinfo: RemoteInfo::new(from, size),
                });
            }
            // ICMP feedback from an earlier send on a connected socket.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                ) =>
            {
                debug!(id = life.id(), error = %e, "UDP peer unreachable");
                life.emit(UdpSocketEvent::Error(e.to_string()));
            }
            Err(e) => {
                warn!(id = life.id(), error = %e, "UDP receive failed");
                life.emit(UdpSocketEvent::Error(e.to_string()));
                return;
            }
        }
    }
}

#[async_trait]
impl CallHandler<UdpSocketProtocol> for UdpSocketEntity {
    type Error = ProxyError;

    async fn handle(&self, call: UdpSocketCall) -> ProxyResult<UdpSocketReply> {
        match call {
            UdpSocketCall::RemoteAddress => {
                let remote = *self.remote.lock().unwrap_or_else(|e| e.into_inner());
                Ok(UdpSocketReply::Address(remote.map(NetAddress::from)))
            }
            UdpSocketCall::LocalAddress => {
                let local = self.bound().ok().and_then(|s| s.local_addr().ok());
                Ok(UdpSocketReply::Address(local.map(NetAddress::from)))
            }
            UdpSocketCall::Fd => Ok(UdpSocketReply::Fd(
                self.bound().ok().and_then(|s| raw_fd(&*s)),
            )),
            UdpSocketCall::AddMembership { group, interface } => self.with_socket(|s| {
                s.join_multicast_v4(group, interface.unwrap_or(Ipv4Addr::UNSPECIFIED))
            }),
            UdpSocketCall::DropMembership { group, interface } => self.with_socket(|s| {
                s.leave_multicast_v4(group, interface.unwrap_or(Ipv4Addr::UNSPECIFIED))
            }),
            UdpSocketCall::Bind(options) => {
                self.bind(options).await?;
                Ok(UdpSocketReply::Done)
            }
            UdpSocketCall::SetBroadcast(on) => self.with_socket(|s| s.set_broadcast(on)),
            UdpSocketCall::SetMulticastInterface(iface) => {
                self.with_socket(|s| SockRef::from(s).set_multicast_if_v4(&iface))
            }
            UdpSocketCall::SetMulticastLoopback(on) => {
                self.with_socket(|s| s.set_multicast_loop_v4(on))
            }
            UdpSocketCall::SetMulticastTtl(ttl) => self.with_socket(|s| s.set_multicast_ttl_v4(ttl)),
            UdpSocketCall::SetRecvBufferSize(size) => {
                self.with_socket(|s| SockRef::from(s).set_recv_buffer_size(size))
            }
            UdpSocketCall::SetSendBufferSize(size) => {
                self.with_socket(|s| SockRef::from(s).set_send_buffer_size(size))
            }
            UdpSocketCall::SetTtl(ttl) => self.with_socket(|s| s.set_ttl(ttl)),
            UdpSocketCall::Connect { port, address } => {
                self.connect(port, address.as_deref()).await?;
                Ok(UdpSocketReply::Done)
            }
            UdpSocketCall::Disconnect => {
                self.disconnect()?;
                Ok(UdpSocketReply::Done)
            }
            UdpSocketCall::Close => {
                if self.release() {
                    info!(id = self.id, "UDP socket closed");
                    self.life.emit(UdpSocketEvent::Close);
                }
                Ok(UdpSocketReply::Done)
            }
            UdpSocketCall::Dispose => {
                Entity::dispose(self);
                Ok(UdpSocketReply::Done)
            }
            UdpSocketCall::Send { data, port, address } => {
                self.send(data, port, address.as_deref()).await?;
                Ok(UdpSocketReply::Done)
            }
        }
    }
}

impl Entity for UdpSocketEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "udp_socket"
    }

    fn dispose(&self) {
        if self.life.begin_dispose() {
            debug!(id = self.id, "Disposing UDP socket");
        }
        self.release();
    }
}
