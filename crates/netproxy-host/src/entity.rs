//! Plumbing shared by every host entity.

use crate::host::HostContext;
use netproxy_resolve::LookupOptions;
use netproxy_types::{ProxyError, ProxyResult};
use netproxy_wire::{
    serve, CallHandler, Entity, EntityId, EntityRegistry, PortReceiver, PortSender, Protocol,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Disposal state and event outlet of one entity.
///
/// Once disposed, an entity emits nothing further and its serve loop is told
/// to stop.
pub struct Lifecycle<P: Protocol> {
    id: EntityId,
    events: PortSender<P>,
    disposed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl<P: Protocol> Lifecycle<P> {
    pub fn new(id: EntityId, events: PortSender<P>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            id,
            events,
            disposed: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Emit an event unless the entity is disposed.
    pub fn emit(&self, event: P::Event) {
        if self.is_disposed() {
            trace!(entity = P::ENTITY, id = self.id, "Suppressing event after dispose");
            return;
        }
        self.events.emit(event);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Mark disposed and stop the serve loop. Returns `true` the first time.
    pub fn begin_dispose(&self) -> bool {
        let first = !self.disposed.swap(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        first
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

enum SlotState<T> {
    Vacant,
    Reserved(u64),
    Filled(T),
}

/// Holder for a resource whose setup awaits (a listener, a connection).
///
/// `reserve` claims the slot before the first `.await`, so overlapping
/// setups cannot both succeed. `take` empties the slot and also cancels a
/// setup still in flight: its later `fill_with` is refused.
pub struct Slot<T> {
    state: Mutex<SlotState<T>>,
    tickets: AtomicU64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Vacant),
            tickets: AtomicU64::new(0),
        }
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim a vacant slot. `None` if it is filled or being set up.
    pub fn reserve(&self) -> Option<u64> {
        let mut state = self.lock();
        match *state {
            SlotState::Vacant => {
                let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
                *state = SlotState::Reserved(ticket);
                Some(ticket)
            }
            _ => None,
        }
    }

    /// Complete the reservation `ticket` with the value `make` builds.
    /// `make` only runs, under the lock, while the reservation still stands.
    pub fn fill_with(&self, ticket: u64, make: impl FnOnce() -> T) -> bool {
        let mut state = self.lock();
        match *state {
            SlotState::Reserved(held) if held == ticket => {
                *state = SlotState::Filled(make());
                true
            }
            _ => false,
        }
    }

    /// Give up the reservation `ticket` after a failed setup.
    pub fn release(&self, ticket: u64) {
        let mut state = self.lock();
        if matches!(*state, SlotState::Reserved(held) if held == ticket) {
            *state = SlotState::Vacant;
        }
    }

    /// Empty the slot, cancelling any setup in flight.
    pub fn take(&self) -> Option<T> {
        match std::mem::replace(&mut *self.lock(), SlotState::Vacant) {
            SlotState::Filled(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &*self.lock() {
            SlotState::Filled(value) => Some(f(value)),
            _ => None,
        }
    }
}

/// Register an entity and serve its channel until it is disposed or the
/// caller goes away. Either way the entity ends disposed and unregistered.
pub fn spawn_entity<P, E>(
    registry: &EntityRegistry,
    entity: Arc<E>,
    sender: PortSender<P>,
    receiver: PortReceiver<P>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    P: Protocol,
    E: Entity + CallHandler<P>,
{
    let id = entity.id();
    registry.register(id, entity.clone());
    let registry = registry.clone();

    tokio::spawn(async move {
        let exit = serve(receiver, sender, entity.as_ref(), shutdown).await;
        debug!(entity = P::ENTITY, id, ?exit, "Entity serve loop ended");
        entity.dispose();
        registry.unregister(id);
    })
}

/// Resolve a listen/bind hostname. `None` means every IPv4 interface.
pub async fn resolve_bind_host(ctx: &HostContext, hostname: Option<&str>) -> ProxyResult<IpAddr> {
    resolve_host(ctx, hostname, IpAddr::V4(Ipv4Addr::UNSPECIFIED)).await
}

/// Resolve a destination hostname. `None` means loopback.
pub async fn resolve_peer_host(ctx: &HostContext, hostname: Option<&str>) -> ProxyResult<IpAddr> {
    resolve_host(ctx, hostname, IpAddr::V4(Ipv4Addr::LOCALHOST)).await
}

async fn resolve_host(
    ctx: &HostContext,
    hostname: Option<&str>,
    default: IpAddr,
) -> ProxyResult<IpAddr> {
    let Some(hostname) = hostname else {
        return Ok(default);
    };
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(ip);
    }
    ctx.dispatcher
        .lookup(hostname, &LookupOptions::default())
        .await
        .map(|resolved| resolved.address)
        .map_err(|e| ProxyError::Resolve(e.to_string()))
}

pub fn already_listening() -> ProxyError {
    std::io::Error::new(std::io::ErrorKind::AlreadyExists, "Server is already listening").into()
}

/// Failure of a listen that a `Close` overtook while it was still binding.
pub fn closed_while_binding() -> ProxyError {
    std::io::Error::new(
        std::io::ErrorKind::Interrupted,
        "Server was closed before it started listening",
    )
    .into()
}

/// Bind and listen with address reuse and an explicit backlog.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Raw descriptor of a socket, where the platform has one.
#[cfg(unix)]
pub fn raw_fd<S: std::os::fd::AsRawFd>(socket: &S) -> Option<i64> {
    Some(i64::from(socket.as_raw_fd()))
}

#[cfg(not(unix))]
pub fn raw_fd<S>(_socket: &S) -> Option<i64> {
    None
}
