//! TCP socket entity.
//!
//! A socket is created either unconnected, for a host and port given at
//! creation time, or already connected by a server's accept loop. Connecting
//! resolves the host through the resolution dispatcher, so `.local` names
//! work. Once connected, a reader task turns inbound bytes into `Data`
//! events and reports `Timeout`, `End` and `Close`.

use crate::entity::{raw_fd, spawn_entity, Lifecycle};
use crate::host::HostContext;
use async_trait::async_trait;
use bytes::BytesMut;
use netproxy_proto::{TcpSocketCall, TcpSocketEvent, TcpSocketProtocol, TcpSocketReply};
use netproxy_resolve::LookupOptions;
use netproxy_types::{NetAddress, ProxyError, ProxyResult};
use netproxy_wire::{CallHandler, Entity, EntityId, Port};
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Options set before connecting are remembered and applied on connect.
#[derive(Debug, Clone, Copy, Default)]
struct SocketOptions {
    no_delay: Option<bool>,
    keep_alive: Option<(bool, Option<Duration>)>,
}

pub struct TcpSocketEntity {
    id: EntityId,
    host: String,
    port: u16,
    ctx: HostContext,
    life: Arc<Lifecycle<TcpSocketProtocol>>,
    me: Weak<TcpSocketEntity>,
    stream: Mutex<Option<Arc<TcpStream>>>,
    write_lock: tokio::sync::Mutex<()>,
    connect_lock: tokio::sync::Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
    options: Mutex<SocketOptions>,
    /// Idle timeout in milliseconds; zero disables.
    idle_timeout_ms: AtomicU64,
    timeout_changed: Notify,
    close_emitted: AtomicBool,
}

impl TcpSocketEntity {
    /// Create an unconnected socket for `host:port` and serve it on `port_end`.
    pub fn spawn(
        ctx: &HostContext,
        id: EntityId,
        host: &str,
        port: u16,
        port_end: Port<TcpSocketProtocol>,
    ) -> Arc<Self> {
        Self::spawn_inner(ctx, id, host.to_string(), port, None, port_end)
    }

    /// Wrap a connection accepted by a server.
    pub fn spawn_accepted(
        ctx: &HostContext,
        id: EntityId,
        stream: TcpStream,
        peer: SocketAddr,
        port_end: Port<TcpSocketProtocol>,
    ) -> Arc<Self> {
        Self::spawn_inner(ctx, id, peer.ip().to_string(), peer.port(), Some(stream), port_end)
    }

    fn spawn_inner(
        ctx: &HostContext,
        id: EntityId,
        host: String,
        port: u16,
        stream: Option<TcpStream>,
        port_end: Port<TcpSocketProtocol>,
    ) -> Arc<Self> {
        let (sender, receiver) = port_end.split();
        let life = Lifecycle::new(id, sender.clone());
        let shutdown = life.subscribe();

        let entity = Arc::new_cyclic(|me| Self {
            id,
            host,
            port,
            ctx: ctx.clone(),
            life,
            me: me.clone(),
            stream: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
            connect_lock: tokio::sync::Mutex::new(()),
            reader: Mutex::new(None),
            options: Mutex::new(SocketOptions::default()),
            idle_timeout_ms: AtomicU64::new(0),
            timeout_changed: Notify::new(),
            close_emitted: AtomicBool::new(false),
        });

        if let Some(stream) = stream {
            entity.attach(stream);
        }
        spawn_entity(&ctx.registry, entity.clone(), sender, receiver, shutdown);
        entity
    }

    fn current_stream(&self) -> Option<Arc<TcpStream>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Install a connected stream and start reading from it.
    fn attach(&self, stream: TcpStream) {
        let stream = Arc::new(stream);
        *self.stream.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&stream));
        self.close_emitted.store(false, Ordering::SeqCst);

        if let Some(me) = self.me.upgrade() {
            let handle = tokio::spawn(me.read_loop(stream));
            let previous = self
                .reader
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .replace(handle);
            if let Some(previous) = previous {
                previous.abort();
            }
        }
    }

    async fn connect(&self) -> ProxyResult<()> {
        // Overlapping connects wait for the first; they then find it connected.
        let _connecting = self.connect_lock.lock().await;
        if self.current_stream().is_some() {
            return Ok(());
        }

        let resolved = self
            .ctx
            .dispatcher
            .lookup(&self.host, &LookupOptions::default())
            .await
            .map_err(|e| ProxyError::Resolve(e.to_string()))?;
        let stream = TcpStream::connect(SocketAddr::new(resolved.address, self.port)).await?;

        if self.life.is_disposed() {
            return Err(ProxyError::Disposed(self.id));
        }

        let options = *self.options.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(no_delay) = options.no_delay {
            stream.set_nodelay(no_delay)?;
        }
        if let Some((enable, delay)) = options.keep_alive {
            apply_keep_alive(&stream, enable, delay)?;
        }

        info!(id = self.id, host = %self.host, addr = %resolved.address, port = self.port, "TCP socket connected");
        self.attach(stream);
        self.life.emit(TcpSocketEvent::Connect);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> ProxyResult<()> {
        let stream = self.current_stream().ok_or(ProxyError::NotConnected)?;
        // Whole writes go out one at a time, in call order.
        let _guard = self.write_lock.lock().await;
        write_all(&stream, data).await?;
        Ok(())
    }

    /// Tear the connection down. Emits `Close` once per connection.
    fn close_connection(&self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        self.release_stream();
    }

    fn release_stream(&self) {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(stream) = stream {
            // In-flight writes may still hold the stream; shut it down now.
            let _ = SockRef::from(stream.as_ref()).shutdown(Shutdown::Both);
        }
        if !self.close_emitted.swap(true, Ordering::SeqCst) {
            self.life.emit(TcpSocketEvent::Close);
        }
    }

    fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    async fn read_loop(self: Arc<Self>, stream: Arc<TcpStream>) {
        let capacity = self.ctx.config.tcp.read_buffer_size.max(1);
        let mut buf = BytesMut::with_capacity(capacity);
        // After a timeout fires it stays quiet until the next activity.
        let mut idle_reported = false;

        loop {
            let idle = self.idle_timeout().filter(|_| !idle_reported);
            let ready = tokio::select! {
                ready = stream.readable() => ready,
                _ = idle_sleep(idle) => {
                    idle_reported = true;
                    self.life.emit(TcpSocketEvent::Timeout);
                    continue;
                }
                _ = self.timeout_changed.notified() => {
                    idle_reported = false;
                    continue;
                }
            };
            if let Err(e) = ready {
                self.life.emit(TcpSocketEvent::Error(e.to_string()));
                break;
            }

            buf.reserve(capacity);
            match stream.try_read_buf(&mut buf) {
                Ok(0) => {
                    debug!(id = self.id, "TCP peer ended the stream");
                    self.life.emit(TcpSocketEvent::End);
                    break;
                }
                Ok(_) => {
                    idle_reported = false;
                    self.life.emit(TcpSocketEvent::Data(buf.split().freeze()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    warn!(id = self.id, error = %e, "TCP read failed");
                    self.life.emit(TcpSocketEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        // Detach our own handle so closing does not abort this task.
        self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.release_stream();
    }
}

#[async_trait]
impl CallHandler<TcpSocketProtocol> for TcpSocketEntity {
    type Error = ProxyError;

    async fn handle(&self, call: TcpSocketCall) -> ProxyResult<TcpSocketReply> {
        match call {
            TcpSocketCall::RemoteAddress => Ok(TcpSocketReply::Address(
                self.current_stream()
                    .and_then(|s| s.peer_addr().ok())
                    .map(NetAddress::from),
            )),
            TcpSocketCall::LocalAddress => Ok(TcpSocketReply::Address(
                self.current_stream()
                    .and_then(|s| s.local_addr().ok())
                    .map(NetAddress::from),
            )),
            TcpSocketCall::Fd => Ok(TcpSocketReply::Fd(
                self.current_stream().and_then(|s| raw_fd(s.as_ref())),
            )),
            TcpSocketCall::SetKeepAlive {
                enable,
                initial_delay,
            } => {
                self.options.lock().unwrap_or_else(|e| e.into_inner()).keep_alive =
                    Some((enable, initial_delay));
                if let Some(stream) = self.current_stream() {
                    apply_keep_alive(&stream, enable, initial_delay)?;
                }
                Ok(TcpSocketReply::Done)
            }
            TcpSocketCall::SetTimeout { timeout } => {
                self.idle_timeout_ms
                    .store(timeout.as_millis() as u64, Ordering::Relaxed);
                self.timeout_changed.notify_waiters();
                Ok(TcpSocketReply::Done)
            }
            TcpSocketCall::SetNoDelay { no_delay } => {
                self.options.lock().unwrap_or_else(|e| e.into_inner()).no_delay = Some(no_delay);
                if let Some(stream) = self.current_stream() {
                    stream.set_nodelay(no_delay)?;
                }
                Ok(TcpSocketReply::Done)
            }
            TcpSocketCall::Connected => Ok(TcpSocketReply::Connected(self.current_stream().is_some())),
            TcpSocketCall::Connect => {
                self.connect().await?;
                Ok(TcpSocketReply::Done)
            }
            TcpSocketCall::Close => {
                self.close_connection();
                Ok(TcpSocketReply::Done)
            }
            TcpSocketCall::Dispose => {
                Entity::dispose(self);
                Ok(TcpSocketReply::Done)
            }
            TcpSocketCall::Write(data) => {
                self.write(&data).await?;
                Ok(TcpSocketReply::Done)
            }
        }
    }
}

impl Entity for TcpSocketEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "tcp_socket"
    }

    fn dispose(&self) {
        if self.life.begin_dispose() {
            debug!(id = self.id, host = %self.host, port = self.port, "Disposing TCP socket");
        }
        self.close_connection();
    }
}

fn apply_keep_alive(stream: &TcpStream, enable: bool, delay: Option<Duration>) -> io::Result<()> {
    let sock = SockRef::from(stream);
    match (enable, delay) {
        (false, _) => sock.set_keepalive(false),
        (true, Some(delay)) if !delay.is_zero() => {
            sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(delay))
        }
        (true, _) => sock.set_keepalive(true),
    }
}

async fn idle_sleep(idle: Option<Duration>) {
    match idle {
        Some(idle) => tokio::time::sleep(idle).await,
        None => std::future::pending().await,
    }
}

async fn write_all(stream: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        stream.writable().await?;
        match stream.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
