//! Interface enumeration and per-interface multicast sockets.

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::debug;

/// Source of candidate interfaces and the sockets bound to them.
#[async_trait]
pub trait MulticastNet: Send + Sync {
    /// One IPv4 address per interface; interfaces without IPv4 are absent.
    fn interfaces(&self) -> io::Result<Vec<Ipv4Addr>>;

    /// Open a socket that has joined the mDNS group on `iface`.
    ///
    /// The socket is closed when the returned box is dropped.
    async fn open(&self, iface: Ipv4Addr) -> io::Result<Box<dyn MulticastSocket>>;
}

/// A socket dedicated to one interface for the length of a session.
#[async_trait]
pub trait MulticastSocket: Send + Sync {
    /// Send a query to the mDNS group.
    async fn send_query(&self, packet: &[u8]) -> io::Result<()>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// The host's real interfaces and UDP sockets.
#[derive(Debug, Clone)]
pub struct SystemNet {
    group: Ipv4Addr,
    port: u16,
}

impl SystemNet {
    pub fn new(group: Ipv4Addr, port: u16) -> Self {
        Self { group, port }
    }
}

#[async_trait]
impl MulticastNet for SystemNet {
    fn interfaces(&self) -> io::Result<Vec<Ipv4Addr>> {
        let mut seen: Vec<String> = Vec::new();
        let mut selected = Vec::new();
        for iface in if_addrs::get_if_addrs()? {
            let IpAddr::V4(ip) = iface.ip() else {
                continue;
            };
            // Group membership can only be added once per interface.
            if seen.contains(&iface.name) {
                continue;
            }
            seen.push(iface.name.clone());
            selected.push(ip);
        }
        debug!(count = selected.len(), "Enumerated mDNS interfaces");
        Ok(selected)
    }

    async fn open(&self, iface: Ipv4Addr) -> io::Result<Box<dyn MulticastSocket>> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;

        // On unix a socket bound to a unicast address never sees multicast
        // traffic, so bind the wildcard address and pin the group to `iface`.
        let bind_ip = if cfg!(windows) { iface } else { Ipv4Addr::UNSPECIFIED };
        socket.bind(&SocketAddrV4::new(bind_ip, self.port).into())?;
        socket.join_multicast_v4(&self.group, &iface)?;
        socket.set_multicast_if_v4(&iface)?;

        let socket = UdpSocket::from_std(socket.into())?;
        debug!(%iface, group = %self.group, port = self.port, "Opened mDNS socket");
        Ok(Box::new(SystemSocket {
            socket,
            target: SocketAddrV4::new(self.group, self.port).into(),
        }))
    }
}

struct SystemSocket {
    socket: UdpSocket,
    target: SocketAddr,
}

#[async_trait]
impl MulticastSocket for SystemSocket {
    async fn send_query(&self, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, self.target).await.map(|_| ())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}
