//! Scripted in-memory network for resolver tests.

use crate::net::{MulticastNet, MulticastSocket};
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Counters shared by a fake net and every socket it opened.
#[derive(Default)]
pub(crate) struct Counters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub sends: Mutex<Vec<(Ipv4Addr, Instant)>>,
}

impl Counters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn send_times(&self) -> Vec<Instant> {
        self.sends.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

pub(crate) struct FakeNet {
    interfaces: Vec<Ipv4Addr>,
    /// Datagrams each socket receives, at an offset from its opening.
    script: Vec<(Duration, Vec<u8>)>,
    unopenable: Vec<Ipv4Addr>,
    /// Interfaces whose socket's receive fails, at an offset from opening.
    failing: Vec<(Ipv4Addr, Duration)>,
    responder: SocketAddr,
    pub counters: Arc<Counters>,
}

impl FakeNet {
    pub fn with_interfaces(count: u8) -> Self {
        Self {
            interfaces: (1..=count).map(|i| Ipv4Addr::new(192, 168, i, 10)).collect(),
            script: Vec::new(),
            unopenable: Vec::new(),
            failing: Vec::new(),
            responder: "192.168.1.50:5353".parse().unwrap(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn deliver_after(mut self, delay: Duration, datagram: Vec<u8>) -> Self {
        self.script.push((delay, datagram));
        self
    }

    pub fn unopenable(mut self, iface: Ipv4Addr) -> Self {
        self.unopenable.push(iface);
        self
    }

    pub fn receive_fails_after(mut self, iface: Ipv4Addr, delay: Duration) -> Self {
        self.failing.push((iface, delay));
        self
    }

    pub fn responder(&self) -> SocketAddr {
        self.responder
    }
}

#[async_trait]
impl MulticastNet for FakeNet {
    fn interfaces(&self) -> io::Result<Vec<Ipv4Addr>> {
        Ok(self.interfaces.clone())
    }

    async fn open(&self, iface: Ipv4Addr) -> io::Result<Box<dyn MulticastSocket>> {
        if self.unopenable.contains(&iface) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let script = self.script.clone();
        let feeder_tx = tx.clone();
        let start = Instant::now();
        let fails_at = self
            .failing
            .iter()
            .find(|(failing, _)| *failing == iface)
            .map(|(_, delay)| start + *delay);
        let feeder = tokio::spawn(async move {
            for (delay, datagram) in script {
                tokio::time::sleep_until(start + delay).await;
                let _ = feeder_tx.send(datagram);
            }
        });

        Ok(Box::new(FakeSocket {
            iface,
            rx: tokio::sync::Mutex::new(rx),
            _tx: tx,
            feeder,
            fails_at,
            responder: self.responder,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeSocket {
    iface: Ipv4Addr,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    // Keeps the inbox open so an idle socket waits instead of failing.
    _tx: mpsc::UnboundedSender<Vec<u8>>,
    feeder: JoinHandle<()>,
    fails_at: Option<Instant>,
    responder: SocketAddr,
    counters: Arc<Counters>,
}

#[async_trait]
impl MulticastSocket for FakeSocket {
    async fn send_query(&self, _packet: &[u8]) -> io::Result<()> {
        self.counters
            .sends
            .lock()
            .unwrap()
            .push((self.iface, Instant::now()));
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if let Some(at) = self.fails_at {
            tokio::time::sleep_until(at).await;
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, self.responder))
            }
            None => std::future::pending().await,
        }
    }
}

impl Drop for FakeSocket {
    fn drop(&mut self) {
        self.feeder.abort();
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}
