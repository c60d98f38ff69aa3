//! Multicast DNS resolver: first answer across all interfaces wins.
//!
//! A query session opens one socket per IPv4 interface, sends an `A` query on
//! each and keeps re-sending at a jittered interval until the session ends.
//! The first matching answer on any socket concludes the session; so does the
//! session timeout, which yields "no answer" rather than an error. Every
//! socket is dropped (closed) when the session future returns, whichever way
//! it ends.

use crate::error::ResolveError;
use crate::net::{MulticastNet, MulticastSocket, SystemNet};
use crate::packet::{encode_query, match_answer};
use futures::stream::{FuturesUnordered, StreamExt};
use netproxy_types::config::MdnsConfig;
use netproxy_types::AddressFamily;
use rand::Rng;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Session timeout when the caller does not give one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8000);

/// Largest datagram accepted from a responder.
const MAX_DATAGRAM: usize = 9000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Re-send cadence: `base` plus a uniformly random `0..=jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next re-send.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// The winning answer of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsAnswer {
    /// Hostname the answer was for.
    pub name: String,
    pub address: Ipv4Addr,
    /// Responder that sent the answer.
    pub sender: SocketAddr,
}

impl MdnsAnswer {
    /// Family of the resolved address (always IPv4).
    pub fn family(&self) -> AddressFamily {
        AddressFamily::IPv4
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves hostnames by multicast query. Explicitly constructed and owned by
/// whatever performs lookups.
pub struct MulticastResolver {
    net: Arc<dyn MulticastNet>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl MulticastResolver {
    pub fn new(net: Arc<dyn MulticastNet>) -> Self {
        Self {
            net,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolver over the host's interfaces, configured from `[mdns]`.
    pub fn from_config(config: &MdnsConfig) -> Self {
        Self::new(Arc::new(SystemNet::new(config.group, config.port)))
            .with_retry(RetryPolicy {
                base: Duration::from_millis(config.retry_base_ms),
                jitter: Duration::from_millis(config.retry_jitter_ms),
            })
            .with_timeout(config.timeout())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Interfaces a session would query on.
    pub fn interfaces(&self) -> Result<Vec<Ipv4Addr>, ResolveError> {
        Ok(self.net.interfaces()?)
    }

    /// Run one resolution session for `hostname`.
    ///
    /// Returns `Ok(None)` when no answer arrived within `timeout` (or the
    /// resolver's default). Fails immediately with
    /// [`ResolveError::NoInterfaces`] when there is nothing to query on.
    pub async fn query(
        &self,
        hostname: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<MdnsAnswer>, ResolveError> {
        let interfaces = self.net.interfaces()?;
        if interfaces.is_empty() {
            return Err(ResolveError::NoInterfaces);
        }

        let packet = encode_query(hostname)?;
        let timeout = timeout.unwrap_or(self.timeout);
        let deadline = Instant::now() + timeout;

        let mut sockets: Vec<(Ipv4Addr, Box<dyn MulticastSocket>)> = Vec::new();
        let mut last_error = None;
        for iface in interfaces {
            match self.net.open(iface).await {
                Ok(socket) => sockets.push((iface, socket)),
                Err(e) => {
                    warn!(%iface, error = %e, "Skipping interface for mDNS query");
                    last_error = Some(e);
                }
            }
        }
        if sockets.is_empty() {
            return Err(last_error.map(ResolveError::Io).unwrap_or(ResolveError::NoInterfaces));
        }

        debug!(hostname, sockets = sockets.len(), ?timeout, "mDNS session started");

        let mut race: FuturesUnordered<_> = sockets
            .iter()
            .map(|(iface, socket)| query_on_socket(socket.as_ref(), *iface, &packet, hostname, self.retry))
            .collect();

        let first_answer = async {
            while let Some(outcome) = race.next().await {
                if outcome.is_some() {
                    return outcome;
                }
            }
            None
        };

        let outcome = tokio::time::timeout_at(deadline, first_answer).await;
        // Losing queries stop here, then their sockets close.
        drop(race);
        drop(sockets);

        match outcome {
            Ok(Some(answer)) => {
                info!(hostname, address = %answer.address, sender = %answer.sender, "mDNS answer");
                Ok(Some(answer))
            }
            Ok(None) => {
                debug!(hostname, "All mDNS sockets failed before an answer");
                Ok(None)
            }
            Err(_) => {
                debug!(hostname, ?timeout, "mDNS session timed out");
                Ok(None)
            }
        }
    }
}

impl fmt::Debug for MulticastResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MulticastResolver")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Query on one socket until it hears a matching answer or fails to receive.
async fn query_on_socket(
    socket: &dyn MulticastSocket,
    iface: Ipv4Addr,
    packet: &[u8],
    hostname: &str,
    retry: RetryPolicy,
) -> Option<MdnsAnswer> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut next_send = Instant::now();

    loop {
        tokio::select! {
            _ = sleep_until(next_send) => {
                if let Err(e) = socket.send_query(packet).await {
                    debug!(%iface, error = %e, "mDNS send failed");
                }
                next_send = Instant::now() + retry.next_delay();
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, sender)) => {
                    if let Some(address) = match_answer(&buf[..len], hostname) {
                        return Some(MdnsAnswer {
                            name: hostname.to_string(),
                            address,
                            sender,
                        });
                    }
                }
                Err(e) => {
                    warn!(%iface, error = %e, "mDNS receive failed, dropping interface");
                    return None;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::encode_answer;
    use crate::testing::FakeNet;

    fn resolver(net: FakeNet) -> (MulticastResolver, Arc<crate::testing::Counters>) {
        let counters = Arc::clone(&net.counters);
        (MulticastResolver::new(Arc::new(net)), counters)
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_within_50ms_wins() {
        let printer = Ipv4Addr::new(192, 168, 1, 20);
        let net = FakeNet::with_interfaces(1)
            .deliver_after(Duration::from_millis(50), encode_answer("printer.local", printer));
        let responder = net.responder();
        let (resolver, counters) = resolver(net);

        let start = Instant::now();
        let answer = resolver.query("printer.local", None).await.unwrap().unwrap();

        assert_eq!(answer.address, printer);
        assert_eq!(answer.sender, responder);
        assert_eq!(answer.family(), AddressFamily::IPv4);
        assert!(start.elapsed() < Duration::from_millis(1000));
        assert_eq!(counters.send_times().len(), 1);

        // Nothing is sent after the win.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counters.send_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_answer_at_timeout_not_before() {
        let (resolver, _counters) = resolver(FakeNet::with_interfaces(1));

        let start = Instant::now();
        let outcome = resolver
            .query("printer.local", Some(Duration::from_millis(200)))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(outcome.is_none());
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_zero_interfaces_rejects_without_sockets() {
        let (resolver, counters) = resolver(FakeNet::with_interfaces(0));

        let err = resolver.query("printer.local", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoInterfaces));
        assert_eq!(counters.opened(), 0);
        assert_eq!(counters.closed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_socket_closed_after_win() {
        let net = FakeNet::with_interfaces(3).deliver_after(
            Duration::from_millis(30),
            encode_answer("printer.local", Ipv4Addr::new(10, 0, 0, 9)),
        );
        let (resolver, counters) = resolver(net);

        assert!(resolver.query("printer.local", None).await.unwrap().is_some());
        assert_eq!(counters.opened(), 3);
        assert_eq!(counters.closed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_socket_closed_after_timeout() {
        let (resolver, counters) = resolver(FakeNet::with_interfaces(3));

        let outcome = resolver
            .query("printer.local", Some(Duration::from_millis(300)))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(counters.opened(), 3);
        assert_eq!(counters.closed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_unmatched_packets_ignored() {
        let printer = Ipv4Addr::new(192, 168, 1, 20);
        let net = FakeNet::with_interfaces(1)
            .deliver_after(Duration::from_millis(10), vec![0xff; 7])
            .deliver_after(
                Duration::from_millis(20),
                encode_answer("scanner.local", Ipv4Addr::new(10, 0, 0, 1)),
            )
            .deliver_after(Duration::from_millis(1600), encode_answer("printer.local", printer));
        let (resolver, counters) = resolver(net);

        let answer = resolver.query("printer.local", None).await.unwrap().unwrap();
        assert_eq!(answer.address, printer);
        // The session kept retrying while it waited.
        assert_eq!(counters.send_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cadence_is_base_plus_jitter() {
        let (resolver, counters) = resolver(FakeNet::with_interfaces(1));

        let outcome = resolver
            .query("printer.local", Some(Duration::from_millis(6000)))
            .await
            .unwrap();
        assert!(outcome.is_none());

        let sends = counters.send_times();
        assert!(sends.len() >= 4, "only {} sends", sends.len());
        for pair in sends.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1000), "{gap:?}");
            assert!(gap <= Duration::from_millis(1500), "{gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unopenable_interface_is_skipped() {
        let printer = Ipv4Addr::new(192, 168, 2, 20);
        let net = FakeNet::with_interfaces(2)
            .unopenable(Ipv4Addr::new(192, 168, 1, 10))
            .deliver_after(Duration::from_millis(40), encode_answer("printer.local", printer));
        let (resolver, counters) = resolver(net);

        let answer = resolver.query("printer.local", None).await.unwrap().unwrap();
        assert_eq!(answer.address, printer);
        assert_eq!(counters.opened(), 1);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_errors_end_session_early() {
        let net = (1..=3).fold(FakeNet::with_interfaces(3), |net, i| {
            net.receive_fails_after(Ipv4Addr::new(192, 168, i, 10), Duration::from_millis(20))
        });
        let (resolver, counters) = resolver(net);

        let start = Instant::now();
        let outcome = resolver
            .query("printer.local", Some(Duration::from_millis(5000)))
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(start.elapsed() < Duration::from_millis(100), "{:?}", start.elapsed());
        assert_eq!(counters.opened(), 3);
        assert_eq!(counters.closed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_wins_despite_failing_socket() {
        let printer = Ipv4Addr::new(192, 168, 2, 20);
        let net = FakeNet::with_interfaces(2)
            .receive_fails_after(Ipv4Addr::new(192, 168, 1, 10), Duration::from_millis(10))
            .deliver_after(Duration::from_millis(50), encode_answer("printer.local", printer));
        let (resolver, counters) = resolver(net);

        let answer = resolver.query("printer.local", None).await.unwrap().unwrap();
        assert_eq!(answer.address, printer);
        assert_eq!(counters.opened(), 2);
        assert_eq!(counters.closed(), 2);
    }

    #[tokio::test]
    async fn test_all_interfaces_unopenable_is_an_error() {
        let net = FakeNet::with_interfaces(1).unopenable(Ipv4Addr::new(192, 168, 1, 10));
        let (resolver, _counters) = resolver(net);

        let err = resolver.query("printer.local", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::Io(_)));
    }

    #[test]
    fn test_retry_delay_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
        let fixed = RetryPolicy {
            base: Duration::from_millis(250),
            jitter: Duration::ZERO,
        };
        assert_eq!(fixed.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_config_uses_settings() {
        let config = MdnsConfig {
            timeout_ms: 1500,
            retry_base_ms: 200,
            retry_jitter_ms: 0,
            ..MdnsConfig::default()
        };
        let resolver = MulticastResolver::from_config(&config);
        assert_eq!(resolver.default_timeout(), Duration::from_millis(1500));
        assert_eq!(resolver.retry.next_delay(), Duration::from_millis(200));
    }
}
