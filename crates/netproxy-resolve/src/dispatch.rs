//! Resolution dispatcher: one lookup interface, two resolvers.

use crate::error::ResolveError;
use crate::mdns::MulticastResolver;
use async_trait::async_trait;
use netproxy_types::config::MdnsConfig;
use netproxy_types::AddressFamily;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Per-lookup options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// Only accept addresses of this family (standard resolver only).
    pub family: Option<AddressFamily>,
    /// Overrides the mDNS session timeout.
    pub timeout: Option<Duration>,
}

/// A resolved address and its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupAddress {
    pub address: IpAddr,
    pub family: AddressFamily,
}

impl LookupAddress {
    pub fn new(address: IpAddr) -> Self {
        Self {
            family: AddressFamily::of(&address),
            address,
        }
    }
}

/// The platform's ordinary hostname resolver.
#[async_trait]
pub trait StandardResolver: Send + Sync {
    async fn lookup(
        &self,
        hostname: &str,
        options: &LookupOptions,
    ) -> Result<LookupAddress, ResolveError>;
}

/// [`StandardResolver`] backed by the system's `getaddrinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl StandardResolver for SystemResolver {
    async fn lookup(
        &self,
        hostname: &str,
        options: &LookupOptions,
    ) -> Result<LookupAddress, ResolveError> {
        let mut addrs = tokio::net::lookup_host((hostname, 0)).await?;
        addrs
            .find(|addr| match options.family {
                Some(family) => AddressFamily::of(&addr.ip()) == family,
                None => true,
            })
            .map(|addr| LookupAddress::new(addr.ip()))
            .ok_or_else(|| ResolveError::NotFound {
                hostname: hostname.to_string(),
            })
    }
}

/// Routes local-suffix hostnames to mDNS and the rest to the standard resolver.
pub struct ResolutionDispatcher {
    mdns: MulticastResolver,
    standard: Arc<dyn StandardResolver>,
    local_suffix: String,
}

impl ResolutionDispatcher {
    pub fn new(mdns: MulticastResolver, standard: Arc<dyn StandardResolver>) -> Self {
        Self {
            mdns,
            standard,
            local_suffix: ".local".to_string(),
        }
    }

    /// Dispatcher over the host's interfaces and system resolver.
    pub fn from_config(config: &MdnsConfig) -> Self {
        Self::new(MulticastResolver::from_config(config), Arc::new(SystemResolver))
            .with_local_suffix(&config.local_suffix)
    }

    pub fn with_local_suffix(mut self, suffix: &str) -> Self {
        self.local_suffix = suffix.to_string();
        self
    }

    pub fn mdns(&self) -> &MulticastResolver {
        &self.mdns
    }

    /// Whether `hostname` goes to the multicast resolver.
    pub fn is_local(&self, hostname: &str) -> bool {
        hostname.ends_with(&self.local_suffix)
    }

    /// Resolve `hostname` to a single address.
    ///
    /// A local hostname whose mDNS session ends without an answer fails with
    /// [`ResolveError::Timeout`].
    pub async fn lookup(
        &self,
        hostname: &str,
        options: &LookupOptions,
    ) -> Result<LookupAddress, ResolveError> {
        if !self.is_local(hostname) {
            return self.standard.lookup(hostname, options).await;
        }

        debug!(hostname, "Resolving over mDNS");
        match self.mdns.query(hostname, options.timeout).await? {
            Some(answer) => Ok(LookupAddress {
                address: IpAddr::V4(answer.address),
                family: answer.family(),
            }),
            None => Err(ResolveError::Timeout {
                hostname: hostname.to_string(),
            }),
        }
    }
}

impl fmt::Debug for ResolutionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionDispatcher")
            .field("mdns", &self.mdns)
            .field("local_suffix", &self.local_suffix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::encode_answer;
    use crate::testing::FakeNet;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// Records every hostname it is asked for and answers 203.0.113.7.
    #[derive(Default)]
    struct StubResolver {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StandardResolver for StubResolver {
        async fn lookup(
            &self,
            hostname: &str,
            _options: &LookupOptions,
        ) -> Result<LookupAddress, ResolveError> {
            self.seen.lock().unwrap().push(hostname.to_string());
            Ok(LookupAddress::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))))
        }
    }

    fn dispatcher(net: FakeNet) -> (ResolutionDispatcher, Arc<StubResolver>, Arc<crate::testing::Counters>) {
        let counters = Arc::clone(&net.counters);
        let stub = Arc::new(StubResolver::default());
        let mdns = MulticastResolver::new(Arc::new(net));
        (ResolutionDispatcher::new(mdns, stub.clone()), stub, counters)
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_suffix_goes_to_mdns() {
        let printer = Ipv4Addr::new(192, 168, 1, 20);
        let net = FakeNet::with_interfaces(1)
            .deliver_after(Duration::from_millis(50), encode_answer("printer.local", printer));
        let (dispatcher, stub, counters) = dispatcher(net);

        let resolved = dispatcher
            .lookup("printer.local", &LookupOptions::default())
            .await
            .unwrap();

        assert_eq!(resolved.address, IpAddr::V4(printer));
        assert_eq!(resolved.family, AddressFamily::IPv4);
        assert!(stub.seen.lock().unwrap().is_empty());
        assert_eq!(counters.opened(), 1);
    }

    #[tokio::test]
    async fn test_other_hosts_go_to_standard_resolver() {
        let (dispatcher, stub, counters) = dispatcher(FakeNet::with_interfaces(1));

        let resolved = dispatcher
            .lookup("example.com", &LookupOptions::default())
            .await
            .unwrap();

        assert_eq!(resolved.address, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(*stub.seen.lock().unwrap(), vec!["example.com".to_string()]);
        assert_eq!(counters.opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mdns_no_answer_is_timeout_error() {
        let (dispatcher, _stub, _counters) = dispatcher(FakeNet::with_interfaces(1));

        let options = LookupOptions {
            timeout: Some(Duration::from_millis(200)),
            ..LookupOptions::default()
        };
        let err = dispatcher.lookup("printer.local", &options).await.unwrap_err();
        assert_eq!(err.to_string(), "mDNS resolution timed out for \"printer.local\"");
    }

    #[tokio::test]
    async fn test_no_interfaces_propagates() {
        let (dispatcher, _stub, _counters) = dispatcher(FakeNet::with_interfaces(0));
        let err = dispatcher
            .lookup("printer.local", &LookupOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoInterfaces));
    }

    #[test]
    fn test_custom_suffix() {
        let (dispatcher, _stub, _counters) = dispatcher(FakeNet::with_interfaces(1));
        let dispatcher = dispatcher.with_local_suffix(".lan");
        assert!(dispatcher.is_local("nas.lan"));
        assert!(!dispatcher.is_local("printer.local"));
    }

    #[tokio::test]
    async fn test_system_resolver_literal_address() {
        let resolved = SystemResolver
            .lookup("127.0.0.1", &LookupOptions::default())
            .await
            .unwrap();
        assert_eq!(resolved.address, IpAddr::V4(Ipv4Addr::LOCALHOST));

        let wrong_family = LookupOptions {
            family: Some(AddressFamily::IPv6),
            ..LookupOptions::default()
        };
        let err = SystemResolver.lookup("127.0.0.1", &wrong_family).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }
}
