//! Socket address records exchanged across entity channels.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Address family of an IP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    #[serde(rename = "IPv4")]
    IPv4,
    #[serde(rename = "IPv6")]
    IPv6,
}

impl AddressFamily {
    /// Family of an IP address.
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::IPv4,
            IpAddr::V6(_) => Self::IPv6,
        }
    }

    /// Numeric family as reported by resolvers (`4` or `6`).
    pub fn number(self) -> u8 {
        match self {
            Self::IPv4 => 4,
            Self::IPv6 => 6,
        }
    }

    /// Parse a numeric family (`4` or `6`).
    pub fn from_number(family: u8) -> Option<Self> {
        match family {
            4 => Some(Self::IPv4),
            6 => Some(Self::IPv6),
            _ => None,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IPv4 => f.write_str("IPv4"),
            Self::IPv6 => f.write_str("IPv6"),
        }
    }
}

/// A bound or connected endpoint: `{ address, family, port }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddress {
    /// Textual IP address.
    pub address: String,
    /// Address family.
    pub family: AddressFamily,
    /// Port number.
    pub port: u16,
}

impl From<SocketAddr> for NetAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            family: AddressFamily::of(&addr.ip()),
            port: addr.port(),
        }
    }
}

/// Sender information attached to a received datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInfo {
    pub address: String,
    pub family: AddressFamily,
    pub port: u16,
    /// Datagram size in bytes.
    pub size: usize,
}

impl RemoteInfo {
    pub fn new(from: SocketAddr, size: usize) -> Self {
        Self {
            address: from.ip().to_string(),
            family: AddressFamily::of(&from.ip()),
            port: from.port(),
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_address_from_v6() {
        let addr: SocketAddr = "[::1]:8080".parse().unwrap();
        let net = NetAddress::from(addr);
        assert_eq!(net.address, "::1");
        assert_eq!(net.family, AddressFamily::IPv6);
        assert_eq!(net.port, 8080);
    }

    #[test]
    fn test_family_serializes_like_node() {
        let json = serde_json::to_string(&AddressFamily::IPv4).unwrap();
        assert_eq!(json, "\"IPv4\"");
        assert_eq!(AddressFamily::from_number(6), Some(AddressFamily::IPv6));
        assert_eq!(AddressFamily::from_number(5), None);
    }
}
