//! Hostname resolution for proxied sockets.
//!
//! Hostnames ending in the local suffix (`.local` by default) are resolved by
//! racing mDNS `A` queries across every IPv4 interface; everything else goes
//! to the platform resolver. [`ResolutionDispatcher`] picks the path.

pub mod dispatch;
pub mod error;
pub mod mdns;
pub mod net;
pub mod packet;

#[cfg(test)]
mod testing;

pub use dispatch::{
    LookupAddress, LookupOptions, ResolutionDispatcher, StandardResolver, SystemResolver,
};
pub use error::ResolveError;
pub use mdns::{MdnsAnswer, MulticastResolver, RetryPolicy};
pub use net::{MulticastNet, MulticastSocket, SystemNet};
