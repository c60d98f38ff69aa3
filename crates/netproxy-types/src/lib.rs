//! Shared types for the netproxy socket proxy.
//!
//! This crate defines the data structures used on both sides of a proxied
//! entity channel: addresses, HTTP request/response records, configuration,
//! and the entity-level error taxonomy. It contains no business logic.

pub mod address;
pub mod config;
pub mod error;
pub mod http;

pub use address::{AddressFamily, NetAddress, RemoteInfo};
pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
