//! Resolution error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No IPv4 interface to send an mDNS query on. Nothing was opened.
    #[error("No interfaces to send an mDNS request")]
    NoInterfaces,

    /// The mDNS session ended without an answer.
    #[error("mDNS resolution timed out for \"{hostname}\"")]
    Timeout { hostname: String },

    #[error("Invalid hostname \"{hostname}\": {reason}")]
    InvalidHostname { hostname: String, reason: String },

    #[error("DNS packet error: {0}")]
    Packet(String),

    /// The standard resolver returned no address of the requested family.
    #[error("No address found for \"{hostname}\"")]
    NotFound { hostname: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
