//! Entity-level error types.
//!
//! These errors never cross a channel as values: the callee converts them to
//! their `Display` text and ships that text as the failure half of a response.

use thiserror::Error;

/// Error raised by an entity while executing a proxied call.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The socket has no established connection.
    #[error("Socket is not connected")]
    NotConnected,

    /// The datagram socket has not been bound yet.
    #[error("Socket is not bound")]
    NotBound,

    /// The server is not listening.
    #[error("Server is not listening")]
    NotListening,

    /// The entity was already disposed.
    #[error("Entity {0} is disposed")]
    Disposed(u64),

    /// An address string could not be parsed or has the wrong family.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// An HTTP response referenced a request id that is not parked.
    #[error("unknown requestId {0}")]
    UnknownRequest(u64),

    /// Hostname resolution failed.
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with ProxyError.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_request_text() {
        assert_eq!(
            ProxyError::UnknownRequest(7).to_string(),
            "unknown requestId 7"
        );
    }

    #[test]
    fn test_io_conversion() {
        let err: ProxyError =
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use").into();
        assert!(err.to_string().contains("address in use"));
    }
}
