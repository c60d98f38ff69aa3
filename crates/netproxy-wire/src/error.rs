//! Errors from the wire layer.

use thiserror::Error;

/// Errors surfaced to the caller side of a channel.
#[derive(Debug, Error)]
pub enum WireError {
    /// The callee's handler failed; carries its textual description.
    #[error("{0}")]
    Remote(String),
    /// The transport was disposed before the call was issued.
    #[error("Transport disposed")]
    Disposed,
    /// The other end of the channel is gone.
    #[error("Channel closed")]
    ChannelClosed,
    /// The callee answered with a reply that does not belong to the call.
    #[error("Unexpected reply to '{method}': {reply}")]
    UnexpectedReply { method: &'static str, reply: String },
}

impl WireError {
    /// Build an [`WireError::UnexpectedReply`] from any debuggable reply.
    pub fn unexpected(method: &'static str, reply: impl std::fmt::Debug) -> Self {
        Self::UnexpectedReply {
            method,
            reply: format!("{reply:?}"),
        }
    }
}
