//! Frame shapes carried over an entity channel.
//!
//! A channel carries three shapes:
//!
//! ```text
//! Call     { call_id, call }      caller -> callee
//! Response { call_id, result }    callee -> caller, result = Ok(reply) | Err(text)
//! Event    (event)                callee -> caller, uncorrelated
//! ```
//!
//! The vocabulary of calls, replies and events is closed per entity kind and
//! supplied by a [`Protocol`] implementation, so dispatch is an exhaustive
//! `match` instead of a lookup by method name.

use std::fmt;

/// Call identifier, unique among the in-flight calls of one transport.
pub type CallId = u64;

/// Stable name of a call or event variant, used in logs.
pub trait Named {
    fn name(&self) -> &'static str;
}

/// The call/reply/event vocabulary of one entity kind.
pub trait Protocol: Send + Sync + 'static {
    /// Entity kind, used in logs (`"tcp_socket"`, `"tcp_server"`, ...).
    const ENTITY: &'static str;

    type Call: Named + fmt::Debug + Send + 'static;
    type Reply: fmt::Debug + Send + 'static;
    type Event: Named + fmt::Debug + Send + 'static;
}

/// One message on a channel.
pub enum Frame<P: Protocol> {
    /// Invoke a method on the callee.
    Call { call_id: CallId, call: P::Call },
    /// Completion of the call with the same id. `Err` carries failure text.
    Response {
        call_id: CallId,
        result: Result<P::Reply, String>,
    },
    /// Asynchronous notification from the callee.
    Event(P::Event),
}

impl<P: Protocol> Frame<P> {
    /// Call id for calls and responses; `None` for events.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Frame::Call { call_id, .. } | Frame::Response { call_id, .. } => Some(*call_id),
            Frame::Event(_) => None,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Frame::Call { call, .. } => call.name(),
            Frame::Response { .. } => "response",
            Frame::Event(event) => event.name(),
        }
    }
}

impl<P: Protocol> fmt::Debug for Frame<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Call { call_id, call } => f
                .debug_struct("Call")
                .field("call_id", call_id)
                .field("call", call)
                .finish(),
            Frame::Response { call_id, result } => f
                .debug_struct("Response")
                .field("call_id", call_id)
                .field("result", result)
                .finish(),
            Frame::Event(event) => f.debug_tuple("Event").field(event).finish(),
        }
    }
}
