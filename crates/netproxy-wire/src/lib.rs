//! netproxy wire layer: calls, responses and events over an ordered channel.
//!
//! Every proxied entity (a socket, a server) talks to its counterpart over one
//! [`Port`] pair. The caller side wraps its port in a [`Transport`], which
//! correlates responses to calls by call id and hands events to the owner.
//! The callee side runs [`serve`], which feeds each call to a
//! [`CallHandler`] and ships the result back, converting failures to text.
//!
//! ## Architecture
//!
//! - **Frame**: the three message shapes (call, response, event)
//! - **Port**: one end of an in-process, ordered, lossless channel
//! - **Transport**: caller side (pending-call table, event dispatch)
//! - **serve**: callee side (handler dispatch, failure-to-text)
//! - **EntityRegistry**: identity for dynamically created entities

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod port;
pub mod registry;
pub mod transport;

pub use endpoint::{serve, CallHandler, ServeExit};
pub use error::WireError;
pub use frame::{CallId, Frame, Named, Protocol};
pub use port::{channel, Port, PortReceiver, PortSender};
pub use registry::{Entity, EntityId, EntityRegistry};
pub use transport::{EventReceiver, Transport};
