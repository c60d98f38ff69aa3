//! Callee side of an entity channel.
//!
//! [`serve`] reads calls off a channel and runs each through a
//! [`CallHandler`]. Calls run concurrently; a slow call never blocks a later
//! one. Whatever the handler returns is framed as a response with the call's
//! id. Handler errors and panics both become failure text.

use crate::frame::{CallId, Frame, Named, Protocol};
use crate::port::{PortReceiver, PortSender};
use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Handles the calls of one entity.
#[async_trait]
pub trait CallHandler<P: Protocol>: Send + Sync {
    type Error: fmt::Display + Send;

    async fn handle(&self, call: P::Call) -> Result<P::Reply, Self::Error>;
}

/// Why a serve loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The shutdown signal fired (the entity was disposed).
    Shutdown,
    /// The caller side of the channel went away.
    ChannelClosed,
}

/// Serve calls until shutdown is signalled or the channel closes.
///
/// Responses to calls completed before shutdown fires are still sent.
pub async fn serve<P, H>(
    mut inbound: PortReceiver<P>,
    outbound: PortSender<P>,
    handler: &H,
    mut shutdown: watch::Receiver<bool>,
) -> ServeExit
where
    P: Protocol,
    H: CallHandler<P> + ?Sized,
{
    let mut in_flight = FuturesUnordered::new();

    loop {
        if *shutdown.borrow_and_update() {
            debug!(entity = P::ENTITY, in_flight = in_flight.len(), "Serve loop shut down");
            return ServeExit::Shutdown;
        }

        tokio::select! {
            biased;

            Some((call_id, method, result)) = in_flight.next(), if !in_flight.is_empty() => {
                if let Err(ref message) = result {
                    debug!(entity = P::ENTITY, method, call_id, error = %message, "Call failed");
                }
                outbound.respond(call_id, result);
            }

            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Owner dropped the signal; treat as shutdown.
                    return ServeExit::Shutdown;
                }
            }

            frame = inbound.recv() => match frame {
                Some(Frame::Call { call_id, call }) => {
                    debug!(entity = P::ENTITY, method = call.name(), call_id, "Received call");
                    in_flight.push(run_call::<P, H>(handler, call_id, call));
                }
                Some(other) => {
                    warn!(entity = P::ENTITY, frame = other.label(), "Ignoring non-call frame on callee side");
                }
                None => {
                    debug!(entity = P::ENTITY, "Channel closed by caller");
                    return ServeExit::ChannelClosed;
                }
            },
        }
    }
}

async fn run_call<P, H>(
    handler: &H,
    call_id: CallId,
    call: P::Call,
) -> (CallId, &'static str, Result<P::Reply, String>)
where
    P: Protocol,
    H: CallHandler<P> + ?Sized,
{
    let method = call.name();
    let result = match AssertUnwindSafe(handler.handle(call)).catch_unwind().await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(entity = P::ENTITY, method, call_id, %message, "Call handler panicked");
            Err(message)
        }
    };
    (call_id, method, result)
}

/// Textual description of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "call handler panicked".to_string()
    }
}
