//! In-process channel endpoints.
//!
//! [`channel`] creates two connected [`Port`]s. Frames posted on one port are
//! received by the other in the order they were posted; nothing is dropped
//! while both ends live. A port is an ordinary value, so handing one to the
//! other side (inside an event) moves the endpoint rather than copying it.
//! Payloads such as `Bytes` move with the frame and are never duplicated.

use crate::error::WireError;
use crate::frame::{CallId, Frame, Named, Protocol};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// Create a connected pair of ports.
pub fn channel<P: Protocol>() -> (Port<P>, Port<P>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Port {
            sender: PortSender { tx: a_tx },
            receiver: PortReceiver { rx: b_rx },
        },
        Port {
            sender: PortSender { tx: b_tx },
            receiver: PortReceiver { rx: a_rx },
        },
    )
}

/// One end of an entity channel.
pub struct Port<P: Protocol> {
    sender: PortSender<P>,
    receiver: PortReceiver<P>,
}

impl<P: Protocol> Port<P> {
    /// Split into the sending and receiving halves.
    pub fn split(self) -> (PortSender<P>, PortReceiver<P>) {
        (self.sender, self.receiver)
    }

    /// Post a frame to the other end.
    pub fn post(&self, frame: Frame<P>) -> Result<(), WireError> {
        self.sender.post(frame)
    }

    /// Receive the next frame, or `None` once the other end is gone.
    pub async fn recv(&mut self) -> Option<Frame<P>> {
        self.receiver.recv().await
    }
}

impl<P: Protocol> fmt::Debug for Port<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("entity", &P::ENTITY)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Sending half of a port. Cheap to clone.
pub struct PortSender<P: Protocol> {
    tx: mpsc::UnboundedSender<Frame<P>>,
}

impl<P: Protocol> Clone for PortSender<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P: Protocol> PortSender<P> {
    /// Post a frame to the other end.
    pub fn post(&self, frame: Frame<P>) -> Result<(), WireError> {
        self.tx.send(frame).map_err(|_| WireError::ChannelClosed)
    }

    /// Frame a response to `call_id`.
    pub fn respond(&self, call_id: CallId, result: Result<P::Reply, String>) {
        if self.post(Frame::Response { call_id, result }).is_err() {
            debug!(
                entity = P::ENTITY,
                call_id, "Response dropped: channel closed"
            );
        }
    }

    /// Frame an event. Events posted after the other end is gone are dropped.
    pub fn emit(&self, event: P::Event) {
        let name = event.name();
        if self.post(Frame::Event(event)).is_err() {
            debug!(entity = P::ENTITY, event = name, "Event dropped: channel closed");
        }
    }

    /// Whether the receiving end has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a port.
pub struct PortReceiver<P: Protocol> {
    rx: mpsc::UnboundedReceiver<Frame<P>>,
}

impl<P: Protocol> PortReceiver<P> {
    /// Receive the next frame, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Frame<P>> {
        self.rx.recv().await
    }

    /// Stop accepting frames; frames already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
