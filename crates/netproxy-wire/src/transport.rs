//! Caller side of an entity channel.
//!
//! A [`Transport`] owns one [`Port`] and turns it into an awaitable call
//! interface. Each call gets a fresh id and a pending slot; a background
//! demultiplexer routes responses to their slot and events to the event
//! receiver handed out by [`Transport::new`].
//!
//! Disposal detaches the channel and drops every pending slot. A call whose
//! slot is dropped this way never completes: it neither succeeds nor fails.

use crate::error::WireError;
use crate::frame::{CallId, Frame, Named, Protocol};
use crate::port::{Port, PortReceiver, PortSender};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events delivered by a transport, in channel order.
pub type EventReceiver<P> = mpsc::UnboundedReceiver<<P as Protocol>::Event>;

type PendingSlot<P> = oneshot::Sender<Result<<P as Protocol>::Reply, String>>;

struct Shared<P: Protocol> {
    outbound: Mutex<Option<PortSender<P>>>,
    pending: DashMap<CallId, PendingSlot<P>>,
    next_call_id: AtomicU64,
    demux: Mutex<Option<JoinHandle<()>>>,
}

/// Awaitable call interface over one channel endpoint.
pub struct Transport<P: Protocol> {
    shared: Arc<Shared<P>>,
}

impl<P: Protocol> Transport<P> {
    /// Wrap a port. Must be called inside a tokio runtime.
    pub fn new(port: Port<P>) -> (Self, EventReceiver<P>) {
        let (sender, receiver) = port.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            outbound: Mutex::new(Some(sender)),
            pending: DashMap::new(),
            next_call_id: AtomicU64::new(0),
            demux: Mutex::new(None),
        });

        let handle = tokio::spawn(demux_loop(receiver, Arc::clone(&shared), events_tx));
        *shared.demux.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        (Self { shared }, events_rx)
    }

    /// Issue a call and wait for its response.
    ///
    /// Resolves with the callee's reply, or [`WireError::Remote`] carrying the
    /// failure text the callee produced. If the transport is disposed while
    /// the call is in flight, the returned future stays pending forever.
    pub async fn call(&self, call: P::Call) -> Result<P::Reply, WireError> {
        let sender = self.sender()?;
        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::Relaxed);
        let method = call.name();

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(call_id, tx);

        debug!(entity = P::ENTITY, method, call_id, "Issuing call");
        if let Err(e) = sender.post(Frame::Call { call_id, call }) {
            self.shared.pending.remove(&call_id);
            return Err(e);
        }
        drop(sender);

        match rx.await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(message)) => Err(WireError::Remote(message)),
            // Slot dropped by dispose(): abandoned.
            Err(_) => std::future::pending().await,
        }
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Detach from the channel and abandon all pending calls. Idempotent.
    pub fn dispose(&self) {
        let sender = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if sender.is_none() {
            return;
        }

        if let Some(handle) = self
            .shared
            .demux
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }

        let abandoned = self.shared.pending.len();
        self.shared.pending.clear();
        debug!(entity = P::ENTITY, abandoned, "Transport disposed");
    }

    fn sender(&self) -> Result<PortSender<P>, WireError> {
        self.shared
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(WireError::Disposed)
    }
}

impl<P: Protocol> Drop for Transport<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<P: Protocol> fmt::Debug for Transport<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("entity", &P::ENTITY)
            .field("pending", &self.pending_calls())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

async fn demux_loop<P: Protocol>(
    mut receiver: PortReceiver<P>,
    shared: Arc<Shared<P>>,
    events: mpsc::UnboundedSender<P::Event>,
) {
    while let Some(frame) = receiver.recv().await {
        match frame {
            Frame::Response { call_id, result } => match shared.pending.remove(&call_id) {
                Some((_, slot)) => {
                    // The caller may have stopped waiting; nothing to do then.
                    let _ = slot.send(result);
                }
                None => debug!(
                    entity = P::ENTITY,
                    call_id, "Dropping response for unknown call"
                ),
            },
            Frame::Event(event) => {
                let name = event.name();
                if events.send(event).is_err() {
                    debug!(entity = P::ENTITY, event = name, "No event listener, dropping");
                }
            }
            Frame::Call { call_id, call } => warn!(
                entity = P::ENTITY,
                call_id,
                method = call.name(),
                "Ignoring call frame on caller side"
            ),
        }
    }
    debug!(entity = P::ENTITY, "Channel closed, demultiplexer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::testing::*;
    use crate::port::channel;
    use bytes::Bytes;
    use std::time::Duration;

    /// Read the next call off the callee end.
    async fn next_call(port: &mut Port<Echo>) -> (CallId, EchoCall) {
        match port.recv().await {
            Some(Frame::Call { call_id, call }) => (call_id, call),
            other => panic!("Expected call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_responses_correlate_out_of_order() {
        let (caller, mut callee) = channel::<Echo>();
        let (transport, _events) = Transport::new(caller);

        let first = transport.call(EchoCall::Echo("a".into()));
        let second = transport.call(EchoCall::Echo("b".into()));

        let responder = async {
            let (id_a, _) = next_call(&mut callee).await;
            let (id_b, _) = next_call(&mut callee).await;
            assert_ne!(id_a, id_b);
            // Answer the second call first.
            callee
                .post(Frame::Response {
                    call_id: id_b,
                    result: Ok(EchoReply::Text("B".into())),
                })
                .unwrap();
            callee
                .post(Frame::Response {
                    call_id: id_a,
                    result: Ok(EchoReply::Text("A".into())),
                })
                .unwrap();
        };

        let (a, b, ()) = tokio::join!(first, second, responder);
        assert_eq!(a.unwrap(), EchoReply::Text("A".into()));
        assert_eq!(b.unwrap(), EchoReply::Text("B".into()));
        assert_eq!(transport.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_error_response_carries_text() {
        let (caller, mut callee) = channel::<Echo>();
        let (transport, _events) = Transport::new(caller);

        let call = transport.call(EchoCall::Fail("x".into()));
        let responder = async {
            let (id, _) = next_call(&mut callee).await;
            callee
                .post(Frame::Response {
                    call_id: id,
                    result: Err("connect ECONNREFUSED".into()),
                })
                .unwrap();
        };

        let (result, ()) = tokio::join!(call, responder);
        match result {
            Err(WireError::Remote(text)) => assert_eq!(text, "connect ECONNREFUSED"),
            other => panic!("Expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_response_is_dropped() {
        let (caller, mut callee) = channel::<Echo>();
        let (transport, mut events) = Transport::new(caller);

        callee
            .post(Frame::Response {
                call_id: 999,
                result: Ok(EchoReply::Done),
            })
            .unwrap();
        callee.post(Frame::Event(EchoEvent::Ping(1))).unwrap();

        // The event behind the stray response still arrives.
        assert!(matches!(events.recv().await, Some(EchoEvent::Ping(1))));
        assert_eq!(transport.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (caller, callee) = channel::<Echo>();
        let (_transport, mut events) = Transport::new(caller);

        for i in 0..10 {
            callee.post(Frame::Event(EchoEvent::Ping(i))).unwrap();
        }
        for i in 0..10 {
            match events.recv().await {
                Some(EchoEvent::Ping(n)) => assert_eq!(n, i),
                other => panic!("Expected Ping({i}), got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_event_payload_is_not_copied() {
        let (caller, callee) = channel::<Echo>();
        let (_transport, mut events) = Transport::new(caller);

        let payload = Bytes::from_static(b"zero-copy");
        let ptr = payload.as_ptr();
        callee.post(Frame::Event(EchoEvent::Data(payload))).unwrap();

        match events.recv().await {
            Some(EchoEvent::Data(data)) => assert_eq!(data.as_ptr(), ptr),
            other => panic!("Expected Data, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_abandons_pending_calls() {
        let (caller, mut callee) = channel::<Echo>();
        let (transport, _events) = Transport::new(caller);
        let transport = Arc::new(transport);

        let t = Arc::clone(&transport);
        let pending = tokio::spawn(async move { t.call(EchoCall::Echo("x".into())).await });

        let (id, _) = next_call(&mut callee).await;
        transport.dispose();
        transport.dispose();

        // A late response cannot reach the abandoned call.
        let _ = callee.post(Frame::Response {
            call_id: id,
            result: Ok(EchoReply::Done),
        });

        let outcome = tokio::time::timeout(Duration::from_secs(60), pending).await;
        assert!(outcome.is_err(), "abandoned call must never complete");
        assert!(transport.is_disposed());
        assert_eq!(transport.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_after_dispose_fails() {
        let (caller, _callee) = channel::<Echo>();
        let (transport, _events) = Transport::new(caller);
        transport.dispose();

        let result = transport.call(EchoCall::Echo("late".into())).await;
        assert!(matches!(result, Err(WireError::Disposed)));
    }

    #[tokio::test]
    async fn test_dispose_closes_channel_for_callee() {
        let (caller, mut callee) = channel::<Echo>();
        let (transport, _events) = Transport::new(caller);
        transport.dispose();

        assert!(callee.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_call_on_closed_channel_fails() {
        let (caller, callee) = channel::<Echo>();
        let (transport, _events) = Transport::new(caller);
        drop(callee);

        let result = transport.call(EchoCall::Echo("x".into())).await;
        assert!(matches!(result, Err(WireError::ChannelClosed)));
        assert_eq!(transport.pending_calls(), 0);
    }
}
