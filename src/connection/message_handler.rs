//! # ConnectionMessageHandler
//!
//! Per-connection full-duplex framing over one [`TransportEndpoint`]
//! (component C5): a send queue with an idle/sending/error state machine,
//! and an async receive loop with caller-allocated buffers. This is the
//! single largest component in the design (20% of budget) and the one with
//! the tightest locking discipline: `send_states_lock_` in the original
//! guards exactly `send_state` and `send_queue`, and nothing else — the
//! receive path never takes it, because it only ever runs on the reactor
//! thread.
//!
//! In this port, "never on the calling thread" (design §4.1, scenario #6)
//! is achieved by never calling `transport.send` from the thread that calls
//! [`ConnectionMessageHandler::send`]: the first send of a burst is handed
//! to `Reactor::spawn`, and every subsequent queued packet is sent from
//! within that same spawned continuation after the previous one completes.
//! The calling thread only ever touches the queue/state lock.

use crate::ipc::{TransportEndpoint, TransportError};
use crate::message::IpcPacket;
use crate::reactor::Reactor;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
    /// Terminal: once entered, every subsequent `send` is a silent no-op
    /// (invariant I3 / I-once-only-error).
    Error,
}

struct Inner {
    state: SendState,
    queue: VecDeque<IpcPacket>,
}

pub type ErrorCallback = Box<dyn Fn(&TransportError) + Send + Sync>;
pub type MessageCallback = Box<dyn Fn(IpcPacket) + Send + Sync>;

pub struct ConnectionMessageHandler {
    transport: Arc<dyn TransportEndpoint>,
    reactor: Reactor,
    inner: Mutex<Inner>,
    error_notified: AtomicBool,
    receiving: AtomicBool,
    on_error: Mutex<Option<ErrorCallback>>,
    on_message: Mutex<Option<MessageCallback>>,
}

impl ConnectionMessageHandler {
    pub fn new(transport: Arc<dyn TransportEndpoint>, reactor: Reactor) -> Arc<Self> {
        Arc::new(Self {
            transport,
            reactor,
            inner: Mutex::new(Inner {
                state: SendState::Idle,
                queue: VecDeque::new(),
            }),
            error_notified: AtomicBool::new(false),
            receiving: AtomicBool::new(false),
            on_error: Mutex::new(None),
            on_message: Mutex::new(None),
        })
    }

    pub fn set_on_error(&self, callback: ErrorCallback) {
        *self.on_error.lock() = Some(callback);
    }

    pub fn set_on_message(&self, callback: MessageCallback) {
        *self.on_message.lock() = Some(callback);
    }

    pub fn current_state(&self) -> SendState {
        self.inner.lock().state
    }

    pub fn peer_credentials(&self) -> crate::ipc::PeerCredentials {
        self.transport.peer_credentials()
    }

    /// Enqueues `packet`. Under `Error`, silently dropped. Under `Sending`,
    /// queued behind whatever is already in flight. Under `Idle`,
    /// transitions to `Sending` and schedules the first send.
    pub fn send(self: &Arc<Self>, packet: IpcPacket) {
        let mut guard = self.inner.lock();
        match guard.state {
            SendState::Error => {
                drop(packet);
            }
            SendState::Sending => {
                guard.queue.push_back(packet);
            }
            SendState::Idle => {
                guard.state = SendState::Sending;
                drop(guard);
                self.spawn_send(packet);
            }
        }
    }

    fn spawn_send(self: &Arc<Self>, packet: IpcPacket) {
        let this = Arc::clone(self);
        self.reactor.spawn(async move {
            this.send_one(packet).await;
        });
    }

    async fn send_one(self: Arc<Self>, packet: IpcPacket) {
        let bytes = match packet.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                self.enter_error(&TransportError::ProtocolError(err.to_string()));
                return;
            }
        };
        match self.transport.send(&bytes).await {
            Ok(()) => self.on_send_completed(),
            Err(err) => self.enter_error(&err),
        }
    }

    /// Pops the next queued packet (if any) and sends it; otherwise returns
    /// to `Idle`. Always runs from within the reactor-spawned send
    /// continuation, never from an application thread.
    fn on_send_completed(self: &Arc<Self>) {
        let next = {
            let mut guard = self.inner.lock();
            match guard.queue.pop_front() {
                Some(packet) => Some(packet),
                None => {
                    guard.state = SendState::Idle;
                    None
                }
            }
        };
        if let Some(packet) = next {
            self.spawn_send(packet);
        }
    }

    /// Transitions to the terminal `Error` state, drops every queued
    /// packet, and invokes the registered error callback exactly once
    /// (I-once-only-error) regardless of how many further sends or receive
    /// failures arrive afterward.
    fn enter_error(&self, error: &TransportError) {
        {
            let mut guard = self.inner.lock();
            guard.state = SendState::Error;
            guard.queue.clear();
        }
        if !self.error_notified.swap(true, Ordering::SeqCst) {
            if let Some(callback) = self.on_error.lock().as_ref() {
                callback(error);
            }
        }
    }

    /// Starts the receive loop. Idempotent after the first successful call;
    /// a second call while already receiving is a silent no-op (the design
    /// leaves "idempotent vs. specific error" as an open choice — this port
    /// picks idempotent).
    pub fn start_reception(self: &Arc<Self>) {
        if self.receiving.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        self.reactor.spawn(async move {
            this.receive_loop().await;
        });
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            match self.transport.receive().await {
                Ok(bytes) => match IpcPacket::from_bytes(&bytes) {
                    Ok(packet) => {
                        if let Some(callback) = self.on_message.lock().as_ref() {
                            callback(packet);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed IPC message; discarding");
                    }
                },
                Err(err) => {
                    self.enter_error(&err);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MethodHeader, ReturnCode, VariantHeader};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    struct RecordingTransport {
        sent: AsyncMutex<mpsc::UnboundedSender<Vec<u8>>>,
        fail_after: AtomicUsize,
        sends_seen: AtomicUsize,
    }

    #[async_trait]
    impl TransportEndpoint for RecordingTransport {
        async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
            let count = self.sends_seen.fetch_add(1, Ordering::SeqCst);
            if count >= self.fail_after.load(Ordering::SeqCst) {
                return Err(TransportError::Disconnected { orderly: true });
            }
            self.sent.lock().await.send(payload.to_vec()).unwrap();
            Ok(())
        }

        async fn receive(&self) -> Result<Vec<u8>, TransportError> {
            std::future::pending().await
        }

        fn peer_credentials(&self) -> crate::ipc::PeerCredentials {
            crate::ipc::PeerCredentials(0)
        }

        async fn close(&self) {}

        fn is_in_use(&self) -> bool {
            false
        }
    }

    fn packet(session: u16) -> IpcPacket {
        IpcPacket::new(
            VariantHeader::Request(MethodHeader {
                service_id: 1,
                instance_id: 1,
                major_version: 1,
                method_id: 1,
                client_id: 1,
                session_id: session,
            }),
            ReturnCode::Ok,
            vec![],
        )
    }

    #[tokio::test]
    async fn sends_are_delivered_in_fifo_order() {
        let reactor = Reactor::start().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport {
            sent: AsyncMutex::new(tx),
            fail_after: AtomicUsize::new(usize::MAX),
            sends_seen: AtomicUsize::new(0),
        });
        let handler = ConnectionMessageHandler::new(transport, reactor);

        for session in 0..5u16 {
            handler.send(packet(session));
        }

        let mut received_sessions = Vec::new();
        for _ in 0..5 {
            let bytes = rx.recv().await.unwrap();
            let decoded = IpcPacket::from_bytes(&bytes).unwrap();
            if let crate::message::VariantHeader::Request(header) = decoded.variant {
                received_sessions.push(header.session_id);
            }
        }
        assert_eq!(received_sessions, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn error_callback_fires_exactly_once_and_further_sends_are_noops() {
        let reactor = Reactor::start().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport {
            sent: AsyncMutex::new(tx),
            fail_after: AtomicUsize::new(0),
            sends_seen: AtomicUsize::new(0),
        });
        let handler = ConnectionMessageHandler::new(transport, reactor);
        let error_count = Arc::new(AtomicUsize::new(0));
        let error_count_clone = Arc::clone(&error_count);
        handler.set_on_error(Box::new(move |_| {
            error_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        handler.send(packet(0));
        handler.send(packet(1));
        handler.send(packet(2));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(error_count.load(Ordering::SeqCst), 1);
        assert_eq!(handler.current_state(), SendState::Error);
        assert!(rx.try_recv().is_err());

        handler.send(packet(3));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(error_count.load(Ordering::SeqCst), 1);
    }
}
