//! # TraceMonitor
//!
//! A read-mostly wrapper holding an optional user-installed trace sink.
//! `set_trace_if` takes the exclusive side of a shared/exclusive lock, every
//! `trace_*` call takes the shared side — readers (trace dispatch) never
//! block each other, only the rare reconfiguration does. No lock is ever
//! held across the sink callback itself except this one, which is held for
//! exactly the duration of that call; the sink contract forbids calling back
//! into `set_trace_if` from within a `trace_*` callback (that would
//! deadlock on the same `RwLock`, by design, as a way of enforcing the
//! no-reentrancy contract rather than silently tolerating it).

use crate::message::{EventHeader, MethodHeader, SessionId};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

#[derive(Debug, Clone)]
pub enum TraceRecord<'a> {
    MethodCall { header: MethodHeader, direction: Direction, payload: &'a [u8] },
    MethodResponse { header: MethodHeader, direction: Direction, payload: &'a [u8] },
    MethodErrorResponse { header: MethodHeader, direction: Direction, payload: &'a [u8] },
    MethodNoReturnCall { header: MethodHeader, direction: Direction, payload: &'a [u8] },
    ApplicationError { header: MethodHeader, direction: Direction, payload: &'a [u8] },
    Notification { header: EventHeader, session_id: SessionId, direction: Direction, payload: &'a [u8] },
    SubscribeEvent { header: EventHeader, direction: Direction },
    SubscribeEventAck { header: EventHeader, direction: Direction },
    SubscribeEventNack { header: EventHeader, direction: Direction },
    UnsubscribeEvent { header: EventHeader, direction: Direction },
}

/// A user-installed sink. Implementors must not call back into
/// [`TraceMonitor::set_trace_if`] from within `on_trace` — doing so
/// deadlocks against the monitor's own shared lock.
pub trait TraceSink: Send + Sync {
    fn on_trace(&self, record: &TraceRecord<'_>);
}

#[derive(Default)]
pub struct TraceMonitor {
    sink: RwLock<Option<Arc<dyn TraceSink>>>,
}

impl TraceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_trace_if(&self, sink: Option<Arc<dyn TraceSink>>) {
        *self.sink.write() = sink;
    }

    fn dispatch(&self, record: TraceRecord<'_>) {
        let guard = self.sink.read();
        if let Some(sink) = guard.as_ref() {
            sink.on_trace(&record);
        }
    }

    pub fn trace_method_call(&self, header: MethodHeader, direction: Direction, payload: &[u8]) {
        self.dispatch(TraceRecord::MethodCall { header, direction, payload });
    }

    pub fn trace_method_no_return_call(&self, header: MethodHeader, direction: Direction, payload: &[u8]) {
        self.dispatch(TraceRecord::MethodNoReturnCall { header, direction, payload });
    }

    pub fn trace_method_response(&self, header: MethodHeader, direction: Direction, payload: &[u8]) {
        self.dispatch(TraceRecord::MethodResponse { header, direction, payload });
    }

    pub fn trace_method_error_response(&self, header: MethodHeader, direction: Direction, payload: &[u8]) {
        self.dispatch(TraceRecord::MethodErrorResponse { header, direction, payload });
    }

    pub fn trace_application_error(&self, header: MethodHeader, direction: Direction, payload: &[u8]) {
        self.dispatch(TraceRecord::ApplicationError { header, direction, payload });
    }

    pub fn trace_notification(&self, header: EventHeader, session_id: SessionId, direction: Direction, payload: &[u8]) {
        self.dispatch(TraceRecord::Notification { header, session_id, direction, payload });
    }

    pub fn trace_subscribe_event(&self, header: EventHeader, direction: Direction) {
        self.dispatch(TraceRecord::SubscribeEvent { header, direction });
    }

    pub fn trace_subscribe_event_ack(&self, header: EventHeader, direction: Direction) {
        self.dispatch(TraceRecord::SubscribeEventAck { header, direction });
    }

    pub fn trace_subscribe_event_nack(&self, header: EventHeader, direction: Direction) {
        self.dispatch(TraceRecord::SubscribeEventNack { header, direction });
    }

    pub fn trace_unsubscribe_event(&self, header: EventHeader, direction: Direction) {
        self.dispatch(TraceRecord::UnsubscribeEvent { header, direction });
    }
}
