//! The pub/sub transport seam.
//!
//! The bridge never talks to a network stack directly.  It hands encoded
//! payloads to a [`Transport`] and registers [`PayloadSink`]s for the topics
//! it listens on.  Any backend able to move opaque byte payloads between
//! named topics can sit behind this trait.
//!
//! [`InMemoryTransport`] is the in-process backend used by the demo scenarios
//! and the test suite.  It routes by exact topic name and delivers
//! synchronously on the publisher's thread, so a publish returns only after
//! every sink has seen the payload.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use horas_types::TransportError;
use tracing::{debug, warn};

/// Receives raw payloads for one registered topic.
///
/// Implementations run on whatever thread the transport delivers from and
/// must not block.
pub trait PayloadSink: Send + Sync {
    /// One payload published on the registered topic.
    fn deliver(&self, topic: &str, payload: Bytes);

    /// The session ended.  No further deliveries follow.  Both the session
    /// and the transport may report the end, so this must tolerate being
    /// called more than once.
    fn closed(&self, reason: &str);
}

/// Handle returned by [`Transport::subscribe`], used to unregister a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg-{}", self.0)
    }
}

/// A pub/sub backend carrying opaque payloads between named topics.
pub trait Transport: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Send `payload` to every sink registered on `topic`.
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Register `sink` for payloads on `topic`.
    fn subscribe(
        &self,
        topic: &str,
        sink: Arc<dyn PayloadSink>,
    ) -> Result<RegistrationId, TransportError>;

    /// Remove a registration.  Unknown ids are ignored.
    fn unsubscribe(&self, id: RegistrationId);

    /// End the session.  Every registered sink receives
    /// [`PayloadSink::closed`] exactly once.  Closing twice is a no-op.
    fn close(&self) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────────────────
// In-memory backend
// ───────────────────────────────────────────────────────────────────────────

type Route = (RegistrationId, Arc<dyn PayloadSink>);

#[derive(Default)]
struct RouteTable {
    closed: bool,
    next_id: u64,
    routes: HashMap<String, Vec<Route>>,
}

#[derive(Default)]
struct Shared {
    table: Mutex<RouteTable>,
    publish_calls: AtomicU64,
}

/// In-process transport with exact topic matching.
///
/// Clones share the same routing table, so one clone can be handed to a
/// [`Session`](crate::Session) while a test keeps another to inject raw
/// payloads or to [`sever`](Self::sever) the link.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`Transport::publish`] calls seen so far, including
    /// rejected ones.
    pub fn publish_count(&self) -> u64 {
        self.shared.publish_calls.load(Ordering::Relaxed)
    }

    /// Number of sinks currently registered on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.table().routes.get(topic).map_or(0, Vec::len)
    }

    /// Simulate loss of the underlying session.
    pub fn sever(&self, reason: &str) {
        warn!(reason, "in-memory transport severed");
        self.shutdown(reason);
    }

    fn table(&self) -> MutexGuard<'_, RouteTable> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown(&self, reason: &str) {
        let routes = {
            let mut table = self.table();
            if table.closed {
                return;
            }
            table.closed = true;
            std::mem::take(&mut table.routes)
        };
        for (_, sink) in routes.into_values().flatten() {
            sink.closed(reason);
        }
    }
}

impl Transport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.shared.publish_calls.fetch_add(1, Ordering::Relaxed);
        // Deliver outside the lock: sinks may call back into the transport.
        let sinks: Vec<Arc<dyn PayloadSink>> = {
            let table = self.table();
            if table.closed {
                return Err(TransportError::SessionClosed);
            }
            table
                .routes
                .get(topic)
                .map(|routes| routes.iter().map(|(_, sink)| Arc::clone(sink)).collect())
                .unwrap_or_default()
        };
        for sink in sinks {
            sink.deliver(topic, payload.clone());
        }
        Ok(())
    }

    fn subscribe(
        &self,
        topic: &str,
        sink: Arc<dyn PayloadSink>,
    ) -> Result<RegistrationId, TransportError> {
        let mut table = self.table();
        if table.closed {
            return Err(TransportError::SessionClosed);
        }
        table.next_id += 1;
        let id = RegistrationId(table.next_id);
        table
            .routes
            .entry(topic.to_string())
            .or_default()
            .push((id, sink));
        debug!(topic, %id, "sink registered");
        Ok(id)
    }

    fn unsubscribe(&self, id: RegistrationId) {
        let mut table = self.table();
        table.routes.retain(|_, routes| {
            routes.retain(|(rid, _)| *rid != id);
            !routes.is_empty()
        });
    }

    fn close(&self) -> Result<(), TransportError> {
        self.shutdown("session closed");
        Ok(())
    }
}
