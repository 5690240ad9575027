//! The shared transport session.
//!
//! A [`Session`] is opened once, cloned into every component that needs the
//! transport, and closed exactly once, either through [`Session::close`] or
//! when the last clone is dropped.  Loss of the underlying link is observed
//! through the sinks the bridge registers, or through a publish the
//! transport refuses, and turned into a single
//! [`Diagnostic::SessionClosed`].  However the session ends, every sink
//! registered through it is told, so no subscription outlives its session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use horas_types::TransportError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::transport::{PayloadSink, RegistrationId, Transport};

struct SessionInner {
    transport: Arc<dyn Transport>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    diagnostics: Diagnostics,
    /// Sinks registered through this session, closed with it.
    sinks: Mutex<HashMap<RegistrationId, Weak<dyn PayloadSink>>>,
}

impl SessionInner {
    /// Flip to closed.  Returns `true` for the first caller only.
    fn mark_closed(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed_tx.send_replace(true);
        self.diagnostics.emit(Diagnostic::SessionClosed {
            reason: reason.to_string(),
        });
        self.close_sinks(reason);
        true
    }

    fn sinks(&self) -> MutexGuard<'_, HashMap<RegistrationId, Weak<dyn PayloadSink>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tell every registered sink the session is over.  Sinks are called
    /// outside the lock since `closed` re-enters the session.
    fn close_sinks(&self, reason: &str) {
        let sinks: Vec<_> = self.sinks().drain().map(|(_, sink)| sink).collect();
        for sink in sinks.iter().filter_map(Weak::upgrade) {
            sink.closed(reason);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.mark_closed("last session handle dropped") {
            if let Err(e) = self.transport.close() {
                debug!(error = %e, "transport close on drop failed");
            }
        }
    }
}

/// Reference-counted handle to an open transport session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open a session over `transport` with the default diagnostics
    /// capacity.
    pub fn open(transport: impl Transport + 'static) -> Self {
        Self::with_diagnostics(Arc::new(transport), Diagnostics::default())
    }

    /// Open a session over a shared transport, reporting on `diagnostics`.
    pub fn with_diagnostics(transport: Arc<dyn Transport>, diagnostics: Diagnostics) -> Self {
        info!(transport = transport.name(), "transport session opened");
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                transport,
                closed: AtomicBool::new(false),
                closed_tx,
                diagnostics,
                sinks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the session is closed, whoever closed it.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // The sender lives as long as `self`, so this only returns on close.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    /// Send raw bytes on `topic`.
    ///
    /// Bypasses the typed bridge; useful for tools and tests that inject
    /// payloads as a foreign publisher would.
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed);
        }
        let result = self.inner.transport.publish(topic, payload);
        if let Err(TransportError::SessionClosed) = result {
            self.inner.mark_closed("transport reported the session closed");
        }
        result
    }

    pub(crate) fn register(
        &self,
        topic: &str,
        sink: Arc<dyn PayloadSink>,
    ) -> Result<RegistrationId, TransportError> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed);
        }
        let id = self.inner.transport.subscribe(topic, Arc::clone(&sink))?;
        self.inner.sinks().insert(id, Arc::downgrade(&sink));
        // A close that raced this registration has already drained the table.
        if self.is_closed() {
            self.inner.close_sinks("session closed during registration");
        }
        Ok(id)
    }

    pub(crate) fn unregister(&self, id: RegistrationId) {
        self.inner.sinks().remove(&id);
        self.inner.transport.unsubscribe(id);
    }

    /// Close the session.  Every active subscription becomes cancelled.
    /// Later calls are no-ops.
    pub fn close(&self) -> Result<(), TransportError> {
        if !self.inner.mark_closed("closed by caller") {
            return Ok(());
        }
        self.inner.transport.close()
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning session reference held by transport sinks, so that a
/// registration never keeps the session alive.
#[derive(Clone)]
pub(crate) struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    /// Record transport-initiated closure.
    pub(crate) fn lost(&self, reason: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.mark_closed(reason);
        }
    }

    pub(crate) fn emit(&self, diagnostic: Diagnostic) {
        if let Some(inner) = self.inner.upgrade() {
            inner.diagnostics.emit(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use std::time::Duration;

    #[test]
    fn close_is_reported_once() {
        let transport = InMemoryTransport::new();
        let session = Session::open(transport.clone());
        let mut diagnostics = session.diagnostics();

        session.close().unwrap();
        session.close().unwrap();

        assert!(session.is_closed());
        assert!(matches!(
            diagnostics.try_recv(),
            Ok(Diagnostic::SessionClosed { .. })
        ));
        assert!(diagnostics.try_recv().is_err());
        assert_eq!(
            session.publish("t", Bytes::new()),
            Err(TransportError::SessionClosed)
        );
    }

    #[test]
    fn dropping_last_handle_closes_transport() {
        let transport = InMemoryTransport::new();
        let session = Session::open(transport.clone());
        let other = session.clone();
        drop(session);
        assert!(transport.publish("t", Bytes::new()).is_ok());
        drop(other);
        assert_eq!(
            transport.publish("t", Bytes::new()),
            Err(TransportError::SessionClosed)
        );
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let session = Session::open(InMemoryTransport::new());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.closed().await })
        };
        session.close().unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[derive(Default)]
    struct CountingSink {
        closed: std::sync::atomic::AtomicUsize,
    }

    impl PayloadSink for CountingSink {
        fn deliver(&self, _topic: &str, _payload: Bytes) {}

        fn closed(&self, _reason: &str) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn close_reaches_registered_sinks() {
        let session = Session::open(InMemoryTransport::new());
        let kept = Arc::new(CountingSink::default());
        let released = Arc::new(CountingSink::default());
        session.register("a", kept.clone()).unwrap();
        let id = session.register("b", released.clone()).unwrap();
        session.unregister(id);

        session.close().unwrap();

        // Once from the session, once more from the transport's own shutdown.
        assert!(kept.closed.load(Ordering::SeqCst) >= 1);
        assert_eq!(released.closed.load(Ordering::SeqCst), 0);
        assert!(session.register("c", kept.clone()).is_err());
    }

    #[test]
    fn transport_rejection_marks_session_closed() {
        let transport = InMemoryTransport::new();
        let session = Session::open(transport.clone());
        transport.sever("gone");
        assert!(session.publish("t", Bytes::new()).is_err());
        assert!(session.is_closed());
    }
}
