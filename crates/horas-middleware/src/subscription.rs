//! Subscriptions: a transport sink feeding a bounded queue, drained by one
//! Tokio task that awaits the handler.
//!
//! ```text
//!  transport callback            subscription task
//!  ──────────────────            ─────────────────
//!  decode → validate → conform
//!          │
//!          ▼
//!     LatestQueue  ───────────▶  pop → handler.handle(record).await
//! ```
//!
//! The callback never runs a handler, so a slow handler only delays its own
//! queue.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use horas_types::BridgeError;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::diagnostics::Diagnostic;
use crate::queue::{LatestQueue, Push};
use crate::session::{Session, WeakSession};
use crate::stats::StatsCounters;
use crate::transport::{PayloadSink, RegistrationId};

/// Receives decoded, validated records for one subscription.
///
/// Any `Fn(M)` closure is a handler.  Implement the trait directly when the
/// handler needs to `.await`.
#[async_trait]
pub trait RecordHandler<M: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, record: M);
}

#[async_trait]
impl<M, F> RecordHandler<M> for F
where
    M: Send + 'static,
    F: Fn(M) + Send + Sync + 'static,
{
    async fn handle(&self, record: M) {
        (self)(record)
    }
}

/// Lifecycle of a [`Subscription`].  `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Cancelled,
}

/// Cancellation state shared by the handle, the sink and the task.
struct Lifecycle {
    /// Held by the task for the duration of each handler call.
    gate: Mutex<()>,
    cancelled: AtomicBool,
}

impl Lifecycle {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Type-erased view of a subscription queue.
trait Closable: Send + Sync {
    fn close(&self);
}

impl<M: Send> Closable for LatestQueue<M> {
    fn close(&self) {
        LatestQueue::close(self);
    }
}

/// Turns a raw payload into a record ready for the handler.
pub(crate) type Inbound<M> = Box<dyn Fn(&[u8]) -> Result<M, BridgeError> + Send + Sync>;

struct RecordSink<M> {
    inbound: Inbound<M>,
    queue: Arc<LatestQueue<M>>,
    lifecycle: Arc<Lifecycle>,
    session: WeakSession,
    stats: Arc<StatsCounters>,
}

impl<M: Send + 'static> PayloadSink for RecordSink<M> {
    fn deliver(&self, topic: &str, payload: Bytes) {
        if self.lifecycle.is_cancelled() {
            return;
        }
        trace!(topic, bytes = payload.len(), "payload received");
        match (self.inbound)(&payload) {
            Ok(record) => match self.queue.push(record) {
                Push::Queued | Push::Closed => {}
                Push::Displaced => {
                    StatsCounters::bump(&self.stats.dropped);
                    self.session.emit(Diagnostic::Overflow {
                        topic: topic.to_string(),
                    });
                }
            },
            Err(BridgeError::Decode(error)) => {
                StatsCounters::bump(&self.stats.rejected);
                self.session.emit(Diagnostic::Decode {
                    topic: topic.to_string(),
                    error,
                });
            }
            Err(BridgeError::Validation { schema, violation }) => {
                StatsCounters::bump(&self.stats.rejected);
                self.session.emit(Diagnostic::Validation {
                    topic: topic.to_string(),
                    schema,
                    violation,
                });
            }
            Err(other) => {
                warn!(topic, error = %other, "unexpected inbound failure");
            }
        }
    }

    fn closed(&self, reason: &str) {
        self.lifecycle.cancelled.store(true, Ordering::Release);
        self.queue.close();
        self.session.lost(reason);
    }
}

/// Handle to an active subscription.
///
/// [`cancel`](Self::cancel) stops delivery and waits for an in-flight
/// handler call.  Dropping the handle cancels without waiting.
pub struct Subscription {
    topic: String,
    registration: RegistrationId,
    session: Session,
    queue: Arc<dyn Closable>,
    lifecycle: Arc<Lifecycle>,
    released: AtomicBool,
}

impl Subscription {
    pub(crate) fn spawn<M, H>(
        session: &Session,
        topic: &str,
        depth: usize,
        inbound: Inbound<M>,
        handler: H,
        stats: Arc<StatsCounters>,
    ) -> Result<Self, BridgeError>
    where
        M: Send + 'static,
        H: RecordHandler<M>,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;

        let queue = Arc::new(LatestQueue::new(depth));
        let lifecycle = Arc::new(Lifecycle {
            gate: Mutex::new(()),
            cancelled: AtomicBool::new(false),
        });
        let sink = Arc::new(RecordSink {
            inbound,
            queue: Arc::clone(&queue),
            lifecycle: Arc::clone(&lifecycle),
            session: session.downgrade(),
            stats: Arc::clone(&stats),
        });

        let registration = session.register(topic, sink)?;
        runtime.spawn(drain(
            topic.to_string(),
            Arc::clone(&queue),
            Arc::clone(&lifecycle),
            handler,
            stats,
        ));
        debug!(topic, %registration, depth, "subscription active");

        Ok(Self {
            topic: topic.to_string(),
            registration,
            session: session.clone(),
            queue,
            lifecycle,
            released: AtomicBool::new(false),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> SubscriptionState {
        if self.lifecycle.is_cancelled() {
            SubscriptionState::Cancelled
        } else {
            SubscriptionState::Active
        }
    }

    /// Stop delivery.  Once this returns the handler is not invoked again.
    /// Calling it more than once is harmless.
    pub async fn cancel(&self) {
        self.queue.close();
        let gate = self.lifecycle.gate.lock().await;
        let first = !self.lifecycle.cancelled.swap(true, Ordering::AcqRel);
        drop(gate);
        self.release();
        if first {
            debug!(topic = %self.topic, "subscription cancelled");
        }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.session.unregister(self.registration);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.lifecycle.cancelled.store(true, Ordering::Release);
        self.queue.close();
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("registration", &self.registration)
            .field("state", &self.state())
            .finish()
    }
}

async fn drain<M, H>(
    topic: String,
    queue: Arc<LatestQueue<M>>,
    lifecycle: Arc<Lifecycle>,
    handler: H,
    stats: Arc<StatsCounters>,
) where
    M: Send + 'static,
    H: RecordHandler<M>,
{
    while let Some(record) = queue.pop().await {
        let _gate = lifecycle.gate.lock().await;
        if lifecycle.is_cancelled() {
            break;
        }
        handler.handle(record).await;
        StatsCounters::bump(&stats.delivered);
    }
    trace!(topic = %topic, "subscription task finished");
}
