//! The typed telemetry bridge.
//!
//! [`TelemetryBridge`] sits between application code and a [`Session`]:
//!
//! * **Outbound** – a typed record is stamped, validated, conformed to the
//!   configured [`RecordLimits`], encoded and handed to the transport.
//! * **Inbound** – payloads arriving on a subscribed topic are decoded,
//!   validated and conformed inside the transport callback, then queued for
//!   the subscription's handler task.  Failures go to the diagnostics
//!   channel.
//!
//! Every topic must be registered in the bridge's [`TopicRegistry`] with the
//! schema it carries before it can be used in either direction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use horas_types::{
    BridgeError, LrfCommand, LrfReply, RecordLimits, Schema, TelemetryMessage, TelemetryRecord,
    now_millis,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::diagnostics::Diagnostic;
use crate::registry::{SightTopics, TopicRegistry};
use crate::session::Session;
use crate::stats::{BridgeStats, StatsCounters};
use crate::subscription::{Inbound, RecordHandler, Subscription};

/// Default reply timeout of [`TelemetryBridge::request`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables applied to every publish and subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Pending records kept per subscription.  1 means "latest value wins".
    pub queue_depth: usize,
    pub limits: RecordLimits,
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1,
            limits: RecordLimits::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Typed publish/subscribe over a shared [`Session`].  Clones share the
/// session, registry and counters.
#[derive(Clone)]
pub struct TelemetryBridge {
    session: Session,
    registry: Arc<TopicRegistry>,
    config: BridgeConfig,
    stats: Arc<StatsCounters>,
}

impl TelemetryBridge {
    pub fn new(session: Session, registry: TopicRegistry, config: BridgeConfig) -> Self {
        debug!(
            transport = session.transport_name(),
            topics = registry.len(),
            queue_depth = config.queue_depth,
            "telemetry bridge ready"
        );
        Self {
            session,
            registry: Arc::new(registry),
            config,
            stats: Arc::new(StatsCounters::default()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.session.diagnostics()
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats.snapshot()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Outbound
    // ───────────────────────────────────────────────────────────────────────

    /// Validate, encode and send `record` on `topic`.
    ///
    /// Returns [`BridgeError::Encoding`] without touching the transport when
    /// the record breaks a field invariant, and [`BridgeError::Transport`]
    /// when the transport refuses the payload.  Neither is retried.
    pub fn publish<M: TelemetryMessage>(&self, topic: &str, record: &M) -> Result<(), BridgeError> {
        self.registry.require(topic, M::SCHEMA)?;
        self.send(topic, record.clone().into_record())
    }

    /// [`publish`](Self::publish) for a record whose type is only known at
    /// runtime.
    pub fn publish_record(&self, topic: &str, record: &TelemetryRecord) -> Result<(), BridgeError> {
        self.registry.require(topic, record.schema())?;
        self.send(topic, record.clone())
    }

    fn send(&self, topic: &str, mut record: TelemetryRecord) -> Result<(), BridgeError> {
        let schema = record.schema();
        record.prepare_outbound(now_millis());
        record
            .validate()
            .map_err(|violation| BridgeError::Encoding { schema, violation })?;
        record.conform(&self.config.limits);

        let payload = Bytes::from(record.encode_payload());
        trace!(topic, schema = %schema, payload = %HexDump(&payload), "publishing");
        self.session.publish(topic, payload)?;
        StatsCounters::bump(&self.stats.published);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Inbound
    // ───────────────────────────────────────────────────────────────────────

    /// Deliver every valid `M` arriving on `topic` to `handler`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<M, H>(&self, topic: &str, handler: H) -> Result<Subscription, BridgeError>
    where
        M: TelemetryMessage,
        H: RecordHandler<M>,
    {
        self.registry.require(topic, M::SCHEMA)?;
        let limits = self.config.limits;
        let inbound: Inbound<M> = Box::new(move |payload: &[u8]| -> Result<M, BridgeError> {
            let mut record = M::decode_payload(payload)?;
            record
                .validate()
                .map_err(|violation| BridgeError::Validation {
                    schema: M::SCHEMA,
                    violation,
                })?;
            record.conform(&limits);
            Ok(record)
        });
        self.attach(topic, inbound, handler)
    }

    /// Deliver every valid record arriving on `topic`, whatever schema the
    /// topic is registered with.
    pub fn subscribe_records<H>(&self, topic: &str, handler: H) -> Result<Subscription, BridgeError>
    where
        H: RecordHandler<TelemetryRecord>,
    {
        let schema = self.registry.resolve(topic)?;
        let limits = self.config.limits;
        let inbound: Inbound<TelemetryRecord> =
            Box::new(move |payload: &[u8]| -> Result<TelemetryRecord, BridgeError> {
                let mut record = TelemetryRecord::decode(schema, payload)?;
                record
                    .validate()
                    .map_err(|violation| BridgeError::Validation { schema, violation })?;
                record.conform(&limits);
                Ok(record)
            });
        self.attach(topic, inbound, handler)
    }

    fn attach<M, H>(
        &self,
        topic: &str,
        inbound: Inbound<M>,
        handler: H,
    ) -> Result<Subscription, BridgeError>
    where
        M: Send + 'static,
        H: RecordHandler<M>,
    {
        Subscription::spawn(
            &self.session,
            topic,
            self.config.queue_depth,
            inbound,
            handler,
            Arc::clone(&self.stats),
        )
    }

    // ───────────────────────────────────────────────────────────────────────
    // Request / response
    // ───────────────────────────────────────────────────────────────────────

    /// Publish `command` on `tx_topic` and wait for the first valid reply on
    /// `rx_topic`, up to the configured request timeout.
    ///
    /// Returns `Ok(None)` when no reply arrives in time.
    pub async fn request<Req, Resp>(
        &self,
        tx_topic: &str,
        rx_topic: &str,
        command: &Req,
    ) -> Result<Option<Resp>, BridgeError>
    where
        Req: TelemetryMessage,
        Resp: TelemetryMessage,
    {
        self.request_within(tx_topic, rx_topic, command, self.config.request_timeout)
            .await
    }

    /// [`request`](Self::request) with an explicit timeout.
    pub async fn request_within<Req, Resp>(
        &self,
        tx_topic: &str,
        rx_topic: &str,
        command: &Req,
        timeout: Duration,
    ) -> Result<Option<Resp>, BridgeError>
    where
        Req: TelemetryMessage,
        Resp: TelemetryMessage,
    {
        let (reply_tx, mut reply_rx) = mpsc::channel::<Resp>(1);
        // Listen before sending so a fast responder cannot be missed.
        let replies = self.subscribe::<Resp, _>(rx_topic, move |reply: Resp| {
            let _ = reply_tx.try_send(reply);
        })?;

        let outcome = match self.publish(tx_topic, command) {
            Ok(()) => Ok(tokio::time::timeout(timeout, reply_rx.recv())
                .await
                .ok()
                .flatten()),
            Err(e) => Err(e),
        };
        replies.cancel().await;

        if matches!(outcome, Ok(None)) {
            debug!(tx_topic, rx_topic, timeout_ms = timeout.as_millis() as u64, "no reply before timeout");
        }
        outcome
    }

    /// Send an LRF command on `topics.tx` and wait for the device's reply.
    pub async fn range(
        &self,
        topics: &SightTopics,
        command: &LrfCommand,
    ) -> Result<Option<LrfReply>, BridgeError> {
        self.request(&topics.tx, &topics.rx, command).await
    }

    /// Schema registered for `topic`, if any.
    pub fn schema_for(&self, topic: &str) -> Option<Schema> {
        self.registry.schema_for(topic)
    }
}

/// Space-separated hex rendering of a payload, for trace logs.
struct HexDump<'a>(&'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use horas_types::{CanFrame, GnssState, MotorCommand};

    fn bridge(transport: &InMemoryTransport) -> TelemetryBridge {
        let registry = TopicRegistry::new()
            .with("can/tx/raw", Schema::Can)
            .unwrap()
            .with("horas/gnss/state", Schema::Gnss)
            .unwrap();
        TelemetryBridge::new(
            Session::open(transport.clone()),
            registry,
            BridgeConfig::default(),
        )
    }

    #[test]
    fn hex_dump_formats_bytes() {
        assert_eq!(HexDump(&[0x59, 0xCC, 0x01]).to_string(), "59 CC 01");
        assert_eq!(HexDump(&[]).to_string(), "");
    }

    #[test]
    fn publish_checks_registry_first() {
        let transport = InMemoryTransport::new();
        let bridge = bridge(&transport);

        let err = bridge
            .publish("horas/motors", &MotorCommand::new(1, 0.1))
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnregisteredTopic(_)));

        let err = bridge
            .publish("can/tx/raw", &GnssState::at(1.0, 2.0))
            .unwrap_err();
        assert!(matches!(err, BridgeError::SchemaMismatch { .. }));
        assert_eq!(transport.publish_count(), 0);
    }

    #[test]
    fn publish_counts_records() {
        let transport = InMemoryTransport::new();
        let bridge = bridge(&transport);
        bridge
            .publish("can/tx/raw", &CanFrame::new(0x123, vec![1, 2, 3, 4]))
            .unwrap();
        bridge
            .publish_record(
                "horas/gnss/state",
                &GnssState::at(12.34, 56.78).into_record(),
            )
            .unwrap();
        assert_eq!(transport.publish_count(), 2);
        assert_eq!(bridge.stats().published, 2);
    }

    #[test]
    fn subscribe_outside_runtime_fails() {
        let transport = InMemoryTransport::new();
        let bridge = bridge(&transport);
        let err = bridge
            .subscribe::<CanFrame, _>("can/tx/raw", |_frame: CanFrame| {})
            .unwrap_err();
        assert!(matches!(err, BridgeError::NoRuntime));
        assert_eq!(transport.subscriber_count("can/tx/raw"), 0);
    }
}
