//! `horas-middleware` – the telemetry bridge
//!
//! Moves typed CAN, GNSS, motor and sight records between application code
//! and a pub/sub transport without caring what the records mean.
//!
//! # Modules
//!
//! - [`transport`] – the [`Transport`] seam and the in-process
//!   [`InMemoryTransport`].
//! - [`session`] – the shared, reference-counted transport [`Session`].
//! - [`registry`] – the topic-to-schema [`TopicRegistry`] and topic rules.
//! - [`bridge`] – [`TelemetryBridge`]: typed publish, subscribe and
//!   request/response.
//! - [`subscription`] – per-subscription queue and handler task.
//! - [`diagnostics`] – receive-path failures broadcast as [`Diagnostic`]s.
//! - [`tap`] – WebSocket JSON tap for dashboards.

pub mod bridge;
pub mod diagnostics;
pub mod queue;
pub mod registry;
pub mod session;
pub mod stats;
pub mod subscription;
pub mod tap;
pub mod transport;

pub use bridge::{BridgeConfig, DEFAULT_REQUEST_TIMEOUT, TelemetryBridge};
pub use diagnostics::{DEFAULT_DIAGNOSTICS_CAPACITY, Diagnostic, Diagnostics};
pub use registry::{SightTopics, TopicRegistry, validate_topic};
pub use session::Session;
pub use stats::BridgeStats;
pub use subscription::{RecordHandler, Subscription, SubscriptionState};
pub use tap::{DEFAULT_TAP_CAPACITY, TapError, TelemetryTap, tap_frame};
pub use transport::{InMemoryTransport, PayloadSink, RegistrationId, Transport};
