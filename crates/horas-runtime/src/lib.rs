//! `horas-runtime` – process plumbing around the telemetry bridge
//!
//! # Modules
//!
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, with JSON output on request and an optional
//!   OTLP span exporter (`OTEL_EXPORTER_OTLP_ENDPOINT`).
//! - [`console`] – human-readable log lines for every registered topic.
//! - [`demo`] – scripted traffic: a CAN frame, a motor ramp, a GNSS fix and
//!   a range-finder request.
//! - [`rangefinder`] – a simulated laser range finder that answers commands
//!   on loopback sessions.

pub mod console;
pub mod demo;
pub mod rangefinder;
pub mod telemetry;

pub use console::{attach_console, describe};
pub use demo::{DemoError, DemoOptions, DemoReport, Scenario, play};
pub use rangefinder::RangeFinderSim;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
