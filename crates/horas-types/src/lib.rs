//! `horas-types` – record schemas and the error taxonomy shared by every
//! HORAS crate.
//!
//! Each vehicle-state record is a Protocol Buffers message described with
//! `prost` derive attributes, so the byte layout is fixed by the field tags
//! and stays decodable from any language that shares the schema.  Sight
//! devices (laser range finder, thermal camera) speak raw checksummed
//! frames instead; they implement the same [`TelemetryMessage`] trait so the
//! bridge treats both families alike.
//!
//! # Modules
//!
//! - [`can`] – [`CanFrame`], a single CAN bus frame.
//! - [`gnss`] – [`GnssState`], position, orientation and barometry.
//! - [`motor`] – [`MotorCommand`], a velocity target for one motor.
//! - [`sight`] – raw range-finder / thermal frames and their checksums.
//! - [`message`] – the [`TelemetryMessage`] codec trait, [`Schema`],
//!   [`RecordLimits`] and the dynamic [`TelemetryRecord`].
//! - [`error`] – encoding, decoding, validation and transport errors.

pub mod can;
pub mod error;
pub mod gnss;
pub mod message;
pub mod motor;
pub mod sight;

pub use can::CanFrame;
pub use error::{BridgeError, DecodeError, InvariantViolation, TransportError};
pub use gnss::{Dms, GnssState};
pub use message::{
    RecordLimits, Schema, TelemetryMessage, TelemetryRecord, now_millis, timestamp_datetime,
};
pub use motor::MotorCommand;
pub use sight::{LrfCommand, LrfReply, RangeReading, SightFormat, ThermalCommand};
