//! The codec seam between typed records and transport byte payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::can::CanFrame;
use crate::error::{DecodeError, InvariantViolation};
use crate::gnss::GnssState;
use crate::motor::MotorCommand;
use crate::sight::{LrfCommand, LrfReply, ThermalCommand};

/// Identifies the fixed schema carried by a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    Can,
    Gnss,
    Motor,
    LrfCommand,
    ThermalCommand,
    LrfReply,
}

impl Schema {
    /// Every schema, in declaration order.
    pub const ALL: [Schema; 6] = [
        Schema::Can,
        Schema::Gnss,
        Schema::Motor,
        Schema::LrfCommand,
        Schema::ThermalCommand,
        Schema::LrfReply,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Schema::Can => "can",
            Schema::Gnss => "gnss",
            Schema::Motor => "motor",
            Schema::LrfCommand => "lrf_command",
            Schema::ThermalCommand => "thermal_command",
            Schema::LrfReply => "lrf_reply",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schema::ALL
            .into_iter()
            .find(|schema| schema.as_str() == s)
            .ok_or_else(|| format!("unknown schema `{s}`"))
    }
}

/// Application-defined bounds applied to records on both paths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordLimits {
    pub velocity_min: f32,
    pub velocity_max: f32,
}

impl RecordLimits {
    /// Build limits, rejecting an empty or non-finite velocity range.
    pub fn new(velocity_min: f32, velocity_max: f32) -> Result<Self, InvariantViolation> {
        if !velocity_min.is_finite() {
            return Err(InvariantViolation::NonFinite { field: "velocity_min" });
        }
        if !velocity_max.is_finite() {
            return Err(InvariantViolation::NonFinite { field: "velocity_max" });
        }
        if velocity_min > velocity_max {
            return Err(InvariantViolation::OutOfRange {
                field: "velocity_min",
                value: f64::from(velocity_min),
                min: f64::NEG_INFINITY,
                max: f64::from(velocity_max),
            });
        }
        Ok(Self {
            velocity_min,
            velocity_max,
        })
    }

    /// Clamp a finite velocity into the configured range.
    pub fn clamp_velocity(&self, velocity: f32) -> f32 {
        velocity.max(self.velocity_min).min(self.velocity_max)
    }
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            velocity_min: -1.0,
            velocity_max: 1.0,
        }
    }
}

/// A record that can travel through the bridge.
///
/// Outbound, the bridge calls [`prepare_outbound`](Self::prepare_outbound),
/// [`validate`](Self::validate), [`conform`](Self::conform) and finally
/// [`encode_payload`](Self::encode_payload).  Inbound it calls
/// [`decode_payload`](Self::decode_payload), `validate` and `conform` before
/// the record reaches a handler.
pub trait TelemetryMessage: Clone + Send + Sync + fmt::Debug + Serialize + 'static {
    /// Schema this type encodes.
    const SCHEMA: Schema;

    fn encode_payload(&self) -> Vec<u8>;

    fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError>;

    fn validate(&self) -> Result<(), InvariantViolation>;

    /// Bring a valid record within `limits`.
    fn conform(&mut self, _limits: &RecordLimits) {}

    /// Fill in publisher-side fields (timestamps, checksums).
    fn prepare_outbound(&mut self, _now_ms: u64) {}

    fn into_record(self) -> TelemetryRecord;
}

/// Any record the bridge knows about, tagged by schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "schema", content = "record", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Can(CanFrame),
    Gnss(GnssState),
    Motor(MotorCommand),
    LrfCommand(LrfCommand),
    ThermalCommand(ThermalCommand),
    LrfReply(LrfReply),
}

macro_rules! with_record {
    ($value:expr, $record:ident => $body:expr) => {
        match $value {
            TelemetryRecord::Can($record) => $body,
            TelemetryRecord::Gnss($record) => $body,
            TelemetryRecord::Motor($record) => $body,
            TelemetryRecord::LrfCommand($record) => $body,
            TelemetryRecord::ThermalCommand($record) => $body,
            TelemetryRecord::LrfReply($record) => $body,
        }
    };
}

impl TelemetryRecord {
    pub fn schema(&self) -> Schema {
        match self {
            TelemetryRecord::Can(_) => Schema::Can,
            TelemetryRecord::Gnss(_) => Schema::Gnss,
            TelemetryRecord::Motor(_) => Schema::Motor,
            TelemetryRecord::LrfCommand(_) => Schema::LrfCommand,
            TelemetryRecord::ThermalCommand(_) => Schema::ThermalCommand,
            TelemetryRecord::LrfReply(_) => Schema::LrfReply,
        }
    }

    /// Decode `payload` as a record of `schema`.
    pub fn decode(schema: Schema, payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(match schema {
            Schema::Can => TelemetryRecord::Can(CanFrame::decode_payload(payload)?),
            Schema::Gnss => TelemetryRecord::Gnss(GnssState::decode_payload(payload)?),
            Schema::Motor => TelemetryRecord::Motor(MotorCommand::decode_payload(payload)?),
            Schema::LrfCommand => {
                TelemetryRecord::LrfCommand(LrfCommand::decode_payload(payload)?)
            }
            Schema::ThermalCommand => {
                TelemetryRecord::ThermalCommand(ThermalCommand::decode_payload(payload)?)
            }
            Schema::LrfReply => TelemetryRecord::LrfReply(LrfReply::decode_payload(payload)?),
        })
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        with_record!(self, r => r.encode_payload())
    }

    pub fn validate(&self) -> Result<(), InvariantViolation> {
        with_record!(self, r => r.validate())
    }

    pub fn conform(&mut self, limits: &RecordLimits) {
        with_record!(self, r => r.conform(limits))
    }

    pub fn prepare_outbound(&mut self, now_ms: u64) {
        with_record!(self, r => r.prepare_outbound(now_ms))
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Convert a millisecond Unix timestamp into a UTC date-time.
pub fn timestamp_datetime(timestamp_ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}
