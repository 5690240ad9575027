//! GNSS position, orientation and barometric state.

use chrono::{DateTime, Utc};
use prost::Message;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, InvariantViolation};
use crate::message::{Schema, TelemetryMessage, TelemetryRecord, timestamp_datetime};

/// Vehicle state published on the GNSS topic (e.g. `horas/gnss/state`).
#[derive(Clone, PartialEq, Message, Serialize, Deserialize, JsonSchema)]
pub struct GnssState {
    /// Decimal degrees.
    #[prost(double, tag = "1")]
    pub latitude: f64,
    /// Decimal degrees.
    #[prost(double, tag = "2")]
    pub longitude: f64,
    /// Metres, east-west.
    #[prost(float, tag = "3")]
    pub position_x: f32,
    /// Metres, north-south.
    #[prost(float, tag = "4")]
    pub position_y: f32,
    /// Metres, altitude.
    #[prost(float, tag = "5")]
    pub position_z: f32,
    /// Roll in degrees.
    #[prost(float, tag = "6")]
    pub rotation_x: f32,
    /// Pitch in degrees.
    #[prost(float, tag = "7")]
    pub rotation_y: f32,
    /// Yaw (heading) in degrees.
    #[prost(float, tag = "8")]
    pub rotation_z: f32,
    /// Atmospheric pressure in hPa.
    #[prost(float, tag = "9")]
    pub pressure: f32,
    #[prost(float, tag = "10")]
    pub gforce: f32,
    /// Milliseconds since the Unix epoch.
    #[prost(uint64, tag = "11")]
    pub timestamp: u64,
}

/// Degrees, minutes and seconds of an angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dms {
    pub degrees: i32,
    pub minutes: i32,
    pub seconds: f64,
}

impl Dms {
    /// Split a decimal angle.  The sign is carried by `degrees` only.
    pub fn from_decimal(decimal: f64) -> Self {
        let degrees = decimal.trunc();
        let fraction = (decimal.abs() - degrees.abs()) * 60.0;
        let minutes = fraction.trunc();
        Self {
            degrees: degrees as i32,
            minutes: minutes as i32,
            seconds: (fraction - minutes) * 60.0,
        }
    }
}

impl GnssState {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    pub fn latitude_dms(&self) -> Dms {
        Dms::from_decimal(self.latitude)
    }

    pub fn longitude_dms(&self) -> Dms {
        Dms::from_decimal(self.longitude)
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        timestamp_datetime(self.timestamp)
    }

    fn float_fields(&self) -> [(&'static str, f32); 8] {
        [
            ("position_x", self.position_x),
            ("position_y", self.position_y),
            ("position_z", self.position_z),
            ("rotation_x", self.rotation_x),
            ("rotation_y", self.rotation_y),
            ("rotation_z", self.rotation_z),
            ("pressure", self.pressure),
            ("gforce", self.gforce),
        ]
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), InvariantViolation> {
    if !value.is_finite() {
        return Err(InvariantViolation::NonFinite { field });
    }
    if value < min || value > max {
        return Err(InvariantViolation::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

impl TelemetryMessage for GnssState {
    const SCHEMA: Schema = Schema::Gnss;

    fn encode_payload(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        <Self as Message>::decode(payload).map_err(|e| DecodeError::new(Schema::Gnss, e.to_string()))
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        check_range("latitude", self.latitude, -90.0, 90.0)?;
        check_range("longitude", self.longitude, -180.0, 180.0)?;
        for (field, value) in self.float_fields() {
            if !value.is_finite() {
                return Err(InvariantViolation::NonFinite { field });
            }
        }
        check_range("pressure", f64::from(self.pressure), 0.0, f64::MAX)
    }

    fn prepare_outbound(&mut self, now_ms: u64) {
        if self.timestamp == 0 {
            self.timestamp = now_ms;
        }
    }

    fn into_record(self) -> TelemetryRecord {
        TelemetryRecord::Gnss(self)
    }
}
