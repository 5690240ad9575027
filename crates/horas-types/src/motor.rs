//! Motor velocity commands.

use prost::Message;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, InvariantViolation};
use crate::message::{RecordLimits, Schema, TelemetryMessage, TelemetryRecord};

/// Velocity target for one drive motor (e.g. on `horas/motors`).
///
/// `velocity_target` is clamped to [`RecordLimits`] whenever the record
/// crosses the bridge, in either direction.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize, JsonSchema)]
pub struct MotorCommand {
    #[prost(uint32, tag = "1")]
    pub motor_id: u32,
    #[prost(float, tag = "2")]
    pub velocity_target: f32,
    /// Milliseconds since the Unix epoch.
    #[prost(uint64, tag = "3")]
    pub timestamp: u64,
}

impl MotorCommand {
    pub fn new(motor_id: u32, velocity_target: f32) -> Self {
        Self {
            motor_id,
            velocity_target,
            timestamp: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }
}

impl TelemetryMessage for MotorCommand {
    const SCHEMA: Schema = Schema::Motor;

    fn encode_payload(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        <Self as Message>::decode(payload).map_err(|e| DecodeError::new(Schema::Motor, e.to_string()))
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        if !self.velocity_target.is_finite() {
            return Err(InvariantViolation::NonFinite {
                field: "velocity_target",
            });
        }
        Ok(())
    }

    fn conform(&mut self, limits: &RecordLimits) {
        self.velocity_target = limits.clamp_velocity(self.velocity_target);
    }

    fn prepare_outbound(&mut self, now_ms: u64) {
        if self.timestamp == 0 {
            self.timestamp = now_ms;
        }
    }

    fn into_record(self) -> TelemetryRecord {
        TelemetryRecord::Motor(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conform_clamps_to_limits() {
        let mut cmd = MotorCommand::new(1, 1.37);
        cmd.conform(&RecordLimits::default());
        assert_eq!(cmd.velocity_target, 1.0);

        let mut reverse = MotorCommand::new(2, -3.0);
        reverse.conform(&RecordLimits::new(-2.0, 2.0).unwrap());
        assert_eq!(reverse.velocity_target, -2.0);
    }

    #[test]
    fn nan_velocity_is_invalid() {
        let cmd = MotorCommand::new(1, f32::NAN);
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn roundtrip_keeps_motor_id() {
        let cmd = MotorCommand::new(10, 0.42).with_timestamp(5);
        let decoded = MotorCommand::decode_payload(&cmd.encode_payload()).unwrap();
        assert_eq!(decoded, cmd);
    }
}
