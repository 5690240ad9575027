//! Raw sight-device frames: laser range finder (LRF) and thermal camera.
//!
//! Commands go out on `{node}/sight/{device}/tx/raw` and replies come back on
//! `{node}/sight/{device}/rx/raw`.  Unlike the Protocol Buffers records these
//! frames are opaque bytes protected by a one-byte checksum whose position
//! depends on the device:
//!
//! | Format | Checksum byte | Value |
//! |---|---|---|
//! | [`SightFormat::LaserRangeFinder`] | last | `(sum of preceding bytes) ^ 0x50`, low byte |
//! | [`SightFormat::Thermal`] | `len - 3` | `(sum of preceding bytes) % 256` |

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, InvariantViolation};
use crate::message::{Schema, TelemetryMessage, TelemetryRecord};

/// First byte of every range-finder reply.
pub const LRF_REPLY_HEADER: u8 = 0x59;
/// Reply code carrying three range measurements.
pub const LRF_REPLY_RANGES: u8 = 0xCC;
/// Reply code acknowledging a command.
pub const LRF_REPLY_ACK: u8 = 0x01;

const LRF_CHECKSUM_XOR: u64 = 0x50;
const LRF_RANGE_COUNT: usize = 3;
const LRF_RANGE_STRIDE: usize = 6;
const LRF_RANGES_LEN: usize = 2 + LRF_RANGE_COUNT * LRF_RANGE_STRIDE;

/// Checksum layout of a sight device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightFormat {
    Thermal,
    LaserRangeFinder,
}

impl SightFormat {
    /// Index of the checksum byte within a frame of `len` bytes.
    pub fn checksum_offset(self, len: usize) -> Option<usize> {
        match self {
            SightFormat::Thermal => len.checked_sub(3),
            SightFormat::LaserRangeFinder => len.checked_sub(1),
        }
    }

    /// Shortest frame that still has room for the checksum.
    pub fn min_len(self) -> usize {
        match self {
            SightFormat::Thermal => 3,
            SightFormat::LaserRangeFinder => 1,
        }
    }

    /// Checksum of `frame`, or `None` when it is too short to carry one.
    pub fn checksum(self, frame: &[u8]) -> Option<u8> {
        let offset = self.checksum_offset(frame.len())?;
        let sum: u64 = frame[..offset].iter().map(|b| u64::from(*b)).sum();
        let value = match self {
            SightFormat::Thermal => sum % 256,
            SightFormat::LaserRangeFinder => (sum ^ LRF_CHECKSUM_XOR) & 0xFF,
        };
        Some(value as u8)
    }

    /// Write the checksum into its slot.
    pub fn seal(self, frame: &mut [u8]) -> Result<(), InvariantViolation> {
        let too_short = InvariantViolation::FrameTooShort {
            len: frame.len(),
            min: self.min_len(),
        };
        let (Some(offset), Some(sum)) = (self.checksum_offset(frame.len()), self.checksum(frame))
        else {
            return Err(too_short);
        };
        frame[offset] = sum;
        Ok(())
    }

    pub fn verify(self, frame: &[u8]) -> Result<(), InvariantViolation> {
        let (Some(offset), Some(expected)) =
            (self.checksum_offset(frame.len()), self.checksum(frame))
        else {
            return Err(InvariantViolation::FrameTooShort {
                len: frame.len(),
                min: self.min_len(),
            });
        };
        let found = frame[offset];
        if found != expected {
            return Err(InvariantViolation::ChecksumMismatch { expected, found });
        }
        Ok(())
    }
}

fn decode_raw(schema: Schema, format: SightFormat, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if payload.len() < format.min_len() {
        return Err(DecodeError::new(
            schema,
            format!("{} bytes, need at least {}", payload.len(), format.min_len()),
        ));
    }
    Ok(payload.to_vec())
}

/// Raw command frame for the laser range finder.  The last byte is the
/// checksum slot; publishing fills it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LrfCommand {
    pub frame: Vec<u8>,
}

impl LrfCommand {
    /// Wrap a complete frame, checksum slot included.
    pub fn new(frame: impl Into<Vec<u8>>) -> Self {
        Self {
            frame: frame.into(),
        }
    }

    /// Append a checksum slot to `body` and seal it.
    pub fn sealed(body: &[u8]) -> Self {
        let mut frame = body.to_vec();
        frame.push(0);
        // A frame with a slot always meets the minimum length.
        let _ = SightFormat::LaserRangeFinder.seal(&mut frame);
        Self { frame }
    }
}

impl TelemetryMessage for LrfCommand {
    const SCHEMA: Schema = Schema::LrfCommand;

    fn encode_payload(&self) -> Vec<u8> {
        self.frame.clone()
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        decode_raw(Schema::LrfCommand, SightFormat::LaserRangeFinder, payload).map(Self::new)
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        SightFormat::LaserRangeFinder.verify(&self.frame)
    }

    fn prepare_outbound(&mut self, _now_ms: u64) {
        // Too-short frames are left alone and rejected by `validate`.
        let _ = SightFormat::LaserRangeFinder.seal(&mut self.frame);
    }

    fn into_record(self) -> TelemetryRecord {
        TelemetryRecord::LrfCommand(self)
    }
}

/// Raw command frame for the thermal sight.  The checksum sits three bytes
/// from the end, ahead of the two trailer bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ThermalCommand {
    pub frame: Vec<u8>,
}

impl ThermalCommand {
    pub fn new(frame: impl Into<Vec<u8>>) -> Self {
        Self {
            frame: frame.into(),
        }
    }
}

impl TelemetryMessage for ThermalCommand {
    const SCHEMA: Schema = Schema::ThermalCommand;

    fn encode_payload(&self) -> Vec<u8> {
        self.frame.clone()
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        decode_raw(Schema::ThermalCommand, SightFormat::Thermal, payload).map(Self::new)
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        SightFormat::Thermal.verify(&self.frame)
    }

    fn prepare_outbound(&mut self, _now_ms: u64) {
        let _ = SightFormat::Thermal.seal(&mut self.frame);
    }

    fn into_record(self) -> TelemetryRecord {
        TelemetryRecord::ThermalCommand(self)
    }
}

/// One range measurement from the LRF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RangeReading {
    /// Metres.
    pub range_m: f32,
    pub signal_level: u16,
}

/// Reply frame from the laser range finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrfReply {
    /// Code `0xCC`: first, second and last target.
    Ranges { readings: [RangeReading; 3] },
    /// Code `0x01`.
    Ack,
    /// Any other reply code, kept verbatim.
    Other { code: u8, body: Vec<u8> },
}

impl LrfReply {
    pub fn readings(&self) -> Option<&[RangeReading; 3]> {
        match self {
            LrfReply::Ranges { readings } => Some(readings),
            _ => None,
        }
    }
}

impl TelemetryMessage for LrfReply {
    const SCHEMA: Schema = Schema::LrfReply;

    fn encode_payload(&self) -> Vec<u8> {
        let mut out = vec![LRF_REPLY_HEADER];
        match self {
            LrfReply::Ranges { readings } => {
                out.push(LRF_REPLY_RANGES);
                for reading in readings {
                    out.extend_from_slice(&reading.range_m.to_le_bytes());
                    out.extend_from_slice(&reading.signal_level.to_le_bytes());
                }
            }
            LrfReply::Ack => out.push(LRF_REPLY_ACK),
            LrfReply::Other { code, body } => {
                out.push(*code);
                out.extend_from_slice(body);
            }
        }
        out
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |reason: String| DecodeError::new(Schema::LrfReply, reason);
        let [header, code, rest @ ..] = payload else {
            return Err(malformed(format!("{} bytes, need at least 2", payload.len())));
        };
        if *header != LRF_REPLY_HEADER {
            return Err(malformed(format!("unexpected header {header:#04X}")));
        }
        match *code {
            LRF_REPLY_RANGES => {
                if payload.len() < LRF_RANGES_LEN {
                    return Err(malformed(format!(
                        "range reply of {} bytes, need {LRF_RANGES_LEN}",
                        payload.len()
                    )));
                }
                let mut readings = [RangeReading {
                    range_m: 0.0,
                    signal_level: 0,
                }; LRF_RANGE_COUNT];
                for (i, chunk) in rest
                    .chunks_exact(LRF_RANGE_STRIDE)
                    .take(LRF_RANGE_COUNT)
                    .enumerate()
                {
                    readings[i] = RangeReading {
                        range_m: f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                        signal_level: u16::from_le_bytes([chunk[4], chunk[5]]),
                    };
                }
                Ok(LrfReply::Ranges { readings })
            }
            LRF_REPLY_ACK => Ok(LrfReply::Ack),
            other => Ok(LrfReply::Other {
                code: other,
                body: rest.to_vec(),
            }),
        }
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        match self {
            LrfReply::Ranges { readings } if readings.iter().any(|r| !r.range_m.is_finite()) => {
                Err(InvariantViolation::NonFinite { field: "range_m" })
            }
            // These codes decode to `Ranges` or `Ack`, never back to `Other`.
            LrfReply::Other { code, .. } if matches!(*code, LRF_REPLY_RANGES | LRF_REPLY_ACK) => {
                Err(InvariantViolation::ReservedReplyCode { code: *code })
            }
            _ => Ok(()),
        }
    }

    fn into_record(self) -> TelemetryRecord {
        TelemetryRecord::LrfReply(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lrf_checksum_is_sum_xor_0x50() {
        let cmd = LrfCommand::sealed(&[0x55, 0x01]);
        assert_eq!(cmd.frame, vec![0x55, 0x01, 0x06]);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn lrf_checksum_uses_low_byte_of_sum() {
        let cmd = LrfCommand::sealed(&[0xFF, 0xFF]);
        // 0x1FE ^ 0x50 = 0x1AE
        assert_eq!(cmd.frame[2], 0xAE);
    }

    #[test]
    fn thermal_checksum_sits_before_trailer() {
        let mut cmd = ThermalCommand::new(vec![0x10, 0x20, 0x00, 0xAA, 0xBB]);
        cmd.prepare_outbound(0);
        assert_eq!(cmd.frame, vec![0x10, 0x20, 0x30, 0xAA, 0xBB]);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn corrupted_frame_fails_verification() {
        let mut cmd = LrfCommand::sealed(&[0x55, 0x01]);
        cmd.frame[0] = 0x54;
        assert_eq!(
            cmd.validate(),
            Err(InvariantViolation::ChecksumMismatch {
                expected: 0x05,
                found: 0x06
            })
        );
    }

    #[test]
    fn thermal_frame_too_short_cannot_be_sealed() {
        let mut frame = vec![0x01, 0x02];
        assert_eq!(
            SightFormat::Thermal.seal(&mut frame),
            Err(InvariantViolation::FrameTooShort { len: 2, min: 3 })
        );
        assert!(ThermalCommand::decode_payload(&frame).is_err());
    }

    #[test]
    fn range_reply_parses_three_readings() {
        let reply = LrfReply::Ranges {
            readings: [
                RangeReading { range_m: 120.5, signal_level: 900 },
                RangeReading { range_m: 240.0, signal_level: 450 },
                RangeReading { range_m: 0.0, signal_level: 0 },
            ],
        };
        let bytes = reply.encode_payload();
        assert_eq!(bytes.len(), LRF_RANGES_LEN);
        assert_eq!(&bytes[..2], &[0x59, 0xCC]);
        assert_eq!(LrfReply::decode_payload(&bytes).unwrap(), reply);
    }

    #[test]
    fn short_range_reply_is_malformed() {
        assert!(LrfReply::decode_payload(&[0x59, 0xCC, 0x00]).is_err());
        assert!(LrfReply::decode_payload(&[0x59]).is_err());
        assert!(LrfReply::decode_payload(&[0x55, 0x01]).is_err());
    }

    #[test]
    fn ack_and_unknown_codes() {
        assert_eq!(LrfReply::decode_payload(&[0x59, 0x01]).unwrap(), LrfReply::Ack);
        assert_eq!(
            LrfReply::decode_payload(&[0x59, 0x42, 0x07]).unwrap(),
            LrfReply::Other { code: 0x42, body: vec![0x07] }
        );
    }

    #[test]
    fn nan_range_is_invalid() {
        let reply = LrfReply::Ranges {
            readings: [RangeReading { range_m: f32::NAN, signal_level: 1 }; 3],
        };
        assert!(reply.validate().is_err());
    }

    #[test]
    fn other_reply_cannot_use_structured_codes() {
        for code in [LRF_REPLY_RANGES, LRF_REPLY_ACK] {
            let reply = LrfReply::Other { code, body: vec![7, 7] };
            assert_eq!(
                reply.validate(),
                Err(InvariantViolation::ReservedReplyCode { code })
            );
        }
        let reply = LrfReply::Other { code: 0x42, body: vec![7] };
        assert!(reply.validate().is_ok());
        assert_eq!(LrfReply::decode_payload(&reply.encode_payload()).unwrap(), reply);
    }
}
