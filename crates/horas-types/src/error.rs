//! Error taxonomy for the telemetry bridge.
//!
//! | Error | Raised when |
//! |---|---|
//! | [`BridgeError::Encoding`] | an outbound record violates a field invariant |
//! | [`DecodeError`] | inbound bytes are not a valid encoding of the schema |
//! | [`BridgeError::Validation`] | an inbound record decodes but is invalid |
//! | [`TransportError`] | the session is closed or the backend failed |

use thiserror::Error;

use crate::message::Schema;

/// A field-level rule broken by a record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("CAN payload holds {len} bytes (at most 8 allowed)")]
    CanDataTooLong { len: usize },

    #[error("CAN id {id:#X} does not fit a {bits}-bit identifier")]
    CanIdOutOfRange { id: u32, bits: u8 },

    #[error("field `{field}` is not a finite number")]
    NonFinite { field: &'static str },

    #[error("field `{field}` = {value} lies outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("checksum mismatch: expected {expected:#04X}, found {found:#04X}")]
    ChecksumMismatch { expected: u8, found: u8 },

    #[error("frame of {len} bytes is shorter than the {min} bytes required")]
    FrameTooShort { len: usize, min: usize },

    #[error("reply code {code:#04X} is reserved for a structured reply")]
    ReservedReplyCode { code: u8 },
}

/// Inbound bytes could not be decoded into the expected schema.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed {schema} payload: {reason}")]
pub struct DecodeError {
    pub schema: Schema,
    pub reason: String,
}

impl DecodeError {
    pub fn new(schema: Schema, reason: impl Into<String>) -> Self {
        Self {
            schema,
            reason: reason.into(),
        }
    }
}

/// Failure reported by the underlying pub/sub transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport session is closed")]
    SessionClosed,

    #[error("{transport} transport failure: {reason}")]
    Backend {
        transport: &'static str,
        reason: String,
    },
}

/// Every error the bridge reports to its callers.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("cannot encode {schema} record: {violation}")]
    Encoding {
        schema: Schema,
        violation: InvariantViolation,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid {schema} record: {violation}")]
    Validation {
        schema: Schema,
        violation: InvariantViolation,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid topic {0:?}")]
    InvalidTopic(String),

    #[error("topic `{0}` is not registered")]
    UnregisteredTopic(String),

    #[error("topic `{topic}` carries {registered} records, not {requested}")]
    SchemaMismatch {
        topic: String,
        registered: Schema,
        requested: Schema,
    },

    #[error("subscriptions need a running Tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_error_names_schema_and_rule() {
        let err = BridgeError::Encoding {
            schema: Schema::Can,
            violation: InvariantViolation::CanDataTooLong { len: 9 },
        };
        let text = err.to_string();
        assert!(text.contains("can"));
        assert!(text.contains("9 bytes"));
    }

    #[test]
    fn decode_error_is_transparent() {
        let err: BridgeError = DecodeError::new(Schema::Gnss, "buffer underflow").into();
        assert_eq!(err.to_string(), "malformed gnss payload: buffer underflow");
    }

    #[test]
    fn can_id_violation_formats_hex() {
        let v = InvariantViolation::CanIdOutOfRange { id: 0x800, bits: 11 };
        assert_eq!(v.to_string(), "CAN id 0x800 does not fit a 11-bit identifier");
    }

    #[test]
    fn transport_error_converts() {
        let err: BridgeError = TransportError::SessionClosed.into();
        assert!(matches!(err, BridgeError::Transport(TransportError::SessionClosed)));
    }
}
