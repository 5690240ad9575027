//! Receive-path diagnostics.
//!
//! Failures on the inbound path happen inside transport callbacks, where no
//! caller is waiting for a `Result`.  They are logged and broadcast as
//! [`Diagnostic`] values instead; handlers never see them.

use horas_types::{DecodeError, InvariantViolation, Schema};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of buffered diagnostics before slow receivers lag.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// An inbound payload could not be decoded and was dropped.
    Decode { topic: String, error: DecodeError },
    /// An inbound record decoded but broke a field invariant and was dropped.
    Validation {
        topic: String,
        schema: Schema,
        violation: InvariantViolation,
    },
    /// A subscription queue was full; its oldest pending record was dropped.
    Overflow { topic: String },
    /// The transport session ended.  Emitted once per session.
    SessionClosed { reason: String },
}

impl Diagnostic {
    /// Topic the diagnostic concerns, if any.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Diagnostic::Decode { topic, .. }
            | Diagnostic::Validation { topic, .. }
            | Diagnostic::Overflow { topic } => Some(topic),
            Diagnostic::SessionClosed { .. } => None,
        }
    }
}

/// Broadcast channel of [`Diagnostic`]s.  Clones share the channel.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    tx: broadcast::Sender<Diagnostic>,
}

impl Diagnostics {
    /// `capacity` is raised to 1 if zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    /// Log `diagnostic` and hand it to every current receiver.
    pub fn emit(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::Decode { topic, error } => {
                warn!(topic = %topic, error = %error, "dropping undecodable payload");
            }
            Diagnostic::Validation {
                topic,
                schema,
                violation,
            } => {
                warn!(topic = %topic, schema = %schema, violation = %violation, "dropping invalid record");
            }
            Diagnostic::Overflow { topic } => {
                debug!(topic = %topic, "subscription queue full, oldest record dropped");
            }
            Diagnostic::SessionClosed { reason } => {
                warn!(reason = %reason, "transport session closed");
            }
        }
        // No receivers is a normal condition.
        let _ = self.tx.send(diagnostic);
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_every_receiver() {
        let diagnostics = Diagnostics::default();
        let mut a = diagnostics.subscribe();
        let mut b = diagnostics.subscribe();

        diagnostics.emit(Diagnostic::Overflow {
            topic: "horas/motors".into(),
        });

        for rx in [&mut a, &mut b] {
            let got = rx.try_recv().unwrap();
            assert_eq!(got.topic(), Some("horas/motors"));
        }
    }

    #[test]
    fn emit_without_receivers_is_silent() {
        Diagnostics::new(0).emit(Diagnostic::SessionClosed {
            reason: "test".into(),
        });
    }
}
