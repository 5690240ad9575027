//! Simulated laser range finder for loopback sessions.
//!
//! Listens on a sight device's command topic and answers every valid command
//! with a range reply on the matching reply topic, the way the physical unit
//! does over its serial link.

use horas_middleware::{SightTopics, Subscription, TelemetryBridge};
use horas_types::{BridgeError, LrfCommand, LrfReply, RangeReading};
use tracing::{debug, warn};

/// Readings reported when none are configured: first, second and last
/// target in metres with their signal levels.
pub const DEFAULT_READINGS: [RangeReading; 3] = [
    RangeReading {
        range_m: 812.5,
        signal_level: 900,
    },
    RangeReading {
        range_m: 0.0,
        signal_level: 0,
    },
    RangeReading {
        range_m: 1204.0,
        signal_level: 310,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct RangeFinderSim {
    readings: [RangeReading; 3],
}

impl Default for RangeFinderSim {
    fn default() -> Self {
        Self::new(DEFAULT_READINGS)
    }
}

impl RangeFinderSim {
    pub fn new(readings: [RangeReading; 3]) -> Self {
        Self { readings }
    }

    /// Reply the device would send for `command`.
    pub fn reply_to(&self, _command: &LrfCommand) -> LrfReply {
        LrfReply::Ranges {
            readings: self.readings,
        }
    }

    /// Start answering commands on `topics.tx`.  The simulator stops when
    /// the returned subscription is cancelled or dropped.
    pub fn attach(self, bridge: &TelemetryBridge, topics: &SightTopics) -> Result<Subscription, BridgeError> {
        let responder = bridge.clone();
        let reply_topic = topics.rx.clone();
        bridge.subscribe::<LrfCommand, _>(&topics.tx, move |command: LrfCommand| {
            debug!(bytes = command.frame.len(), "simulated range finder triggered");
            let reply = self.reply_to(&command);
            if let Err(e) = responder.publish(&reply_topic, &reply) {
                warn!(topic = %reply_topic, error = %e, "simulated range finder could not reply");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horas_middleware::{BridgeConfig, InMemoryTransport, Session, TopicRegistry};
    use horas_types::Schema;

    #[tokio::test]
    async fn answers_range_requests() {
        let topics = SightTopics::lrf("horas");
        let registry = TopicRegistry::new()
            .with(topics.tx.clone(), Schema::LrfCommand)
            .and_then(|r| r.with(topics.rx.clone(), Schema::LrfReply))
            .unwrap();
        let bridge = TelemetryBridge::new(
            Session::open(InMemoryTransport::new()),
            registry,
            BridgeConfig::default(),
        );
        let _sim = RangeFinderSim::default().attach(&bridge, &topics).unwrap();

        let reply = bridge
            .range(&topics, &LrfCommand::sealed(b"RANGE"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.readings(), Some(&DEFAULT_READINGS));
    }
}
