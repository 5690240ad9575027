//! Demo publishers.
//!
//! Each [`Scenario`] drives one kind of traffic through a bridge: a single
//! CAN frame, a motor velocity ramp, a GNSS fix, or a range-finder
//! request/response.  Topics are looked up in the bridge's registry by
//! schema, so the scenarios follow whatever the deployment configured.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use horas_middleware::{SightTopics, TelemetryBridge, TopicRegistry};
use horas_types::{
    BridgeError, CanFrame, GnssState, LrfCommand, LrfReply, MotorCommand, Schema,
};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("no topic is registered for {0} records")]
    MissingTopic(Schema),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Publish nothing; only the loggers run.
    Idle,
    Can,
    Motor,
    Gnss,
    Lrf,
    /// Every scenario above, in order.
    All,
}

impl Scenario {
    pub const NAMES: [&'static str; 6] = ["idle", "can", "motor", "gnss", "lrf", "all"];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Idle => "idle",
            Scenario::Can => "can",
            Scenario::Motor => "motor",
            Scenario::Gnss => "gnss",
            Scenario::Lrf => "lrf",
            Scenario::All => "all",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "idle" => Scenario::Idle,
            "can" => Scenario::Can,
            "motor" => Scenario::Motor,
            "gnss" => Scenario::Gnss,
            "lrf" => Scenario::Lrf,
            "all" => Scenario::All,
            other => {
                return Err(format!(
                    "unknown scenario `{other}` (expected one of: {})",
                    Scenario::NAMES.join(", ")
                ));
            }
        })
    }
}

/// Knobs for the demo traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoOptions {
    pub motor_id: u32,
    /// Number of ramp steps; each adds 0.01 to the velocity target.  A
    /// zero-velocity stop command follows the last step.
    pub motor_steps: u32,
    pub motor_interval: Duration,
    /// LRF command body; the checksum byte is appended on publish.
    pub lrf_body: Vec<u8>,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            motor_id: 1,
            motor_steps: 120,
            motor_interval: Duration::from_millis(10),
            lrf_body: b"RANGE".to_vec(),
        }
    }
}

/// What a scenario did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemoReport {
    pub published: u64,
    pub lrf_reply: Option<LrfReply>,
}

/// First topic registered for `schema`.
pub fn topic_for(registry: &TopicRegistry, schema: Schema) -> Option<&str> {
    registry
        .iter()
        .find(|(_, registered)| *registered == schema)
        .map(|(topic, _)| topic)
}

fn require(registry: &TopicRegistry, schema: Schema) -> Result<String, DemoError> {
    topic_for(registry, schema)
        .map(str::to_string)
        .ok_or(DemoError::MissingTopic(schema))
}

/// Play `scenario` through `bridge`.
#[instrument(skip_all, fields(scenario = %scenario))]
pub async fn play(
    bridge: &TelemetryBridge,
    scenario: Scenario,
    options: &DemoOptions,
) -> Result<DemoReport, DemoError> {
    let mut report = DemoReport::default();
    match scenario {
        Scenario::Idle => {}
        Scenario::Can => publish_can(bridge, &mut report)?,
        Scenario::Motor => motor_ramp(bridge, options, &mut report).await?,
        Scenario::Gnss => publish_gnss(bridge, &mut report)?,
        Scenario::Lrf => range_once(bridge, options, &mut report).await?,
        Scenario::All => {
            publish_can(bridge, &mut report)?;
            publish_gnss(bridge, &mut report)?;
            motor_ramp(bridge, options, &mut report).await?;
            range_once(bridge, options, &mut report).await?;
        }
    }
    info!(published = report.published, "scenario finished");
    Ok(report)
}

fn publish_can(bridge: &TelemetryBridge, report: &mut DemoReport) -> Result<(), DemoError> {
    let topic = require(bridge.registry(), Schema::Can)?;
    bridge.publish(&topic, &CanFrame::new(0x123, vec![0x01, 0x02, 0x03, 0x04]))?;
    report.published += 1;
    Ok(())
}

/// A fix over Sydney with a level attitude.
pub fn sample_fix() -> GnssState {
    GnssState {
        latitude: -33.8688,
        longitude: 151.2093,
        position_x: 0.0,
        position_y: 0.0,
        position_z: 58.0,
        rotation_x: 0.0,
        rotation_y: 0.0,
        rotation_z: 87.5,
        pressure: 1013.25,
        gforce: 1.0,
        timestamp: 0,
    }
}

fn publish_gnss(bridge: &TelemetryBridge, report: &mut DemoReport) -> Result<(), DemoError> {
    let topic = require(bridge.registry(), Schema::Gnss)?;
    bridge.publish(&topic, &sample_fix())?;
    report.published += 1;
    Ok(())
}

async fn motor_ramp(
    bridge: &TelemetryBridge,
    options: &DemoOptions,
    report: &mut DemoReport,
) -> Result<(), DemoError> {
    let topic = require(bridge.registry(), Schema::Motor)?;
    // Past 1.0 the bridge clamps to the configured limits.
    for step in 1..=options.motor_steps {
        let velocity = step as f32 * 0.01;
        bridge.publish(&topic, &MotorCommand::new(options.motor_id, velocity))?;
        report.published += 1;
        tokio::time::sleep(options.motor_interval).await;
    }
    // Leave the motor stopped.
    bridge.publish(&topic, &MotorCommand::new(options.motor_id, 0.0))?;
    report.published += 1;
    Ok(())
}

async fn range_once(
    bridge: &TelemetryBridge,
    options: &DemoOptions,
    report: &mut DemoReport,
) -> Result<(), DemoError> {
    let topics = SightTopics {
        tx: require(bridge.registry(), Schema::LrfCommand)?,
        rx: require(bridge.registry(), Schema::LrfReply)?,
    };
    let reply = bridge
        .range(&topics, &LrfCommand::sealed(&options.lrf_body))
        .await?;
    report.published += 1;
    match &reply {
        Some(reply) => info!(?reply, "range finder replied"),
        None => warn!(topic = %topics.rx, "range finder did not reply"),
    }
    report.lrf_reply = reply;
    Ok(())
}
