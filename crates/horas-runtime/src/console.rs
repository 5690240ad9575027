//! Console loggers: one subscription per registered topic, each record
//! rendered as a single human-readable log line.

use horas_middleware::{Subscription, TelemetryBridge};
use horas_types::{BridgeError, CanFrame, Dms, GnssState, LrfReply, TelemetryRecord};
use tracing::info;

/// Subscribe to every topic in the bridge's registry and log what arrives.
///
/// Keep the returned subscriptions alive for as long as logging should
/// continue.
pub fn attach_console(bridge: &TelemetryBridge) -> Result<Vec<Subscription>, BridgeError> {
    let topics: Vec<String> = bridge
        .registry()
        .iter()
        .map(|(topic, _)| topic.to_string())
        .collect();
    topics
        .into_iter()
        .map(|topic| {
            let label = topic.clone();
            bridge.subscribe_records(&topic, move |record: TelemetryRecord| {
                info!(topic = %label, schema = %record.schema(), "{}", describe(&record));
            })
        })
        .collect()
}

/// One-line summary of a record.
pub fn describe(record: &TelemetryRecord) -> String {
    match record {
        TelemetryRecord::Can(frame) => describe_can(frame),
        TelemetryRecord::Gnss(state) => describe_gnss(state),
        TelemetryRecord::Motor(cmd) => format!(
            "motor {} -> {:+.2} at {}",
            cmd.motor_id,
            cmd.velocity_target,
            stamp(cmd.timestamp)
        ),
        TelemetryRecord::LrfCommand(cmd) => format!("lrf command [{}]", hex(&cmd.frame)),
        TelemetryRecord::ThermalCommand(cmd) => format!("thermal command [{}]", hex(&cmd.frame)),
        TelemetryRecord::LrfReply(reply) => describe_lrf(reply),
    }
}

fn describe_can(frame: &CanFrame) -> String {
    let id = if frame.is_extended_id {
        format!("{:08X}", frame.id)
    } else {
        format!("{:03X}", frame.id)
    };
    format!(
        "can {id} [{}] {} at {}",
        frame.data.len(),
        hex(&frame.data),
        stamp(frame.timestamp)
    )
}

fn describe_gnss(state: &GnssState) -> String {
    format!(
        "gnss {} {}, alt {:.1} m, hdg {:.1}°, {:.2} hPa, {:.2} g at {}",
        dms(state.latitude_dms(), state.latitude < 0.0, ['N', 'S']),
        dms(state.longitude_dms(), state.longitude < 0.0, ['E', 'W']),
        state.position_z,
        state.rotation_z,
        state.pressure,
        state.gforce,
        stamp(state.timestamp)
    )
}

fn describe_lrf(reply: &LrfReply) -> String {
    match reply {
        LrfReply::Ranges { readings } => {
            let parts: Vec<String> = readings
                .iter()
                .map(|r| format!("{:.1} m ({})", r.range_m, r.signal_level))
                .collect();
            format!("lrf ranges {}", parts.join(", "))
        }
        LrfReply::Ack => "lrf ack".to_string(),
        LrfReply::Other { code, body } => format!("lrf reply {code:#04X} [{}]", hex(body)),
    }
}

fn dms(angle: Dms, negative: bool, [pos, neg]: [char; 2]) -> String {
    let hemisphere = if negative { neg } else { pos };
    format!(
        "{}°{:02}'{:05.2}\"{hemisphere}",
        angle.degrees.abs(),
        angle.minutes.abs(),
        angle.seconds.abs()
    )
}

fn stamp(timestamp_ms: u64) -> String {
    match horas_types::timestamp_datetime(timestamp_ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => format!("{timestamp_ms} ms"),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use horas_types::{MotorCommand, RangeReading, TelemetryMessage};

    #[test]
    fn can_line_shows_id_bytes_and_time() {
        let frame = CanFrame::new(0x123, vec![0x01, 0x02, 0x03, 0x04]).with_timestamp(1_700_000_000_000);
        assert_eq!(
            describe(&frame.into_record()),
            "can 123 [4] 01 02 03 04 at 2023-11-14 22:13:20.000 UTC"
        );
    }

    #[test]
    fn gnss_line_uses_dms() {
        let state = GnssState::at(-33.8625, 151.25).with_timestamp(1_700_000_000_000);
        let line = describe(&state.into_record());
        assert!(line.starts_with("gnss 33°51'45.00\"S 151°15'00.00\"E"), "{line}");
    }

    #[test]
    fn motor_line_shows_signed_velocity() {
        let cmd = MotorCommand::new(1, -0.5).with_timestamp(1_700_000_000_000);
        assert!(describe(&cmd.into_record()).starts_with("motor 1 -> -0.50 at 2023-11-14"));
    }

    #[test]
    fn lrf_reply_lists_ranges() {
        let reply = LrfReply::Ranges {
            readings: [
                RangeReading { range_m: 812.5, signal_level: 900 },
                RangeReading { range_m: 0.0, signal_level: 0 },
                RangeReading { range_m: 1204.0, signal_level: 310 },
            ],
        };
        assert_eq!(
            describe(&reply.into_record()),
            "lrf ranges 812.5 m (900), 0.0 m (0), 1204.0 m (310)"
        );
        assert_eq!(describe(&LrfReply::Ack.into_record()), "lrf ack");
    }
}
