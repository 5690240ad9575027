//! `horas-cli` – HORAS telemetry bridge command line
//!
//! This binary opens a bridge session over the loopback transport and wires
//! the stock participants onto it:
//!
//! 1. Loads `/etc/horas/bridge.toml` (or `$HORAS_CONFIG`); a missing file
//!    means the built-in topic table.
//! 2. Attaches a console logger to every registered topic, the simulated
//!    range finder and, when configured, the WebSocket telemetry tap.
//! 3. Plays a demo scenario, then optionally keeps following traffic.
//! 4. Intercepts **Ctrl-C**, cancels every subscription and closes the
//!    session before exiting.

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use horas_middleware::{
    DEFAULT_TAP_CAPACITY, Diagnostics, InMemoryTransport, Session, SightTopics, Subscription,
    TelemetryBridge, TelemetryTap, TopicRegistry,
};
use horas_runtime::{DemoError, DemoOptions, RangeFinderSim, Scenario, attach_console, play};
use horas_types::{
    BridgeError, CanFrame, GnssState, LrfCommand, LrfReply, MotorCommand, Schema, ThermalCommand,
};
use schemars::schema::RootSchema;
use schemars::schema_for;
use thiserror::Error;
use tracing::{error, info, warn};

/// Time given to subscription queues to drain before they are cancelled.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(
    name = "horas",
    about = "Typed telemetry bridge for CAN, GNSS, motor and sight records",
    version
)]
struct Cli {
    /// Bridge configuration file.
    #[arg(long, global = true, env = "HORAS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a loopback session and play a demo scenario.
    Run(RunArgs),
    /// Print the JSON schema of a record type.
    Schema {
        /// One of: can, gnss, motor, lrf_command, thermal_command, lrf_reply.
        name: Schema,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scenario to play: idle, can, motor, gnss, lrf or all.
    #[arg(long, default_value_t = Scenario::All)]
    scenario: Scenario,

    /// Serve the telemetry tap on this address (overrides `tap_addr`).
    #[arg(long, value_name = "ADDR")]
    tap: Option<SocketAddr>,

    /// Keep logging traffic after the scenario until Ctrl-C.
    #[arg(long)]
    follow: bool,

    /// Steps in the motor velocity ramp.
    #[arg(long, value_name = "N")]
    motor_steps: Option<u32>,

    /// Do not attach the simulated range finder.
    #[arg(long)]
    no_sim: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Demo(#[from] DemoError),

    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to render schema: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Keep the guard alive until exit so buffered spans are flushed.
    let _tracing = horas_runtime::init_tracing("horas");

    let path = cli.config.unwrap_or_else(config::config_path);
    let result = match cli.command {
        Command::Schema { name } => print_schema(name),
        Command::Config => print_config(&path),
        Command::Run(args) => {
            print_banner();
            tokio::runtime::Runtime::new()
                .map_err(CliError::Runtime)
                .and_then(|runtime| runtime.block_on(run(&path, args)))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

async fn run(path: &Path, args: RunArgs) -> Result<(), CliError> {
    let mut cfg = config::load(path)?;
    if let Some(addr) = args.tap {
        cfg.tap_addr = Some(addr);
    }

    let session = Session::with_diagnostics(
        Arc::new(InMemoryTransport::new()),
        Diagnostics::new(cfg.diagnostics_capacity),
    );
    let bridge = TelemetryBridge::new(session, cfg.registry()?, cfg.bridge_config()?);
    info!(
        node = %cfg.node,
        transport = bridge.session().transport_name(),
        topics = bridge.registry().len(),
        queue_depth = bridge.config().queue_depth,
        "bridge session opened"
    );
    println!(
        "  Node {} with {} topic(s)",
        cfg.node.bold(),
        bridge.registry().len()
    );

    let mut subscriptions = attach_console(&bridge)?;

    if !args.no_sim {
        match sight_topics(&cfg.node, bridge.registry()) {
            Some(topics) => {
                subscriptions.push(RangeFinderSim::default().attach(&bridge, &topics)?);
                println!("  Simulated range finder on {}", topics.tx.dimmed());
            }
            None => warn!(node = %cfg.node, "no LRF topics registered; range finder not simulated"),
        }
    }

    if let Some(addr) = cfg.tap_addr {
        let tap = TelemetryTap::new(bridge.clone(), DEFAULT_TAP_CAPACITY);
        subscriptions.extend(tap.attach_all()?);
        tokio::spawn(async move {
            if let Err(e) = tap.run_ws_server(addr).await {
                error!(error = %e, "telemetry tap stopped");
            }
        });
        println!("  Telemetry tap on {}", format!("ws://{addr}").bold());
    }

    let mut options = DemoOptions::default();
    if let Some(steps) = args.motor_steps {
        options.motor_steps = steps;
    }

    println!();
    let mut interrupted = false;
    tokio::select! {
        result = play(&bridge, args.scenario, &options) => {
            let report = result?;
            println!(
                "  {} scenario {} published {} record(s)",
                "✓".green().bold(),
                args.scenario.to_string().bold(),
                report.published
            );
            if let Some(readings) = report.lrf_reply.as_ref().and_then(LrfReply::readings) {
                for (n, r) in readings.iter().enumerate() {
                    println!("    target {}: {:.1} m (signal {})", n + 1, r.range_m, r.signal_level);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => interrupted = true,
    }

    if !interrupted && (args.follow || args.scenario == Scenario::Idle) {
        println!("  Following traffic. Press {} to stop.", "Ctrl-C".bold());
        tokio::select! {
            _ = tokio::signal::ctrl_c() => interrupted = true,
            _ = bridge.session().closed() => warn!("session closed underneath the bridge"),
        }
    }

    if interrupted {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
    } else {
        tokio::time::sleep(DRAIN_GRACE).await;
    }

    shutdown(&bridge, subscriptions).await?;
    Ok(())
}

/// LRF command/reply topics for `node`, if both are registered with the
/// right schemas.
fn sight_topics(node: &str, registry: &TopicRegistry) -> Option<SightTopics> {
    let topics = SightTopics::lrf(node);
    let registered = registry.schema_for(&topics.tx) == Some(Schema::LrfCommand)
        && registry.schema_for(&topics.rx) == Some(Schema::LrfReply);
    registered.then_some(topics)
}

async fn shutdown(bridge: &TelemetryBridge, subscriptions: Vec<Subscription>) -> Result<(), CliError> {
    for sub in &subscriptions {
        sub.cancel().await;
    }
    drop(subscriptions);

    let stats = bridge.stats();
    println!();
    println!("  {}", "Session statistics".bold());
    println!("    published {}", stats.published.to_string().cyan());
    println!("    delivered {}", stats.delivered.to_string().cyan());
    println!("    dropped   {}", stats.dropped.to_string().yellow());
    println!("    rejected  {}", stats.rejected.to_string().red());

    bridge.session().close().map_err(BridgeError::from)?;
    println!("  {}", "✓ Session closed.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// schema / config
// ─────────────────────────────────────────────────────────────────────────────

fn json_schema(schema: Schema) -> RootSchema {
    match schema {
        Schema::Can => schema_for!(CanFrame),
        Schema::Gnss => schema_for!(GnssState),
        Schema::Motor => schema_for!(MotorCommand),
        Schema::LrfCommand => schema_for!(LrfCommand),
        Schema::ThermalCommand => schema_for!(ThermalCommand),
        Schema::LrfReply => schema_for!(LrfReply),
    }
}

fn print_schema(schema: Schema) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(&json_schema(schema))?);
    Ok(())
}

fn print_config(path: &Path) -> Result<(), CliError> {
    let cfg = config::load(path)?;
    println!("# {}", path.display());
    print!("{}", cfg.to_toml()?);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ ______  ___  ___   ____"#.bold().cyan());
    println!("{}", r#"  / // / __ \/ _ \/ _ | / __/"#.bold().cyan());
    println!("{}", r#" / _  / /_/ / , _/ __ |_\ \  "#.bold().cyan());
    println!("{}", r#"/_//_/\____/_/|_/_/ |_/___/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "HORAS".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Telemetry bridge");
    println!();
}
