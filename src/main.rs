// src/main.rs
//! GNSS Link - Bluetooth GNSS receiver link

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gnss_link::nmea::codec;
use gnss_link::{
    link, logging, DisableReason, GnssConfig, GnssEvent, GnssStatus, LinkState, LoggingSink,
    NmeaParser, Session, StatusListener,
};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "gnss-link", version)]
#[command(about = "Bluetooth GNSS receiver link with NMEA-0183 fix reconstruction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the receiver and report fixes until stopped
    Run(RunArgs),
    /// Feed a recorded .nmea file through the parser
    Replay(ReplayArgs),
    /// List serial ports
    Ports,
    /// Show or update the configuration file
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct DeviceArgs {
    /// Serial/RFCOMM device, e.g. /dev/rfcomm0
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// Connection attempts before giving up
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    device: DeviceArgs,
    /// Record raw sentences to the track directory
    #[arg(long, default_value_t = false)]
    record: bool,
    /// Seconds between status lines
    #[arg(long, default_value_t = 5)]
    interval: u64,
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    file: PathBuf,
    /// Print the snapshot as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(flatten)]
    device: DeviceArgs,
    /// Write the updated configuration back to disk
    #[arg(long, default_value_t = false)]
    save: bool,
}

/// Logs status changes as they arrive.
struct ConsoleStatus;

impl StatusListener for ConsoleStatus {
    fn on_status_changed(&self, event: GnssEvent) {
        match event {
            GnssEvent::Started => info!("Receiver stream started"),
            GnssEvent::FirstFix => info!("First fix"),
            GnssEvent::SatelliteStatus => {}
        }
    }

    fn on_connection_problem(&self, attempt: u32, remaining: u32) {
        warn!(attempt, remaining, "Connection problem, retrying");
    }

    fn on_disconnected(&self, reason: DisableReason) {
        info!(%reason, "Disconnected");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Replay(args) => replay(args),
        Command::Ports => list_ports(),
        Command::Config(args) => config(args),
    }
}

fn apply_device_args(config: &mut GnssConfig, args: &DeviceArgs) {
    if let Some(device) = &args.device {
        let baud = args.baud.unwrap_or(config.baud_rate);
        config.update_device(device.clone(), baud);
    } else if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(retries) = args.retries {
        config.update_retries(retries);
    }
}

async fn run(args: RunArgs) -> Result<()> {
    logging::init_logging(args.verbose);

    let mut config = GnssConfig::load().context("Failed to load configuration")?;
    apply_device_args(&mut config, &args.device);

    let sink = Arc::new(LoggingSink::new());
    let session =
        Session::from_config(config, sink.clone()).context("Failed to create session")?;
    session.add_status_listener(Arc::new(ConsoleStatus));

    if args.record {
        let path = session.begin_recording().context("Failed to start recording")?;
        info!(path = %path.display(), "Recording raw sentences");
    }
    session.start_link().context("Failed to start link")?;

    let shutdown = session.shutdown_requested();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(shutdown, ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping link");
                session.stop_link();
                break;
            }
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                println!("{}", status_line(session.link_state(), &session.status_snapshot()));
            }
        }
    }

    if let Some((path, lines)) = session.end_recording()? {
        println!("Recorded {} sentences to {}", lines, path.display());
    }
    println!("Fixes delivered: {}", sink.fix_count());
    if let Some(reason) = session.disable_reason() {
        println!("Link stopped: {}", reason);
    }
    Ok(())
}

fn replay(args: ReplayArgs) -> Result<()> {
    logging::init_logging(args.verbose);

    let config = GnssConfig::load().unwrap_or_default();
    let file = std::fs::File::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    let sink = Arc::new(LoggingSink::new());
    let mut parser = NmeaParser::new(config.precision, sink.clone())
        .with_strict_checksum(config.strict_checksum);
    parser.reset(chrono::Utc::now().timestamp_millis());

    let mut accepted = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if parser.parse_sentence(line)?.is_some() {
            accepted += 1;
        }
        parser.take_status_change();
    }

    let status = parser.status();
    if args.json {
        println!("{}", serde_json::to_string_pretty(status)?);
    } else {
        println!("{}", status_line(LinkState::Disabled, status));
        let show = |value: Option<f32>| value.map_or("-".to_string(), |v| format!("{:.0}", v));
        for satellite in status.satellites().iter() {
            println!(
                "  {:<5} el {:>3} az {:>3} snr {:>3} {}{}",
                satellite.name(),
                show(satellite.elevation),
                show(satellite.azimuth),
                show(satellite.snr),
                satellite.signal_strength_description(),
                if status.is_used_in_fix(satellite) { " (used)" } else { "" },
            );
        }
    }
    println!("Sentences accepted: {}, fixes: {}", accepted, sink.fix_count());
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = link::available_ports()?;

    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Available serial ports:");
        for port in ports {
            println!("  {} - {:?}", port.port_name, port.port_type);
        }
    }
    Ok(())
}

fn config(args: ConfigArgs) -> Result<()> {
    let mut config = GnssConfig::load().context("Failed to load configuration")?;
    apply_device_args(&mut config, &args.device);
    config.validate()?;

    if args.save {
        config.save().context("Failed to save configuration")?;
        println!("Saved to {}", GnssConfig::get_config_path()?.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn status_line(state: LinkState, status: &GnssStatus) -> String {
    let position = if status.has_fix() {
        let (lat, ns) = codec::format_latitude(status.latitude);
        let (lon, ew) = codec::format_longitude(status.longitude);
        format!(
            "{} {} {} {} alt {}",
            lat,
            ns,
            lon,
            ew,
            status
                .altitude
                .map_or("-".to_string(), |alt| format!("{:.1} m", alt))
        )
    } else {
        "no position".to_string()
    };
    format!(
        "[{}] {} | {} | sats {}/{} | hdop {} | ttff {} s",
        state,
        status.fix_description(),
        position,
        status.num_used_in_fix,
        status.num_in_view,
        status.hdop.map_or("-".to_string(), |h| format!("{:.1}", h)),
        status.ttff() / 1000,
    )
}
