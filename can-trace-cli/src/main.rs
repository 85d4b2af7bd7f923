//! CAN Trace CLI Application
//!
//! Command-line front end for the can-trace library:
//! - `dump`: capture frames from one or more channels to stdout
//! - `send`: transmit a single frame, optionally repeated
//! - `play`: replay a captured log with its original timing
//!
//! Channels are opened on the in-process virtual bus; a hardware driver
//! plugs in through the library's `Transport` trait.

use anyhow::{Context, Result};
use can_trace::{
    parse_bitrate, parse_channel_spec_with, BusParams, ChannelConfig, Iterations, StopToken,
    TimestampMode,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod dump;
mod play;
mod send;

use config::{load_config, AppConfig};

/// CAN Trace - capture, send and replay CAN / CAN FD frames
#[derive(Parser, Debug)]
#[command(name = "cantrace")]
#[command(about = "Capture, send and replay CAN / CAN FD frames", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (TOML) with [bus], [dump], [send] and [play] defaults
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture frames and print one log line per frame until Ctrl-C
    Dump(DumpArgs),
    /// Send a single frame
    Send(SendArgs),
    /// Replay a log file
    Play(PlayArgs),
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Timestamp type: a (absolute) or d (delta since start)
    #[arg(short = 't', long = "timestamp", value_name = "a|d")]
    timestamp: Option<TimestampMode>,

    /// Append the [xRoNFBE] flag summary to every line
    #[arg(short = 'v', long = "flags")]
    flags: bool,

    /// Channel specs, e.g. 0 or 1Fb500Kd2M
    #[arg(required = true, value_name = "CHANNEL")]
    channels: Vec<String>,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Open the channel in CAN FD mode
    #[arg(short = 'f', long = "fd")]
    fd: bool,

    /// Arbitration bitrate (e.g. 500K)
    #[arg(short = 'b', long = "bitrate", value_name = "RATE", value_parser = bitrate_arg)]
    bitrate: Option<u32>,

    /// Data-phase bitrate for CAN FD (e.g. 2M)
    #[arg(short = 'd', long = "data-bitrate", value_name = "RATE", value_parser = bitrate_arg)]
    data_bitrate: Option<u32>,

    /// Send repeatedly, until Ctrl-C unless -n is given
    #[arg(short = 'r', long = "repeat")]
    repeat: bool,

    /// Number of sends in repeat mode
    #[arg(short = 'n', long = "count", value_name = "COUNT")]
    count: Option<u32>,

    /// Gap between repeated frames in milliseconds
    #[arg(short = 'g', long = "gap", value_name = "MS")]
    gap: Option<u64>,

    /// Channel spec
    #[arg(value_name = "CHANNEL")]
    channel: String,

    /// Frame text, e.g. 123#DEADBEEF or 1F334455##1112233
    #[arg(value_name = "FRAME")]
    frame: String,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Log file to replay
    #[arg(short = 'I', long = "input", value_name = "FILE")]
    input: PathBuf,

    /// Number of passes over the file, or i for infinite
    #[arg(short = 'l', long = "loop", value_name = "NUM|i")]
    iterations: Option<Iterations>,

    /// Polling quantum in milliseconds
    #[arg(short = 'g', long = "gap", value_name = "MS")]
    gap: Option<u64>,

    /// Channel specs
    #[arg(required = true, value_name = "CHANNEL")]
    channels: Vec<String>,
}

fn bitrate_arg(s: &str) -> std::result::Result<u32, String> {
    parse_bitrate(s).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.quiet);

    log::debug!("CAN Trace CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using can-trace library v{}", can_trace::VERSION);

    let app_config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    let stop = StopToken::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, shutting down");
        handler_stop.stop();
    })
    .context("Failed to set Ctrl-C handler")?;

    match cli.command {
        Command::Dump(args) => {
            let mut config = app_config.dump;
            if let Some(mode) = args.timestamp {
                config.timestamp_mode = mode;
            }
            config.verbose |= args.flags;
            let channels = parse_channels(&args.channels, app_config.bus)?;
            dump::run(&channels, &config, &stop)
        }
        Command::Send(args) => {
            let mut bus = app_config.bus;
            bus.fd |= args.fd;
            if let Some(bitrate) = args.bitrate {
                bus.bitrate = bitrate;
            }
            if let Some(data_bitrate) = args.data_bitrate {
                bus.data_bitrate = data_bitrate;
            }
            let mut config = app_config.send;
            config.count = send_count(args.repeat, args.count, config.count);
            if let Some(gap) = args.gap {
                config.gap_ms = gap;
            }
            let channel = parse_channels(std::slice::from_ref(&args.channel), bus)?;
            send::run(&channel[0], &args.frame, &config, &stop)
        }
        Command::Play(args) => {
            let mut config = app_config.play;
            if let Some(iterations) = args.iterations {
                config.iterations = iterations;
            }
            if let Some(gap) = args.gap {
                config.gap_ms = gap;
            }
            let channels = parse_channels(&args.channels, app_config.bus)?;
            play::run(&args.input, &channels, &config, &stop)
        }
    }
}

/// Parse channel specs on top of the configured bus parameters
fn parse_channels(specs: &[String], base: BusParams) -> Result<Vec<ChannelConfig>> {
    specs
        .iter()
        .map(|spec| {
            parse_channel_spec_with(spec, base)
                .with_context(|| format!("Invalid channel '{}'", spec))
        })
        .collect()
}

/// Number of sends for `send`; `None` repeats until stopped.
///
/// `-n` only counts in repeat mode, otherwise the configured count stands.
fn send_count(repeat: bool, count: Option<u32>, configured: Option<u32>) -> Option<u32> {
    if repeat {
        return count;
    }
    if count.is_some() {
        log::warn!("-n has no effect without -r");
    }
    configured
}

/// Level selected by `-q` and the `-v` count
fn log_level(verbose: u8, quiet: bool) -> log::LevelFilter {
    match (quiet, verbose) {
        (true, _) => log::LevelFilter::Error,
        (false, 0) => log::LevelFilter::Info,
        (false, 1) => log::LevelFilter::Debug,
        (false, _) => log::LevelFilter::Trace,
    }
}

/// Log to stderr; `RUST_LOG` directives refine the command-line level per module
fn init_logging(verbose: u8, quiet: bool) {
    use std::io::Write;

    env_logger::Builder::new()
        .filter_level(log_level(verbose, quiet))
        .parse_default_env()
        .format(|buf, record| {
            writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
        })
        .init();
}
