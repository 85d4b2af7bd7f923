//! `dump` subcommand

use anyhow::{Context, Result};
use can_trace::{run_capture, ChannelConfig, ChannelSet, DumpConfig, StopToken, SystemClock, VirtualBus};
use std::io;

/// Capture from `channels` to stdout until `stop` is set
pub fn run(channels: &[ChannelConfig], config: &DumpConfig, stop: &StopToken) -> Result<()> {
    let bus = VirtualBus::new();
    let set = ChannelSet::open(&bus, channels).context("Failed to set up channels")?;

    let stats = run_capture(&set, config, io::stdout(), stop, &SystemClock::new())
        .context("Capture failed")?;

    log::info!(
        "{} frame(s) captured, {} written",
        stats.frames_captured,
        stats.frames_written
    );
    Ok(())
}
