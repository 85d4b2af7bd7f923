//! `play` subcommand

use anyhow::{Context, Result};
use can_trace::{run_replay, ChannelConfig, ChannelSet, ReplayConfig, StopToken, SystemClock, VirtualBus};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Replay the log at `input` onto `channels`
pub fn run(input: &Path, channels: &[ChannelConfig], config: &ReplayConfig, stop: &StopToken) -> Result<()> {
    let file = File::open(input).with_context(|| format!("Failed to open log file: {:?}", input))?;

    let bus = VirtualBus::new();
    let set = ChannelSet::open(&bus, channels).context("Failed to set up channels")?;

    let stats = run_replay(&set, BufReader::new(file), config, stop, &SystemClock::new())
        .with_context(|| format!("Replay of {:?} failed", input))?;

    log::info!(
        "{} pass(es), {} frame(s) sent",
        stats.passes,
        stats.frames_sent
    );
    Ok(())
}
