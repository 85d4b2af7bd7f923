//! `send` subcommand

use anyhow::{bail, Context, Result};
use can_trace::{decode, send_repeated, ChannelConfig, ChannelSet, SendConfig, StopToken, SystemClock, VirtualBus};

/// Decode `frame_text` and transmit it on `channel`
pub fn run(channel: &ChannelConfig, frame_text: &str, config: &SendConfig, stop: &StopToken) -> Result<()> {
    // decode before touching the transport
    let frame = decode(frame_text).with_context(|| format!("Invalid frame '{}'", frame_text))?;
    if frame.is_fd() && !channel.is_fd() {
        bail!("CAN FD frame '{}' needs an FD channel (use -f or an F channel spec)", frame_text);
    }

    let bus = VirtualBus::new();
    let set = ChannelSet::open(&bus, std::slice::from_ref(channel)).context("Failed to set up channel")?;
    set.bus_on_all().context("Failed to go bus-on")?;
    let handle = set.handle(channel.channel())?;

    log::info!("Sending on {}: {}", channel, frame);
    let stats = send_repeated(&bus, handle, &frame, config, stop, &SystemClock::new());

    if stats.sent == 0 {
        bail!("All {} write(s) failed", stats.failed);
    }
    Ok(())
}
