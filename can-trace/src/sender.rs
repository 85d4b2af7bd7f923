//! Repeated transmission of a single frame

use crate::clock::Clock;
use crate::config::SendConfig;
use crate::stop::StopToken;
use crate::transport::{ChannelHandle, Transport};
use crate::types::Frame;

/// Outcome of a [`send_repeated`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    pub sent: u64,
    pub failed: u64,
}

impl SendStats {
    pub fn attempts(&self) -> u64 {
        self.sent + self.failed
    }
}

/// Write `frame` on `handle`, then keep repeating it every `config.gap_ms`
/// until `config.count` transmissions were attempted or `stop` is set.
///
/// The first write always happens; a count of zero is treated as one.
/// Failed writes are logged and counted but do not end the loop.
pub fn send_repeated<T: Transport + ?Sized>(
    transport: &T,
    handle: ChannelHandle,
    frame: &Frame,
    config: &SendConfig,
    stop: &StopToken,
    clock: &dyn Clock,
) -> SendStats {
    let limit = config.count.map(|n| u64::from(n.max(1)));
    let mut stats = SendStats::default();

    log::debug!("Sending {} (dlc {})", frame.describe(), frame.dlc());
    loop {
        match transport.write(handle, frame, config.write_timeout()) {
            Ok(()) => stats.sent += 1,
            Err(e) => {
                log::warn!("Write failed: {}", e);
                stats.failed += 1;
            }
        }

        if limit.is_some_and(|limit| stats.attempts() >= limit) || stop.is_stopped() {
            break;
        }
        clock.sleep(config.gap());
        if stop.is_stopped() {
            break;
        }
    }

    log::info!("Sent {} frame(s), {} failed", stats.sent, stats.failed);
    stats
}
