//! Capture pipeline
//!
//! One capture worker per open channel reads frames from the transport and
//! pushes them into a [`BoundedQueue`]. A single output worker drains the
//! queue and writes one log line per frame to the sink.
//!
//! Frames from one channel keep their capture order. Across channels the
//! output follows queue arrival order, which under contention is enqueue
//! time rather than bus time, so lines from different channels may appear
//! slightly out of timestamp order.

use std::io::Write;
use std::thread;
use std::time::Duration;

use crate::channels::{ChannelSet, OpenChannel};
use crate::clock::Clock;
use crate::config::{DumpConfig, TimestampMode};
use crate::log_file::LogRecord;
use crate::queue::BoundedQueue;
use crate::stop::StopToken;
use crate::transport::Transport;
use crate::types::{CapturedFrame, Result};

/// How often the coordinating thread checks the stop token
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Counters reported when a capture run ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames read from the transport and queued
    pub frames_captured: u64,
    /// Lines written to the sink
    pub frames_written: u64,
    /// Transport read calls that failed
    pub read_errors: u64,
}

#[derive(Debug, Default)]
struct WorkerStats {
    captured: u64,
    errors: u64,
}

/// Capture from every channel in `channels` until `stop` is set.
///
/// The channels are brought bus-on together before the workers start. On
/// stop, the capture workers finish their current read, the queue is shut
/// down and the output worker drains every buffered frame before this
/// returns. A failing sink stops the run and its error is returned.
pub fn run_capture<T, W>(
    channels: &ChannelSet<'_, T>,
    config: &DumpConfig,
    sink: W,
    stop: &StopToken,
    clock: &dyn Clock,
) -> Result<CaptureStats>
where
    T: Transport + ?Sized,
    W: Write + Send,
{
    let queue = BoundedQueue::new(config.queue_capacity);
    let start_epoch_us = clock.now_micros();

    channels.bus_on_all()?;
    log::info!(
        "Capturing on {} channel(s), {:?} timestamps",
        channels.len(),
        config.timestamp_mode
    );

    let (mut stats, written) = thread::scope(|scope| {
        let transport = channels.transport();
        let queue = &queue;

        let capture_workers: Vec<_> = channels
            .iter()
            .map(|open| {
                let open = *open;
                scope.spawn(move || capture_worker(transport, open, queue, stop, config.read_timeout()))
            })
            .collect();

        let output = scope.spawn(move || output_worker(queue, sink, config, start_epoch_us, stop));

        while !stop.is_stopped() {
            clock.sleep(STOP_POLL_INTERVAL);
        }
        log::debug!("Stop requested, shutting down capture");

        let mut stats = CaptureStats::default();
        for worker in capture_workers {
            let worker = worker.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
            stats.frames_captured += worker.captured;
            stats.read_errors += worker.errors;
        }

        queue.shutdown();
        let written = output.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
        (stats, written)
    });

    stats.frames_written = written?;
    log::info!(
        "Capture finished: {} captured, {} written, {} read errors",
        stats.frames_captured,
        stats.frames_written,
        stats.read_errors
    );
    Ok(stats)
}

fn capture_worker<T: Transport + ?Sized>(
    transport: &T,
    open: OpenChannel,
    queue: &BoundedQueue<CapturedFrame>,
    stop: &StopToken,
    timeout: Duration,
) -> WorkerStats {
    let channel = open.config.channel();
    let mut stats = WorkerStats::default();

    while !stop.is_stopped() {
        match transport.read(open.handle, timeout) {
            Ok(Some(received)) => {
                let captured = CapturedFrame::new(channel, received.timestamp_us, received.frame);
                log::trace!("ch{} rx {}", channel, captured.frame);
                if queue.enqueue(captured).is_err() {
                    break;
                }
                stats.captured += 1;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Read failed on channel {}: {}", channel, e);
                stats.errors += 1;
                thread::sleep(timeout);
            }
        }
    }

    log::debug!("Capture worker for channel {} exiting", channel);
    stats
}

fn output_worker<W: Write>(
    queue: &BoundedQueue<CapturedFrame>,
    mut sink: W,
    config: &DumpConfig,
    start_epoch_us: u64,
    stop: &StopToken,
) -> Result<u64> {
    let result = drain_into(queue, &mut sink, config, start_epoch_us, stop);
    if result.is_err() {
        // release producers blocked on a full queue
        stop.stop();
        queue.shutdown();
    }
    result
}

fn drain_into<W: Write>(
    queue: &BoundedQueue<CapturedFrame>,
    sink: &mut W,
    config: &DumpConfig,
    start_epoch_us: u64,
    stop: &StopToken,
) -> Result<u64> {
    let mut written = 0u64;
    let mut emit = |captured: CapturedFrame, sink: &mut W| -> Result<()> {
        let captured = match config.timestamp_mode {
            TimestampMode::Absolute => captured.rebased(start_epoch_us),
            TimestampMode::Delta => captured,
        };
        let record = LogRecord::from(captured);
        if config.verbose {
            writeln!(sink, "{}", record.verbose())?;
        } else {
            writeln!(sink, "{}", record)?;
        }
        written += 1;
        Ok(())
    };

    while !stop.is_stopped() {
        match queue.dequeue_timeout(config.output_poll()) {
            Ok(Some(captured)) => emit(captured, sink)?,
            Ok(None) => {}
            Err(_) => break,
        }
    }

    // nothing buffered may be lost: keep going until the queue is shut down and empty
    while let Ok(captured) = queue.dequeue() {
        emit(captured, sink)?;
    }
    sink.flush()?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::parse_channel_spec;
    use crate::clock::SystemClock;
    use crate::log_file::parse_log_line;
    use crate::transport::VirtualBus;
    use crate::types::Frame;
    use std::io;

    /// Inject once the channel is bus-on
    fn inject_when_ready(bus: &VirtualBus, channel: u8, frame: Frame) {
        while bus.inject(channel, frame) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_capture_writes_every_frame() {
        let bus = VirtualBus::new();
        let configs = [parse_channel_spec("0").unwrap()];
        let set = ChannelSet::open(&bus, &configs).unwrap();

        let stop = StopToken::new();
        let config = DumpConfig::new().with_timestamp_mode(TimestampMode::Delta);
        let mut out = Vec::new();

        let stats = thread::scope(|s| {
            let stopper = stop.clone();
            let bus = &bus;
            s.spawn(move || {
                inject_when_ready(bus, 0, Frame::new(0x100, false, &[0]).unwrap());
                for i in 1..10u8 {
                    bus.inject(0, Frame::new(0x100 + u32::from(i), false, &[i]).unwrap());
                }
                thread::sleep(Duration::from_millis(200));
                stopper.stop();
            });
            run_capture(&set, &config, &mut out, &stop, &SystemClock::new()).unwrap()
        });

        assert_eq!(stats.frames_captured, 10);
        assert_eq!(stats.frames_written, 10);

        let text = String::from_utf8(out).unwrap();
        let ids: Vec<u32> = text
            .lines()
            .enumerate()
            .map(|(i, line)| parse_log_line(line, i + 1).unwrap().frame.id())
            .collect();
        assert_eq!(ids, (0x100..0x10A).collect::<Vec<_>>());
    }

    /// Sink that fails every write
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_ends_capture() {
        let bus = VirtualBus::new();
        let configs = [parse_channel_spec("1").unwrap()];
        let set = ChannelSet::open(&bus, &configs).unwrap();
        let stop = StopToken::new();

        let result = thread::scope(|s| {
            let bus = &bus;
            s.spawn(move || inject_when_ready(bus, 1, Frame::new(0x1, false, &[]).unwrap()));
            run_capture(&set, &DumpConfig::new(), BrokenPipe, &stop, &SystemClock::new())
        });

        assert!(result.is_err());
        assert!(stop.is_stopped());
    }
}
