//! Timed replay of a captured log
//!
//! The first record of every pass pins the log to the current time. Each
//! following record is sent once the clock has advanced by the same amount
//! as the log timestamps, so the original gaps between frames are kept no
//! matter which absolute times the file contains.
//!
//! While waiting the scheduler sleeps in fixed quanta (`ReplayConfig::gap_ms`)
//! and checks the stop token between them.

use std::collections::BTreeSet;
use std::io::{BufRead, Seek};

use crate::channels::ChannelSet;
use crate::clock::Clock;
use crate::config::ReplayConfig;
use crate::log_file::{LogReader, LogRecord};
use crate::stop::StopToken;
use crate::transport::Transport;
use crate::types::Result;

/// Counters reported when a replay ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Completed passes over the file
    pub passes: u32,
    pub frames_sent: u64,
    pub write_errors: u64,
    /// Records for channels that are not open
    pub frames_skipped: u64,
}

#[derive(Debug)]
enum State {
    /// Looking for the next record line
    Seeking,
    /// Next record known, time not checked yet
    Armed(LogRecord),
    /// Too early for the record, sleep one quantum
    Waiting(LogRecord),
    /// Record is due, send it
    Emitting(LogRecord),
    /// End of file, rewind or finish
    LoopEnd,
}

/// Log position of the first record of a pass, and when it was reached
#[derive(Debug, Clone, Copy)]
struct PassOrigin {
    log_us: u64,
    clock_us: u64,
}

/// Replays a log stream onto a set of open channels
pub struct Replayer<'a, 't, T: Transport + ?Sized, R> {
    channels: &'a ChannelSet<'t, T>,
    reader: LogReader<R>,
    config: &'a ReplayConfig,
    stop: &'a StopToken,
    clock: &'a dyn Clock,
    origin: Option<PassOrigin>,
    records_in_pass: u64,
    warned_channels: BTreeSet<u8>,
    stats: ReplayStats,
}

impl<'a, 't, T, R> Replayer<'a, 't, T, R>
where
    T: Transport + ?Sized,
    R: BufRead + Seek,
{
    pub fn new(
        channels: &'a ChannelSet<'t, T>,
        reader: R,
        config: &'a ReplayConfig,
        stop: &'a StopToken,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            channels,
            reader: LogReader::new(reader),
            config,
            stop,
            clock,
            origin: None,
            records_in_pass: 0,
            warned_channels: BTreeSet::new(),
            stats: ReplayStats::default(),
        }
    }

    /// Bring the channels bus-on and replay until the configured number of
    /// passes is done or `stop` is set.
    ///
    /// A malformed record line ends the replay with an error. Write
    /// failures are logged and the pass continues.
    pub fn run(mut self) -> Result<ReplayStats> {
        self.channels.bus_on_all()?;
        log::info!("Replaying, {} pass(es)", self.config.iterations);

        let mut state = State::Seeking;
        loop {
            if self.stop.is_stopped() {
                log::info!("Replay stopped after {} complete pass(es)", self.stats.passes);
                break;
            }

            state = match state {
                State::Seeking => match self.reader.next_record()? {
                    Some(record) => {
                        self.records_in_pass += 1;
                        State::Armed(record)
                    }
                    None => State::LoopEnd,
                },
                State::Armed(record) => {
                    if self.clock.now_micros() >= self.due_at(&record) {
                        State::Emitting(record)
                    } else {
                        State::Waiting(record)
                    }
                }
                State::Waiting(record) => {
                    self.clock.sleep(self.config.gap());
                    State::Armed(record)
                }
                State::Emitting(record) => {
                    self.emit(&record);
                    State::Seeking
                }
                State::LoopEnd => {
                    self.stats.passes += 1;
                    log::debug!(
                        "Pass {} done, {} record(s)",
                        self.stats.passes,
                        self.records_in_pass
                    );
                    if self.records_in_pass == 0 {
                        log::info!("Log contains no frames");
                        break;
                    }
                    if !self.config.iterations.allows(self.stats.passes) {
                        break;
                    }
                    self.reader.rewind()?;
                    self.origin = None;
                    self.records_in_pass = 0;
                    State::Seeking
                }
            };
        }

        log::info!(
            "Replay finished: {} frame(s) sent, {} write error(s), {} skipped",
            self.stats.frames_sent,
            self.stats.write_errors,
            self.stats.frames_skipped
        );
        Ok(self.stats)
    }

    /// Clock time at which `record` should go out. The first record of a
    /// pass sets the origin and is due immediately.
    fn due_at(&mut self, record: &LogRecord) -> u64 {
        let clock = self.clock;
        let origin = *self.origin.get_or_insert_with(|| {
            log::debug!("Pass starts at log time {}", record.timestamp());
            PassOrigin {
                log_us: record.timestamp_us,
                clock_us: clock.now_micros(),
            }
        });
        // timestamps going backwards are sent right away
        origin
            .clock_us
            .saturating_add(record.timestamp_us.saturating_sub(origin.log_us))
    }

    fn emit(&mut self, record: &LogRecord) {
        let Some(open) = self.channels.get(record.channel) else {
            if self.warned_channels.insert(record.channel) {
                log::warn!("Channel {} is not open, skipping its frames", record.channel);
            }
            self.stats.frames_skipped += 1;
            return;
        };

        match self
            .channels
            .transport()
            .write(open.handle, &record.frame, self.config.write_timeout())
        {
            Ok(()) => {
                log::trace!("ch{} tx {}", record.channel, record.frame);
                self.stats.frames_sent += 1;
            }
            Err(e) => {
                log::warn!("Write failed on channel {}: {}", record.channel, e);
                self.stats.write_errors += 1;
            }
        }
    }
}

/// Replay `reader` onto `channels`; see [`Replayer::run`]
pub fn run_replay<T, R>(
    channels: &ChannelSet<'_, T>,
    reader: R,
    config: &ReplayConfig,
    stop: &StopToken,
    clock: &dyn Clock,
) -> Result<ReplayStats>
where
    T: Transport + ?Sized,
    R: BufRead + Seek,
{
    Replayer::new(channels, reader, config, stop, clock).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{parse_channel_spec, ChannelConfig};
    use crate::config::Iterations;
    use crate::transport::{ChannelHandle, ReceivedFrame};
    use crate::types::{Frame, TraceError};
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Clock that only moves when slept on
    struct ManualClock {
        now_us: AtomicU64,
    }

    impl ManualClock {
        fn new(start_us: u64) -> Self {
            Self {
                now_us: AtomicU64::new(start_us),
            }
        }
    }

    impl Clock for ManualClock {
        fn now_micros(&self) -> u64 {
            self.now_us.load(Ordering::SeqCst)
        }

        fn sleep(&self, duration: Duration) {
            self.now_us
                .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
        }
    }

    /// Records (channel handle, id, clock time) for every write
    struct RecordingTransport<'c> {
        clock: &'c ManualClock,
        writes: Mutex<Vec<(u32, u32, u64)>>,
        fail_writes: bool,
    }

    impl<'c> RecordingTransport<'c> {
        fn new(clock: &'c ManualClock) -> Self {
            Self {
                clock,
                writes: Mutex::new(Vec::new()),
                fail_writes: false,
            }
        }

        fn writes(&self) -> Vec<(u32, u32, u64)> {
            self.writes.lock().clone()
        }
    }

    impl Transport for RecordingTransport<'_> {
        fn open(&self, channel: u8, _fd: bool) -> Result<ChannelHandle> {
            Ok(ChannelHandle(u32::from(channel)))
        }
        fn configure(&self, _: ChannelHandle, _: u32, _: Option<u32>) -> Result<()> {
            Ok(())
        }
        fn bus_on(&self, _: ChannelHandle) -> Result<()> {
            Ok(())
        }
        fn bus_off(&self, _: ChannelHandle) -> Result<()> {
            Ok(())
        }
        fn write(&self, handle: ChannelHandle, frame: &Frame, _: Duration) -> Result<()> {
            if self.fail_writes {
                return Err(TraceError::Transport {
                    channel: handle.0 as u8,
                    reason: "tx queue full".into(),
                });
            }
            self.writes
                .lock()
                .push((handle.0, frame.id(), self.clock.now_micros()));
            Ok(())
        }
        fn read(&self, _: ChannelHandle, _: Duration) -> Result<Option<ReceivedFrame>> {
            Ok(None)
        }
        fn close(&self, _: ChannelHandle) -> Result<()> {
            Ok(())
        }
    }

    fn channel_zero() -> Vec<ChannelConfig> {
        vec![parse_channel_spec("0").unwrap()]
    }

    const TWO_LINES: &str = "\
# captured on the bench
(0000000010.000000) 0 100#01
(0000000010.050000) 0 101#02
";

    #[test]
    fn test_gaps_are_reproduced() {
        let clock = ManualClock::new(5_000_000);
        let transport = RecordingTransport::new(&clock);
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();

        let stats = run_replay(
            &set,
            Cursor::new(TWO_LINES),
            &ReplayConfig::default(),
            &StopToken::new(),
            &clock,
        )
        .unwrap();

        assert_eq!(stats.passes, 1);
        assert_eq!(stats.frames_sent, 2);
        let writes = transport.writes();
        assert_eq!(writes[0], (0, 0x100, 5_000_000));
        assert_eq!(writes[1], (0, 0x101, 5_050_000));
    }

    #[test]
    fn test_iterations_repeat_the_file() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new(&clock);
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();
        let config = ReplayConfig::new().with_iterations(Iterations::Count(3));

        let stats = run_replay(&set, Cursor::new(TWO_LINES), &config, &StopToken::new(), &clock).unwrap();

        assert_eq!(stats.passes, 3);
        assert_eq!(stats.frames_sent, 6);
        let ids: Vec<u32> = transport.writes().iter().map(|w| w.1).collect();
        assert_eq!(ids, vec![0x100, 0x101, 0x100, 0x101, 0x100, 0x101]);
    }

    #[test]
    fn test_each_pass_restarts_timing() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new(&clock);
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();
        let config = ReplayConfig::new().with_iterations(Iterations::Count(2));

        run_replay(&set, Cursor::new(TWO_LINES), &config, &StopToken::new(), &clock).unwrap();

        // second pass starts as soon as the first one ends
        let times: Vec<u64> = transport.writes().iter().map(|w| w.2).collect();
        assert_eq!(times, vec![0, 50_000, 50_000, 100_000]);
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new(&clock);
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();
        let log = "(0000000001.000000) 0 100#01\n(0000000001.000100 0 101#02\n";

        let err = run_replay(&set, Cursor::new(log), &ReplayConfig::default(), &StopToken::new(), &clock)
            .unwrap_err();
        assert!(matches!(err, TraceError::LogLine { line: 2, .. }));
        assert_eq!(transport.writes().len(), 1);
    }

    #[test]
    fn test_unknown_channel_is_skipped() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new(&clock);
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();
        let log = "\
(0000000001.000000) 3 100#01
(0000000001.000010) 0 101#02
(0000000001.000020) 3 102#03
";

        let stats = run_replay(&set, Cursor::new(log), &ReplayConfig::default(), &StopToken::new(), &clock).unwrap();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_skipped, 2);
    }

    #[test]
    fn test_write_errors_do_not_stop_the_pass() {
        let clock = ManualClock::new(0);
        let mut transport = RecordingTransport::new(&clock);
        transport.fail_writes = true;
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();

        let stats = run_replay(
            &set,
            Cursor::new(TWO_LINES),
            &ReplayConfig::default(),
            &StopToken::new(),
            &clock,
        )
        .unwrap();
        assert_eq!(stats.write_errors, 2);
        assert_eq!(stats.passes, 1);
    }

    #[test]
    fn test_empty_log_finishes_even_when_infinite() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new(&clock);
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();
        let config = ReplayConfig::new().with_iterations(Iterations::Infinite);

        let stats = run_replay(&set, Cursor::new("# nothing here\n"), &config, &StopToken::new(), &clock).unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.frames_sent, 0);
    }

    #[test]
    fn test_stop_before_start_sends_nothing() {
        let clock = ManualClock::new(0);
        let transport = RecordingTransport::new(&clock);
        let configs = channel_zero();
        let set = ChannelSet::open(&transport, &configs).unwrap();
        let stop = StopToken::new();
        stop.stop();

        let stats = run_replay(&set, Cursor::new(TWO_LINES), &ReplayConfig::default(), &stop, &clock).unwrap();
        assert_eq!(stats, ReplayStats::default());
        assert!(transport.writes().is_empty());
    }
}
