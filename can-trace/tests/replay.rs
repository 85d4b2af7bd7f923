// Replay timing and looping against the virtual bus, with real log files
use can_trace::{
    parse_channel_spec, run_replay, ChannelHandle, ChannelSet, Iterations, ReceivedFrame,
    ReplayConfig, StopToken, SystemClock, TraceError, Transport, VirtualBus,
};
use std::fs::File;
use std::io::{BufReader, Write};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_log(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

fn open_log(file: &NamedTempFile) -> BufReader<File> {
    BufReader::new(File::open(file.path()).unwrap())
}

/// Second channel on the same bus that hears everything channel 0 sends
fn listener(bus: &VirtualBus) -> ChannelHandle {
    let handle = bus.open(1, true).unwrap();
    bus.configure(handle, 500_000, Some(2_000_000)).unwrap();
    bus.bus_on(handle).unwrap();
    handle
}

fn received(bus: &VirtualBus, handle: ChannelHandle) -> Vec<ReceivedFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = bus.read(handle, Duration::ZERO).unwrap() {
        frames.push(frame);
    }
    frames
}

fn five_lines() -> Vec<&'static str> {
    vec![
        "(0000000100.000000) 0 100#00",
        "(0000000100.001000) 0 101#01",
        "; comment lines are skipped",
        "(0000000100.002000) 0 102#02",
        "(0000000100.003000) 0 103#03",
        "(0000000100.004000) 0 104#04",
    ]
}

#[test]
fn test_gap_between_writes_is_kept() {
    init_logging();
    let bus = VirtualBus::new();
    let rx = listener(&bus);
    let configs = [parse_channel_spec("0").unwrap()];
    let channels = ChannelSet::open(&bus, &configs).unwrap();
    let log = write_log(&[
        "(1700000000.100000) 0 123#11",
        "(1700000000.150000) 0 124#22",
    ]);
    let config = ReplayConfig::default();

    let stats = run_replay(&channels, open_log(&log), &config, &StopToken::new(), &SystemClock::new()).unwrap();
    assert_eq!(stats.frames_sent, 2);

    let frames = received(&bus, rx);
    assert_eq!(frames.len(), 2);
    let gap_us = frames[1].timestamp_us - frames[0].timestamp_us;
    assert!(gap_us >= 50_000 - config.gap_ms * 1_000, "gap was {}us", gap_us);
}

#[test]
fn test_three_passes_over_five_lines() {
    init_logging();
    let bus = VirtualBus::new();
    let rx = listener(&bus);
    let configs = [parse_channel_spec("0").unwrap()];
    let channels = ChannelSet::open(&bus, &configs).unwrap();
    let log = write_log(&five_lines());
    let config = ReplayConfig::new().with_iterations(Iterations::Count(3));

    let stats = run_replay(&channels, open_log(&log), &config, &StopToken::new(), &SystemClock::new()).unwrap();
    assert_eq!(stats.passes, 3);
    assert_eq!(stats.frames_sent, 15);

    let ids: Vec<u32> = received(&bus, rx).iter().map(|f| f.frame.id()).collect();
    let one_pass: Vec<u32> = (0x100..=0x104).collect();
    assert_eq!(ids, one_pass.repeat(3));
}

#[test]
fn test_infinite_passes_end_on_stop() {
    init_logging();
    let bus = VirtualBus::new();
    let rx = listener(&bus);
    let configs = [parse_channel_spec("0").unwrap()];
    let channels = ChannelSet::open(&bus, &configs).unwrap();
    let log = write_log(&five_lines());
    let config = ReplayConfig::new().with_iterations(Iterations::Infinite);
    let stop = StopToken::new();

    let start = Instant::now();
    let stats = thread::scope(|s| {
        let stopper = stop.clone();
        s.spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stopper.stop();
        });
        run_replay(&channels, open_log(&log), &config, &stop, &SystemClock::new()).unwrap()
    });

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(stats.passes >= 2, "only {} passes", stats.passes);
    assert_eq!(received(&bus, rx).len() as u64, stats.frames_sent);
}

#[test]
fn test_stop_interrupts_long_wait() {
    init_logging();
    let bus = VirtualBus::new();
    let rx = listener(&bus);
    let configs = [parse_channel_spec("0").unwrap()];
    let channels = ChannelSet::open(&bus, &configs).unwrap();
    let log = write_log(&[
        "(0000000010.000000) 0 123#11",
        "(0000000070.000000) 0 124#22",
    ]);
    let stop = StopToken::new();

    let start = Instant::now();
    let stats = thread::scope(|s| {
        let stopper = stop.clone();
        s.spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.stop();
        });
        run_replay(&channels, open_log(&log), &ReplayConfig::default(), &stop, &SystemClock::new()).unwrap()
    });

    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.passes, 0);
    assert_eq!(received(&bus, rx).len(), 1);
}

#[test]
fn test_malformed_record_aborts_replay() {
    init_logging();
    let bus = VirtualBus::new();
    let configs = [parse_channel_spec("0").unwrap()];
    let channels = ChannelSet::open(&bus, &configs).unwrap();
    let log = write_log(&[
        "(0000000001.000000) 0 100#00",
        "(0000000001.000100) 0 1#00",
        "(0000000001.000200) 0 102#00",
    ]);

    let err = run_replay(
        &channels,
        open_log(&log),
        &ReplayConfig::default(),
        &StopToken::new(),
        &SystemClock::new(),
    )
    .unwrap_err();
    assert!(matches!(err, TraceError::LogLine { line: 2, .. }));
}

#[test]
fn test_fd_log_replays_on_fd_channel() {
    init_logging();
    let bus = VirtualBus::new();
    let rx = listener(&bus);
    let configs = [parse_channel_spec("0Fb500Kd2M").unwrap()];
    let channels = ChannelSet::open(&bus, &configs).unwrap();
    let log = write_log(&["(0000000001.000000) 0 18FEF100##3DEADBEEF0011223344556677"]);

    let stats = run_replay(
        &channels,
        open_log(&log),
        &ReplayConfig::default(),
        &StopToken::new(),
        &SystemClock::new(),
    )
    .unwrap();
    assert_eq!(stats.frames_sent, 1);

    let frames = received(&bus, rx);
    assert_eq!(frames.len(), 1);
    let frame = frames[0].frame;
    assert!(frame.is_fd() && frame.is_brs() && frame.is_esi() && frame.is_extended());
    assert_eq!(frame.len(), 12);
}
