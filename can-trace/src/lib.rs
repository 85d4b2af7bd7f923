//! CAN Trace Library
//!
//! Capture, send and replay CAN / CAN FD traffic through a driver-neutral
//! transport, using a compact one-line-per-frame text format.
//!
//! # Architecture
//!
//! - [`codec`] converts between frame text (`123#1122`, `1234ABCD##1AABB`)
//!   and [`Frame`] values
//! - [`channel`] parses channel specs such as `0Fb500Kd2M`
//! - [`capture`] runs one reader per channel feeding a [`BoundedQueue`],
//!   drained by a single writer into the log format of [`log_file`]
//! - [`replay`] sends a captured log back out with its original timing
//! - [`sender`] transmits one frame repeatedly
//!
//! Hardware access goes through the [`Transport`] trait. [`VirtualBus`] is an
//! in-memory implementation where all channels share one bus.
//!
//! The library does NOT:
//! - Parse command lines or install signal handlers
//! - Decode signals from frame payloads
//!
//! # Example Usage
//!
//! ```no_run
//! use can_trace::{
//!     parse_channel_spec, run_capture, ChannelSet, DumpConfig, StopToken, SystemClock,
//!     TimestampMode, VirtualBus,
//! };
//!
//! let bus = VirtualBus::new();
//! let configs = vec![parse_channel_spec("0").unwrap(), parse_channel_spec("1F").unwrap()];
//! let channels = ChannelSet::open(&bus, &configs).unwrap();
//!
//! let config = DumpConfig::new().with_timestamp_mode(TimestampMode::Delta);
//! let stop = StopToken::new();
//!
//! // runs until another thread calls stop.stop()
//! let stats = run_capture(&channels, &config, std::io::stdout(), &stop, &SystemClock::new()).unwrap();
//! println!("captured {} frames", stats.frames_captured);
//! ```

// Public modules
pub mod capture;
pub mod channel;
pub mod channels;
pub mod clock;
pub mod codec;
pub mod config;
pub mod dlc;
pub mod log_file;
pub mod queue;
pub mod replay;
pub mod sender;
pub mod stop;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use capture::{run_capture, CaptureStats};
pub use channel::{parse_bitrate, parse_channel_spec, parse_channel_spec_with, BusParams, ChannelConfig, MAX_CHANNELS};
pub use channels::{ChannelSet, OpenChannel};
pub use clock::{Clock, SystemClock};
pub use codec::{decode, encode, FlagSummary};
pub use config::{DumpConfig, Iterations, ReplayConfig, SendConfig, TimestampMode};
pub use log_file::{parse_log_line, LogReader, LogRecord};
pub use queue::{BoundedQueue, QueueClosed};
pub use replay::{run_replay, ReplayStats, Replayer};
pub use sender::{send_repeated, SendStats};
pub use stop::StopToken;
pub use transport::{ChannelHandle, ReceivedFrame, Transport, VirtualBus};
pub use types::{CapturedFrame, ErrorKind, Frame, FrameFlags, Result, Timestamp, TraceError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
