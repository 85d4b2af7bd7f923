//! Run configuration types
//!
//! One configuration per top-level mode. All of them deserialize with
//! defaults for missing fields, so a partial TOML section is enough.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::transport::TRANSPORT_TIMEOUT;

/// How capture timestamps are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    /// Microseconds since the Unix epoch
    #[default]
    Absolute,
    /// Microseconds since capture start
    Delta,
}

impl FromStr for TimestampMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" | "absolute" => Ok(TimestampMode::Absolute),
            "d" | "delta" => Ok(TimestampMode::Delta),
            other => Err(format!("invalid timestamp type '{}' (use 'a' or 'd')", other)),
        }
    }
}

/// Number of passes over a log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Iterations {
    Count(u32),
    Infinite,
}

impl Iterations {
    /// True if another pass should start after `completed` passes
    pub fn allows(&self, completed: u32) -> bool {
        match self {
            Iterations::Count(n) => completed < *n,
            Iterations::Infinite => true,
        }
    }
}

impl Default for Iterations {
    fn default() -> Self {
        Iterations::Count(1)
    }
}

impl FromStr for Iterations {
    type Err = String;

    /// `i` (or `inf`) selects infinite passes, otherwise a positive count
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('i') {
            return Ok(Iterations::Infinite);
        }
        match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Iterations::Count(n)),
            _ => Err(format!("invalid num value: {}", s)),
        }
    }
}

impl fmt::Display for Iterations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Iterations::Count(n) => write!(f, "{}", n),
            Iterations::Infinite => write!(f, "infinite"),
        }
    }
}

/// Capture ("dump") configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    #[serde(default)]
    pub timestamp_mode: TimestampMode,

    /// Append the flag summary to each line
    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-call timeout of transport reads (default: 100ms)
    #[serde(default = "default_transport_timeout_ms")]
    pub read_timeout_ms: u64,

    /// How long the output worker waits for a frame before re-checking stop
    #[serde(default = "default_output_poll_ms")]
    pub output_poll_ms: u64,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_transport_timeout_ms() -> u64 {
    TRANSPORT_TIMEOUT.as_millis() as u64
}

fn default_output_poll_ms() -> u64 {
    1
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            timestamp_mode: TimestampMode::default(),
            verbose: false,
            queue_capacity: default_queue_capacity(),
            read_timeout_ms: default_transport_timeout_ms(),
            output_poll_ms: default_output_poll_ms(),
        }
    }
}

impl DumpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the timestamp mode
    pub fn with_timestamp_mode(mut self, mode: TimestampMode) -> Self {
        self.timestamp_mode = mode;
        self
    }

    /// Builder method: enable or disable the flag summary
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Builder method: set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn output_poll(&self) -> Duration {
        Duration::from_millis(self.output_poll_ms)
    }
}

/// Replay ("play") configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub iterations: Iterations,

    /// Sleep between time checks while waiting for the next frame (default: 1ms)
    #[serde(default = "default_replay_gap_ms")]
    pub gap_ms: u64,

    #[serde(default = "default_transport_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_replay_gap_ms() -> u64 {
    1
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            iterations: Iterations::default(),
            gap_ms: default_replay_gap_ms(),
            write_timeout_ms: default_transport_timeout_ms(),
        }
    }
}

impl ReplayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the number of passes
    pub fn with_iterations(mut self, iterations: Iterations) -> Self {
        self.iterations = iterations;
        self
    }

    /// Builder method: set the polling quantum in milliseconds
    pub fn with_gap_ms(mut self, gap_ms: u64) -> Self {
        self.gap_ms = gap_ms;
        self
    }

    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.gap_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Repeated send configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfig {
    /// Total number of transmissions; `None` repeats until stopped
    #[serde(default = "default_send_count")]
    pub count: Option<u32>,

    /// Pause between transmissions (default: 200ms)
    #[serde(default = "default_send_gap_ms")]
    pub gap_ms: u64,

    #[serde(default = "default_transport_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_send_count() -> Option<u32> {
    Some(1)
}

fn default_send_gap_ms() -> u64 {
    200
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            count: default_send_count(),
            gap_ms: default_send_gap_ms(),
            write_timeout_ms: default_transport_timeout_ms(),
        }
    }
}

impl SendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the number of transmissions (`None` = until stopped)
    pub fn with_count(mut self, count: Option<u32>) -> Self {
        self.count = count;
        self
    }

    /// Builder method: set the gap in milliseconds
    pub fn with_gap_ms(mut self, gap_ms: u64) -> Self {
        self.gap_ms = gap_ms;
        self
    }

    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.gap_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
