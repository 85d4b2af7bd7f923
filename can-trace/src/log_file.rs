//! Compact log file format
//!
//! One frame per line:
//!
//! ```text
//! (0000001700.123456) 0 123#1122334455667788
//! (0000001700.123789) 1 12345678##1DEADBEEF [x   FB ]
//! ```
//!
//! Lines that do not start with `(` are comments. Anything after the frame
//! text (such as the verbose flag summary) is ignored when reading.

use std::fmt;
use std::io::{BufRead, Seek, SeekFrom};

use crate::codec::{self, FlagSummary};
use crate::types::{log_timestamp, CapturedFrame, Frame, Result, Timestamp, TraceError};

/// One parsed log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    /// Microseconds (absolute since the epoch, or relative to capture start)
    pub timestamp_us: u64,
    pub channel: u8,
    pub frame: Frame,
}

impl LogRecord {
    pub fn new(timestamp_us: u64, channel: u8, frame: Frame) -> Self {
        Self {
            timestamp_us,
            channel,
            frame,
        }
    }

    /// Timestamp as a calendar time
    pub fn timestamp(&self) -> Timestamp {
        log_timestamp(self.timestamp_us)
    }

    /// Wrapper that renders the line with the trailing flag summary
    pub fn verbose(&self) -> VerboseRecord<'_> {
        VerboseRecord(self)
    }
}

impl From<CapturedFrame> for LogRecord {
    fn from(captured: CapturedFrame) -> Self {
        Self::new(captured.timestamp_us, captured.channel, captured.frame)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:010}.{:06}) {} {}",
            self.timestamp_us / 1_000_000,
            self.timestamp_us % 1_000_000,
            self.channel,
            codec::encode(&self.frame)
        )
    }
}

/// Log line followed by ` [xRoNFBE]`
pub struct VerboseRecord<'a>(&'a LogRecord);

impl fmt::Display for VerboseRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.0, FlagSummary(self.0.frame.flags()))
    }
}

/// Parse a line that starts with `(`.
///
/// `line_no` is only used for error reporting.
pub fn parse_log_line(line: &str, line_no: usize) -> Result<LogRecord> {
    let bad = |reason: &str| TraceError::LogLine {
        line: line_no,
        reason: reason.to_string(),
    };

    let body = line
        .strip_prefix('(')
        .ok_or_else(|| bad("line does not start with '('"))?;
    let (stamp, rest) = body
        .split_once(')')
        .ok_or_else(|| bad("missing ')' after timestamp"))?;
    let (secs, usecs) = stamp
        .split_once('.')
        .ok_or_else(|| bad("timestamp is not <seconds>.<microseconds>"))?;

    let secs: u64 = secs.trim().parse().map_err(|_| bad("invalid seconds"))?;
    let usecs: u64 = usecs.trim().parse().map_err(|_| bad("invalid microseconds"))?;
    if usecs >= 1_000_000 {
        return Err(bad("microseconds out of range"));
    }
    let timestamp_us = secs
        .checked_mul(1_000_000)
        .and_then(|us| us.checked_add(usecs))
        .ok_or_else(|| bad("timestamp overflow"))?;

    let mut fields = rest.split_whitespace();
    let channel: u8 = fields
        .next()
        .ok_or_else(|| bad("missing channel"))?
        .parse()
        .map_err(|_| bad("invalid channel"))?;
    let frame_text = fields.next().ok_or_else(|| bad("missing frame"))?;
    let frame = codec::decode(frame_text).map_err(|e| bad(&e.to_string()))?;

    Ok(LogRecord::new(timestamp_us, channel, frame))
}

/// Forward reader over a log stream
pub struct LogReader<R> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> LogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }

    /// Skip comment lines and parse the next record. `Ok(None)` at EOF.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if self.buf.starts_with('(') {
                let line = self.buf.trim_end();
                return parse_log_line(line, self.line_no).map(Some);
            }
        }
    }

    /// Number of lines consumed so far
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead + Seek> LogReader<R> {
    /// Go back to the start of the stream
    pub fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.line_no = 0;
        Ok(())
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
