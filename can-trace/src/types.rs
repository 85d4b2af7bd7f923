//! Core types for the CAN trace library
//!
//! This module defines the frame model shared by the codec, the capture
//! pipeline and the replay scheduler, together with the error type every
//! fallible operation returns.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::dlc::{dlc_to_len, len_to_dlc_saturating, CANFD_MAX_DLEN, CAN_MAX_DLEN};

/// Timestamp type used for diagnostics
pub type Timestamp = DateTime<Utc>;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Mask for an 11-bit standard identifier
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Mask for a 29-bit extended identifier
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// Reserved identifier bit marking an error frame in the text format
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

bitflags! {
    /// Per-frame flag set as reported by the driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u16 {
        /// 29-bit identifier
        const EXTENDED = 0x0001;
        /// Remote transmission request
        const REMOTE_REQUEST = 0x0002;
        /// Receive buffer overrun reported by the controller
        const OVERRUN_ERROR = 0x0004;
        /// Transceiver (NERR) error line asserted
        const TRANSCEIVER_ERROR = 0x0008;
        /// CAN FD frame
        const FD_FRAME = 0x0010;
        /// FD bit rate switch
        const BIT_RATE_SWITCH = 0x0020;
        /// FD error state indicator
        const ERROR_STATE_INDICATOR = 0x0040;
    }
}

/// A single CAN / CAN FD frame
///
/// The payload buffer is always sized for the largest FD frame. Only the
/// first [`Frame::len`] bytes are meaningful; everything past that is never
/// rendered or compared.
#[derive(Clone, Copy)]
pub struct Frame {
    id: u32,
    flags: FrameFlags,
    len: u8,
    data: [u8; CANFD_MAX_DLEN],
}

impl Frame {
    /// Create a classic data frame. Returns `None` for more than 8 bytes.
    pub fn new(id: u32, extended: bool, data: &[u8]) -> Option<Self> {
        if data.len() > CAN_MAX_DLEN {
            return None;
        }
        let flags = if extended { FrameFlags::EXTENDED } else { FrameFlags::empty() };
        Some(Self::with_payload(id, flags, data))
    }

    /// Create an FD data frame. Returns `None` for more than 64 bytes.
    pub fn new_fd(id: u32, extended: bool, brs: bool, esi: bool, data: &[u8]) -> Option<Self> {
        if data.len() > CANFD_MAX_DLEN {
            return None;
        }
        let mut flags = FrameFlags::FD_FRAME;
        flags.set(FrameFlags::EXTENDED, extended);
        flags.set(FrameFlags::BIT_RATE_SWITCH, brs);
        flags.set(FrameFlags::ERROR_STATE_INDICATOR, esi);
        Some(Self::with_payload(id, flags, data))
    }

    /// Create a remote request frame asking for `len` bytes (0-8)
    pub fn new_remote(id: u32, extended: bool, len: u8) -> Option<Self> {
        if usize::from(len) > CAN_MAX_DLEN {
            return None;
        }
        let mut frame = Self::empty();
        frame.id = id & Self::id_mask(extended);
        frame.flags = FrameFlags::REMOTE_REQUEST;
        frame.flags.set(FrameFlags::EXTENDED, extended);
        frame.len = len;
        Some(frame)
    }

    /// Build a frame from a raw 4-bit DLC as delivered by a driver.
    ///
    /// FD frames map the code through the DLC table, classic frames cap it
    /// at 8. Missing payload bytes are zero-filled.
    pub fn from_dlc(id: u32, flags: FrameFlags, dlc: u8, payload: &[u8]) -> Self {
        let len = if flags.contains(FrameFlags::FD_FRAME) {
            dlc_to_len(dlc)
        } else {
            dlc.min(CAN_MAX_DLEN as u8)
        };
        let mut frame = Self::empty();
        frame.id = id;
        frame.flags = flags;
        frame.len = len;
        if !flags.contains(FrameFlags::REMOTE_REQUEST) {
            let n = payload.len().min(usize::from(len));
            frame.data[..n].copy_from_slice(&payload[..n]);
        }
        frame
    }

    /// An all-zero frame: standard id 0, no flags, no payload
    pub fn empty() -> Self {
        Self {
            id: 0,
            flags: FrameFlags::empty(),
            len: 0,
            data: [0; CANFD_MAX_DLEN],
        }
    }

    pub(crate) fn with_payload(id: u32, flags: FrameFlags, data: &[u8]) -> Self {
        let mut frame = Self::empty();
        frame.id = id & Self::id_mask(flags.contains(FrameFlags::EXTENDED));
        frame.flags = flags;
        frame.len = data.len() as u8;
        frame.data[..data.len()].copy_from_slice(data);
        frame
    }

    pub(crate) fn from_parts(id: u32, flags: FrameFlags, len: u8, data: [u8; CANFD_MAX_DLEN]) -> Self {
        Self { id, flags, len, data }
    }

    fn id_mask(extended: bool) -> u32 {
        if extended {
            CAN_EFF_MASK
        } else {
            CAN_SFF_MASK
        }
    }

    /// CAN identifier (11 or 29 bit)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Flag set
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Payload length in bytes. For remote frames this is the requested length.
    pub fn len(&self) -> usize {
        usize::from(self.len).min(CANFD_MAX_DLEN)
    }

    /// True if the frame carries no payload
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The 4-bit data length code matching the payload length
    pub fn dlc(&self) -> u8 {
        len_to_dlc_saturating(self.len)
    }

    /// Payload bytes (empty for remote frames)
    pub fn data(&self) -> &[u8] {
        if self.is_remote() {
            &[]
        } else {
            &self.data[..self.len()]
        }
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(FrameFlags::EXTENDED)
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(FrameFlags::REMOTE_REQUEST)
    }

    pub fn is_fd(&self) -> bool {
        self.flags.contains(FrameFlags::FD_FRAME)
    }

    pub fn is_brs(&self) -> bool {
        self.flags.contains(FrameFlags::BIT_RATE_SWITCH)
    }

    pub fn is_esi(&self) -> bool {
        self.flags.contains(FrameFlags::ERROR_STATE_INDICATOR)
    }

    /// Add driver-reported status flags (overrun, transceiver error)
    pub fn insert_flags(&mut self, flags: FrameFlags) {
        self.flags.insert(flags);
    }

    /// One-line diagnostic rendering: `<id> <flags> <len> <hex>`
    pub fn describe(&self) -> String {
        let mut out = format!("{:x} {} {:02} ", self.id, crate::codec::FlagSummary(self.flags), self.len());
        for byte in self.data() {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.flags == other.flags
            && self.len == other.len
            && self.data() == other.data()
    }
}

impl Eq for Frame {}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &format_args!("0x{:X}", self.id))
            .field("flags", &self.flags)
            .field("len", &self.len)
            .field("data", &self.data())
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::codec::encode(self))
    }
}

/// A frame as received on a channel, stamped at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Channel the frame was read from
    pub channel: u8,
    /// Capture timestamp in microseconds (driver clock, relative to bus-on)
    pub timestamp_us: u64,
    /// The frame itself
    pub frame: Frame,
}

impl CapturedFrame {
    pub fn new(channel: u8, timestamp_us: u64, frame: Frame) -> Self {
        Self {
            channel,
            timestamp_us,
            frame,
        }
    }

    /// Copy of this capture with its timestamp shifted by `epoch_us`
    pub fn rebased(&self, epoch_us: u64) -> Self {
        Self {
            timestamp_us: self.timestamp_us.saturating_add(epoch_us),
            ..*self
        }
    }
}

/// Broad class of a [`TraceError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad channel spec, unsupported bitrate, failed open/configure
    Configuration,
    /// Malformed frame text or log line
    Decode,
    /// Read/write failure on an open channel
    Transport,
    /// Queue used after shutdown
    QueueClosed,
    /// File or stream I/O
    Io,
}

/// Errors that can occur while capturing, sending or replaying
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Invalid channel spec '{spec}': {reason}")]
    InvalidChannelSpec { spec: String, reason: String },

    #[error("Invalid bitrate: '{0}'")]
    InvalidBitrate(String),

    #[error("Unsupported {phase} bitrate {bitrate} ({mode})")]
    UnsupportedBitrate {
        phase: &'static str,
        mode: &'static str,
        bitrate: u32,
    },

    #[error("Invalid channel value: {0} (maximum is {max})", max = crate::channel::MAX_CHANNELS - 1)]
    ChannelOutOfRange(u32),

    #[error("Channel {0} is not opened")]
    ChannelNotOpen(u8),

    #[error("Failed to set up channel {channel}: {reason}")]
    TransportSetup { channel: u8, reason: String },

    #[error("Failed to decode frame '{text}': {reason}")]
    FrameDecode { text: String, reason: String },

    #[error("Incorrect line format in logfile (line {line}): {reason}")]
    LogLine { line: usize, reason: String },

    #[error("Transport error on channel {channel}: {reason}")]
    Transport { channel: u8, reason: String },

    #[error("Frame queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TraceError {
    pub(crate) fn decode(text: &str, reason: impl Into<String>) -> Self {
        TraceError::FrameDecode {
            text: text.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TraceError::InvalidChannelSpec { .. }
            | TraceError::InvalidBitrate(_)
            | TraceError::UnsupportedBitrate { .. }
            | TraceError::ChannelOutOfRange(_)
            | TraceError::ChannelNotOpen(_)
            | TraceError::TransportSetup { .. } => ErrorKind::Configuration,
            TraceError::FrameDecode { .. } | TraceError::LogLine { .. } => ErrorKind::Decode,
            TraceError::Transport { .. } => ErrorKind::Transport,
            TraceError::QueueClosed => ErrorKind::QueueClosed,
            TraceError::IoError(_) => ErrorKind::Io,
        }
    }
}

/// Convert a microsecond timestamp since the Unix epoch to `DateTime<Utc>`
pub fn log_timestamp(timestamp_us: u64) -> Timestamp {
    let secs = (timestamp_us / 1_000_000) as i64;
    let nsecs = ((timestamp_us % 1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nsecs).unwrap_or_default()
}
