//! Transport abstraction
//!
//! The capture pipeline, the sender and the replay scheduler talk to CAN
//! hardware only through the [`Transport`] trait. A driver binding opens
//! channels, sets bus parameters and moves frames; everything else in this
//! crate is driver independent.

use std::fmt;
use std::time::Duration;

use crate::types::{Frame, Result};

pub mod virtual_bus;

pub use virtual_bus::VirtualBus;

/// Timeout applied to blocking reads and writes
pub const TRANSPORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Opaque handle to an open channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u32);

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A frame read from a channel, stamped by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub frame: Frame,
    /// Microseconds on the driver clock
    pub timestamp_us: u64,
}

/// Driver interface for CAN channels
pub trait Transport: Send + Sync {
    /// Open `channel`, optionally in FD mode
    fn open(&self, channel: u8, fd: bool) -> Result<ChannelHandle>;

    /// Set bus parameters. `data_bitrate` is given for FD channels only.
    fn configure(&self, handle: ChannelHandle, bitrate: u32, data_bitrate: Option<u32>) -> Result<()>;

    /// Go bus-on
    fn bus_on(&self, handle: ChannelHandle) -> Result<()>;

    /// Go bus-off
    fn bus_off(&self, handle: ChannelHandle) -> Result<()>;

    /// Transmit a frame, waiting up to `timeout` for the driver to accept it
    fn write(&self, handle: ChannelHandle, frame: &Frame, timeout: Duration) -> Result<()>;

    /// Wait up to `timeout` for a frame. `Ok(None)` means nothing arrived.
    fn read(&self, handle: ChannelHandle, timeout: Duration) -> Result<Option<ReceivedFrame>>;

    /// Release the channel
    fn close(&self, handle: ChannelHandle) -> Result<()>;
}
