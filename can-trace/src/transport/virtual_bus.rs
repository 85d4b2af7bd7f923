//! In-memory virtual CAN bus
//!
//! All channels opened on one [`VirtualBus`] share a single bus: a frame
//! written on one bus-on channel is received by every other bus-on channel.
//! Classic channels do not see FD frames. Timestamps are microseconds since
//! the bus was created.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::{ChannelHandle, ReceivedFrame, Transport};
use crate::channel::{BusParams, MAX_CHANNELS};
use crate::types::{Frame, FrameFlags, Result, TraceError};

/// Frames buffered per channel before the oldest are dropped
pub const RX_BUFFER_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Port {
    channel: u8,
    fd: bool,
    configured: bool,
    bus_on: bool,
    rx: VecDeque<ReceivedFrame>,
    overrun: bool,
}

impl Port {
    fn deliver(&mut self, mut received: ReceivedFrame) {
        if received.frame.is_fd() && !self.fd {
            return;
        }
        if self.rx.len() >= RX_BUFFER_CAPACITY {
            self.rx.pop_front();
            self.overrun = true;
        }
        if self.overrun {
            received.frame.insert_flags(FrameFlags::OVERRUN_ERROR);
            self.overrun = false;
        }
        self.rx.push_back(received);
    }
}

#[derive(Debug, Default)]
struct BusState {
    ports: HashMap<ChannelHandle, Port>,
    next_handle: u32,
}

/// Shared in-process bus implementing [`Transport`]
#[derive(Debug)]
pub struct VirtualBus {
    origin: Instant,
    state: Mutex<BusState>,
    rx_ready: Condvar,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(BusState::default()),
            rx_ready: Condvar::new(),
        }
    }

    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Deliver `frame` to every bus-on handle of `channel`, as if it had
    /// arrived from the wire. Returns how many handles received it.
    pub fn inject(&self, channel: u8, frame: Frame) -> usize {
        let received = ReceivedFrame {
            frame,
            timestamp_us: self.now_us(),
        };
        let mut state = self.state.lock();
        let mut delivered = 0;
        for port in state.ports.values_mut() {
            if port.channel == channel && port.bus_on {
                port.deliver(received);
                delivered += 1;
            }
        }
        drop(state);
        self.rx_ready.notify_all();
        delivered
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.state.lock().ports.len()
    }

    /// True if some handle of `channel` is bus-on
    pub fn is_bus_on(&self, channel: u8) -> bool {
        self.state
            .lock()
            .ports
            .values()
            .any(|port| port.channel == channel && port.bus_on)
    }

    fn not_open(handle: ChannelHandle) -> TraceError {
        TraceError::Transport {
            channel: u8::MAX,
            reason: format!("handle {} is not open", handle),
        }
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for VirtualBus {
    fn open(&self, channel: u8, fd: bool) -> Result<ChannelHandle> {
        if usize::from(channel) >= MAX_CHANNELS {
            return Err(TraceError::ChannelOutOfRange(u32::from(channel)));
        }
        let mut state = self.state.lock();
        let handle = ChannelHandle(state.next_handle);
        state.next_handle += 1;
        state.ports.insert(
            handle,
            Port {
                channel,
                fd,
                configured: false,
                bus_on: false,
                rx: VecDeque::new(),
                overrun: false,
            },
        );
        log::debug!("virtual bus: opened channel {} (fd={}) as handle {}", channel, fd, handle);
        Ok(handle)
    }

    fn configure(&self, handle: ChannelHandle, bitrate: u32, data_bitrate: Option<u32>) -> Result<()> {
        let mut state = self.state.lock();
        let port = state.ports.get_mut(&handle).ok_or_else(|| Self::not_open(handle))?;
        let params = BusParams {
            fd: port.fd,
            bitrate,
            data_bitrate: data_bitrate.unwrap_or(crate::channel::CANFD_DATA_BITRATE_DEFAULT),
        };
        params.validate()?;
        port.configured = true;
        Ok(())
    }

    fn bus_on(&self, handle: ChannelHandle) -> Result<()> {
        let mut state = self.state.lock();
        let port = state.ports.get_mut(&handle).ok_or_else(|| Self::not_open(handle))?;
        if !port.configured {
            return Err(TraceError::Transport {
                channel: port.channel,
                reason: "bus parameters not set".to_string(),
            });
        }
        port.bus_on = true;
        Ok(())
    }

    fn bus_off(&self, handle: ChannelHandle) -> Result<()> {
        let mut state = self.state.lock();
        let port = state.ports.get_mut(&handle).ok_or_else(|| Self::not_open(handle))?;
        port.bus_on = false;
        Ok(())
    }

    fn write(&self, handle: ChannelHandle, frame: &Frame, _timeout: Duration) -> Result<()> {
        let received = ReceivedFrame {
            frame: *frame,
            timestamp_us: self.now_us(),
        };
        let mut state = self.state.lock();
        let sender = state.ports.get(&handle).ok_or_else(|| Self::not_open(handle))?;
        if !sender.bus_on {
            return Err(TraceError::Transport {
                channel: sender.channel,
                reason: "channel is bus-off".to_string(),
            });
        }
        if frame.is_fd() && !sender.fd {
            return Err(TraceError::Transport {
                channel: sender.channel,
                reason: "FD frame on a classic channel".to_string(),
            });
        }
        for (other, port) in state.ports.iter_mut() {
            if *other != handle && port.bus_on {
                port.deliver(received);
            }
        }
        drop(state);
        self.rx_ready.notify_all();
        Ok(())
    }

    fn read(&self, handle: ChannelHandle, timeout: Duration) -> Result<Option<ReceivedFrame>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let port = state.ports.get_mut(&handle).ok_or_else(|| Self::not_open(handle))?;
            if let Some(received) = port.rx.pop_front() {
                return Ok(Some(received));
            }
            if self.rx_ready.wait_until(&mut state, deadline).timed_out() {
                let port = state.ports.get_mut(&handle).ok_or_else(|| Self::not_open(handle))?;
                return Ok(port.rx.pop_front());
            }
        }
    }

    fn close(&self, handle: ChannelHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.ports.remove(&handle).ok_or_else(|| Self::not_open(handle))?;
        drop(state);
        self.rx_ready.notify_all();
        Ok(())
    }
}
