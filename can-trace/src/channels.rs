//! Set of open channels for one run
//!
//! Built once before any worker starts, then shared read-only. Dropping the
//! set takes every channel bus-off and closes it.

use std::collections::BTreeMap;

use crate::channel::ChannelConfig;
use crate::transport::{ChannelHandle, Transport};
use crate::types::{Result, TraceError};

/// An opened and configured channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenChannel {
    pub config: ChannelConfig,
    pub handle: ChannelHandle,
}

/// Open channels keyed by channel number
pub struct ChannelSet<'t, T: Transport + ?Sized> {
    transport: &'t T,
    channels: BTreeMap<u8, OpenChannel>,
}

impl<'t, T: Transport + ?Sized> ChannelSet<'t, T> {
    /// Open and configure every channel in `configs`.
    ///
    /// On the first failure all channels opened so far are closed again
    /// and the error is returned.
    pub fn open(transport: &'t T, configs: &[ChannelConfig]) -> Result<Self> {
        let mut set = Self {
            transport,
            channels: BTreeMap::new(),
        };

        for config in configs {
            if set.channels.contains_key(&config.channel()) {
                return Err(TraceError::InvalidChannelSpec {
                    spec: config.channel().to_string(),
                    reason: "channel given more than once".to_string(),
                });
            }
            let handle = set.setup_channel(config)?;
            log::info!("Opened channel {}", config);
            set.channels.insert(
                config.channel(),
                OpenChannel {
                    config: *config,
                    handle,
                },
            );
        }

        Ok(set)
    }

    fn setup_channel(&self, config: &ChannelConfig) -> Result<ChannelHandle> {
        let channel = config.channel();
        let setup_error = |e: TraceError| TraceError::TransportSetup {
            channel,
            reason: e.to_string(),
        };

        let handle = self
            .transport
            .open(channel, config.is_fd())
            .map_err(setup_error)?;

        if let Err(e) = self
            .transport
            .configure(handle, config.bitrate(), config.data_bitrate())
        {
            if let Err(close_err) = self.transport.close(handle) {
                log::warn!("Failed to close channel {}: {}", channel, close_err);
            }
            return Err(setup_error(e));
        }

        Ok(handle)
    }

    /// Synchronised bus-on: every channel goes bus-off first, then all go
    /// bus-on together.
    pub fn bus_on_all(&self) -> Result<()> {
        for open in self.channels.values() {
            if let Err(e) = self.transport.bus_off(open.handle) {
                log::debug!("bus-off before bus-on failed on channel {}: {}", open.config.channel(), e);
            }
        }
        for open in self.channels.values() {
            self.transport
                .bus_on(open.handle)
                .map_err(|e| TraceError::TransportSetup {
                    channel: open.config.channel(),
                    reason: e.to_string(),
                })?;
        }
        log::info!("{} channel(s) bus-on", self.channels.len());
        Ok(())
    }

    pub fn transport(&self) -> &'t T {
        self.transport
    }

    pub fn get(&self, channel: u8) -> Option<&OpenChannel> {
        self.channels.get(&channel)
    }

    /// Handle for `channel`, or `ChannelNotOpen`
    pub fn handle(&self, channel: u8) -> Result<ChannelHandle> {
        self.get(channel)
            .map(|open| open.handle)
            .ok_or(TraceError::ChannelNotOpen(channel))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpenChannel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Bus-off and close every channel. Failures are logged, not returned.
    pub fn close_all(&mut self) {
        for (channel, open) in std::mem::take(&mut self.channels) {
            if let Err(e) = self.transport.bus_off(open.handle) {
                log::warn!("bus-off failed on channel {}: {}", channel, e);
            }
            if let Err(e) = self.transport.close(open.handle) {
                log::warn!("close failed on channel {}: {}", channel, e);
            }
            log::debug!("Closed channel {}", channel);
        }
    }
}

impl<T: Transport + ?Sized> Drop for ChannelSet<'_, T> {
    fn drop(&mut self) {
        self.close_all();
    }
}
