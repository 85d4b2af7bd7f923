//! Channel descriptors
//!
//! A channel is described on the command line by a compact string:
//!
//! ```text
//! <channel-num>{f|F}{_}{b|B<bitrate>}{d|D<data-bitrate>}
//!
//! 0             channel 0, classic CAN, 500K
//! 0F            channel 0, CAN FD
//! 0_b250K       channel 0, classic CAN, 250K
//! 0Fb500Kd2M    channel 0, CAN FD, arbitration 500K, data 2M
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Result, TraceError};

/// Number of channels a single process may address
pub const MAX_CHANNELS: usize = 16;

/// Default classic bitrate / FD arbitration bitrate
pub const CAN_BITRATE_DEFAULT: u32 = 500_000;
/// Default FD data-phase bitrate
pub const CANFD_DATA_BITRATE_DEFAULT: u32 = 2_000_000;

/// Bitrates a classic CAN channel can be configured with
pub const CLASSIC_BITRATES: &[u32] = &[125_000, 250_000, 500_000, 1_000_000];
/// Arbitration bitrates supported in FD mode
pub const FD_ARBITRATION_BITRATES: &[u32] = &[500_000, 1_000_000];
/// Data-phase bitrates supported in FD mode
pub const FD_DATA_BITRATES: &[u32] = &[1_000_000, 2_000_000, 4_000_000, 8_000_000];

/// Bus parameters before channel-spec clauses are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusParams {
    #[serde(default)]
    pub fd: bool,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    #[serde(default = "default_data_bitrate")]
    pub data_bitrate: u32,
}

fn default_bitrate() -> u32 {
    CAN_BITRATE_DEFAULT
}

fn default_data_bitrate() -> u32 {
    CANFD_DATA_BITRATE_DEFAULT
}

impl Default for BusParams {
    fn default() -> Self {
        Self {
            fd: false,
            bitrate: CAN_BITRATE_DEFAULT,
            data_bitrate: CANFD_DATA_BITRATE_DEFAULT,
        }
    }
}

impl BusParams {
    /// Check the bitrates against the supported sets for the mode
    pub fn validate(&self) -> Result<()> {
        if self.fd {
            if !FD_ARBITRATION_BITRATES.contains(&self.bitrate) {
                return Err(TraceError::UnsupportedBitrate {
                    phase: "arbitration",
                    mode: "CAN FD",
                    bitrate: self.bitrate,
                });
            }
            if !FD_DATA_BITRATES.contains(&self.data_bitrate) {
                return Err(TraceError::UnsupportedBitrate {
                    phase: "data",
                    mode: "CAN FD",
                    bitrate: self.data_bitrate,
                });
            }
        } else if !CLASSIC_BITRATES.contains(&self.bitrate) {
            return Err(TraceError::UnsupportedBitrate {
                phase: "arbitration",
                mode: "classic CAN",
                bitrate: self.bitrate,
            });
        }
        Ok(())
    }
}

/// Validated configuration of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    channel: u8,
    params: BusParams,
}

impl ChannelConfig {
    /// Build a configuration, rejecting out-of-range channels and
    /// unsupported bitrates
    pub fn new(channel: u32, params: BusParams) -> Result<Self> {
        if channel as usize >= MAX_CHANNELS {
            return Err(TraceError::ChannelOutOfRange(channel));
        }
        params.validate()?;
        Ok(Self {
            channel: channel as u8,
            params,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn is_fd(&self) -> bool {
        self.params.fd
    }

    pub fn bitrate(&self) -> u32 {
        self.params.bitrate
    }

    /// Data-phase bitrate, only meaningful for FD channels
    pub fn data_bitrate(&self) -> Option<u32> {
        self.params.fd.then_some(self.params.data_bitrate)
    }

    pub fn params(&self) -> BusParams {
        self.params
    }
}

impl fmt::Display for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch={}, fd={}, b={}, d={}",
            self.channel,
            u8::from(self.params.fd),
            self.params.bitrate,
            self.params.data_bitrate
        )
    }
}

/// Parse a bitrate such as `500000`, `500k`, `500K` or `2M`
pub fn parse_bitrate(text: &str) -> Result<u32> {
    let invalid = || TraceError::InvalidBitrate(text.to_string());

    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(digits_end);
    if digits.is_empty() {
        return Err(invalid());
    }

    let value: u32 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match suffix {
        "" => 1,
        "k" | "K" => 1_000,
        "m" | "M" => 1_000_000,
        _ => return Err(invalid()),
    };

    match value.checked_mul(multiplier) {
        Some(0) | None => Err(invalid()),
        Some(bitrate) if bitrate > i32::MAX as u32 => Err(invalid()),
        Some(bitrate) => Ok(bitrate),
    }
}

/// Parse a channel spec starting from the default bus parameters
pub fn parse_channel_spec(spec: &str) -> Result<ChannelConfig> {
    parse_channel_spec_with(spec, BusParams::default())
}

/// Parse a channel spec on top of `base`; clauses in the spec win.
///
/// Characters outside the recognised clauses are skipped with a warning.
pub fn parse_channel_spec_with(spec: &str, base: BusParams) -> Result<ChannelConfig> {
    let invalid = |reason: &str| TraceError::InvalidChannelSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let digits_end = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    if digits_end == 0 {
        return Err(invalid("missing channel number"));
    }
    let channel: u32 = spec[..digits_end]
        .parse()
        .map_err(|_| invalid("channel number too large"))?;

    let mut params = base;
    let mut rest = &spec[digits_end..];

    if let Some(tail) = rest.strip_prefix(&['f', 'F'][..]) {
        params.fd = true;
        rest = tail;
    }
    if let Some(tail) = rest.strip_prefix('_') {
        rest = tail;
    }

    let mut seen_bitrate = false;
    let mut seen_data_bitrate = false;
    while let Some(c) = rest.chars().next() {
        match c {
            'b' | 'B' | 'd' | 'D' => {
                let is_data = matches!(c, 'd' | 'D');
                let body = &rest[1..];
                // the value runs until the other clause letter or the end
                let end = body
                    .find(|ch: char| {
                        if is_data {
                            matches!(ch, 'b' | 'B')
                        } else {
                            matches!(ch, 'd' | 'D')
                        }
                    })
                    .unwrap_or(body.len());
                let value = &body[..end];
                if !value.is_empty() {
                    let bitrate = parse_bitrate(value)?;
                    if is_data {
                        if seen_data_bitrate {
                            return Err(invalid("data bitrate given twice"));
                        }
                        seen_data_bitrate = true;
                        params.data_bitrate = bitrate;
                    } else {
                        if seen_bitrate {
                            return Err(invalid("bitrate given twice"));
                        }
                        seen_bitrate = true;
                        params.bitrate = bitrate;
                    }
                }
                rest = &body[end..];
            }
            other => {
                log::warn!("Ignoring unexpected character '{}' in channel spec '{}'", other, spec);
                rest = &rest[other.len_utf8()..];
            }
        }
    }

    ChannelConfig::new(channel, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bitrate_suffixes() {
        assert_eq!(parse_bitrate("125000").unwrap(), 125_000);
        assert_eq!(parse_bitrate("250k").unwrap(), 250_000);
        assert_eq!(parse_bitrate("500K").unwrap(), 500_000);
        assert_eq!(parse_bitrate("2m").unwrap(), 2_000_000);
        assert_eq!(parse_bitrate("8M").unwrap(), 8_000_000);
    }

    #[test]
    fn test_parse_bitrate_rejects_garbage_and_overflow() {
        assert!(parse_bitrate("").is_err());
        assert!(parse_bitrate("0").is_err());
        assert!(parse_bitrate("K").is_err());
        assert!(parse_bitrate("500X").is_err());
        assert!(parse_bitrate("-500").is_err());
        assert!(parse_bitrate("99999999999").is_err());
        assert!(parse_bitrate("3000M").is_err());
        assert!(parse_bitrate("2147484K").is_err());
    }

    #[test]
    fn test_plain_channel_uses_defaults() {
        let ch = parse_channel_spec("3").unwrap();
        assert_eq!(ch.channel(), 3);
        assert!(!ch.is_fd());
        assert_eq!(ch.bitrate(), 500_000);
        assert_eq!(ch.data_bitrate(), None);
        assert_eq!(ch.params().data_bitrate, 2_000_000);
    }

    #[test]
    fn test_fd_channel_with_both_clauses() {
        let ch = parse_channel_spec("0Fb500Kd2M").unwrap();
        assert_eq!(ch.channel(), 0);
        assert!(ch.is_fd());
        assert_eq!(ch.bitrate(), 500_000);
        assert_eq!(ch.data_bitrate(), Some(2_000_000));
    }

    #[test]
    fn test_clauses_in_either_order() {
        let ch = parse_channel_spec("1f_D4MB1M").unwrap();
        assert_eq!(ch.channel(), 1);
        assert_eq!(ch.bitrate(), 1_000_000);
        assert_eq!(ch.data_bitrate(), Some(4_000_000));
    }

    #[test]
    fn test_underscore_separator() {
        let ch = parse_channel_spec("2_b250K").unwrap();
        assert_eq!(ch.channel(), 2);
        assert!(!ch.is_fd());
        assert_eq!(ch.bitrate(), 250_000);
    }

    #[test]
    fn test_unknown_characters_are_skipped() {
        let ch = parse_channel_spec("0xyz").unwrap();
        assert_eq!(ch.channel(), 0);
        assert_eq!(ch.bitrate(), 500_000);
    }

    #[test]
    fn test_base_params_are_overridden_by_clauses() {
        let base = BusParams {
            fd: true,
            bitrate: 1_000_000,
            data_bitrate: 4_000_000,
        };
        let ch = parse_channel_spec_with("0d8M", base).unwrap();
        assert!(ch.is_fd());
        assert_eq!(ch.bitrate(), 1_000_000);
        assert_eq!(ch.data_bitrate(), Some(8_000_000));
    }

    #[test]
    fn test_channel_out_of_range() {
        assert!(matches!(
            parse_channel_spec("16"),
            Err(TraceError::ChannelOutOfRange(16))
        ));
        assert!(parse_channel_spec("15").is_ok());
    }

    #[test]
    fn test_channel_number_overflow() {
        match parse_channel_spec("99999999999999") {
            Err(TraceError::InvalidChannelSpec { spec, reason }) => {
                assert_eq!(spec, "99999999999999");
                assert_eq!(reason, "channel number too large");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_spec_errors() {
        assert!(parse_channel_spec("").is_err());
        assert!(parse_channel_spec("F").is_err());
        assert!(parse_channel_spec("0b500Kd2Mb250K").is_err());
        assert!(parse_channel_spec("0bXYZ").is_err());
    }

    #[test]
    fn test_unsupported_bitrates_rejected_at_construction() {
        assert!(matches!(
            parse_channel_spec("0b300K"),
            Err(TraceError::UnsupportedBitrate { .. })
        ));
        // 250K is classic only
        assert!(parse_channel_spec("0Fb250K").is_err());
        assert!(parse_channel_spec("0Fd3M").is_err());
        // data bitrate is not checked for classic channels
        assert!(parse_channel_spec("0d3M").is_ok());
    }

    #[test]
    fn test_display() {
        let ch = parse_channel_spec("1F").unwrap();
        assert_eq!(ch.to_string(), "ch=1, fd=1, b=500000, d=2000000");
    }
}
