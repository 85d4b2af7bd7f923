//! Compact ASCII frame format
//!
//! ```text
//! <can_id>#{data}                 classic data frame
//! <can_id>#R{len}                 classic remote request
//! <can_id>##<flags>{data}         CAN FD frame
//! ```
//!
//! `<can_id>` is 3 hex digits (11-bit) or 8 hex digits (29-bit). Data is a
//! run of 2-digit hex bytes; a single `.` may precede any byte. `<flags>` is
//! one hex digit carrying BRS (0x1) and ESI (0x2).
//!
//! Examples: `123#1122334455667788`, `123##11122334455667788`,
//! `12345678#DEADBEEF`, `5AA#R3`, `1F334455#11.22.33`.

use std::fmt;

use crate::dlc::{CANFD_MAX_DLEN, CAN_MAX_DLEN};
use crate::types::{
    Frame, FrameFlags, Result, TraceError, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_SFF_MASK,
};

const CANID_DELIM: u8 = b'#';
const DATA_SEPARATOR: u8 = b'.';

/// Flag digit bits of the `##<flags>` field
const CANFD_BRS: u8 = 0x01;
const CANFD_ESI: u8 = 0x02;
const CANFD_FDF: u8 = 0x04;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Value of a single hex digit, `None` if `c` is not one
pub fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Decode a frame from its compact text form
pub fn decode(text: &str) -> Result<Frame> {
    let cs = text.as_bytes();
    let at = |i: usize| cs.get(i).copied();
    let nibble_at = |i: usize, what: &str| {
        at(i)
            .and_then(hex_nibble)
            .ok_or_else(|| TraceError::decode(text, format!("invalid hex digit in {} at offset {}", what, i)))
    };

    if cs.len() < 4 {
        return Err(TraceError::decode(text, "too short"));
    }

    let mut flags = FrameFlags::empty();
    let (id, mut idx) = if at(3) == Some(CANID_DELIM) {
        let mut id = 0u32;
        for i in 0..3 {
            id = (id << 4) | u32::from(nibble_at(i, "identifier")?);
        }
        (id & CAN_SFF_MASK, 4)
    } else if at(5) == Some(CANID_DELIM) {
        return Err(TraceError::decode(text, "CAN XL frames are not supported"));
    } else if at(8) == Some(CANID_DELIM) {
        let mut id = 0u32;
        for i in 0..8 {
            id = (id << 4) | u32::from(nibble_at(i, "identifier")?);
        }
        // 8 digits but no error frame: extended frame
        if id & CAN_ERR_FLAG == 0 {
            flags |= FrameFlags::EXTENDED;
        }
        (id & CAN_EFF_MASK, 9)
    } else {
        return Err(TraceError::decode(text, "missing '#' after 3 or 8 digit identifier"));
    };

    if matches!(at(idx), Some(b'R') | Some(b'r')) {
        flags |= FrameFlags::REMOTE_REQUEST;
        let mut len = 0u8;
        if let Some(c) = at(idx + 1) {
            let requested = hex_nibble(c)
                .ok_or_else(|| TraceError::decode(text, "invalid remote request length"))?;
            // digits above 8 are not a classic length and are ignored
            if usize::from(requested) <= CAN_MAX_DLEN {
                len = requested;
            }
        }
        return Ok(Frame::from_parts(id, flags, len, [0; CANFD_MAX_DLEN]));
    }

    let mut max_len = CAN_MAX_DLEN;
    if at(idx) == Some(CANID_DELIM) {
        let fd_flags = nibble_at(idx + 1, "FD flags")?;
        flags |= FrameFlags::FD_FRAME;
        if fd_flags & CANFD_BRS != 0 {
            flags |= FrameFlags::BIT_RATE_SWITCH;
        }
        if fd_flags & CANFD_ESI != 0 {
            flags |= FrameFlags::ERROR_STATE_INDICATOR;
        }
        max_len = CANFD_MAX_DLEN;
        idx += 2;
    } else if at(idx + 14) == Some(CANID_DELIM) {
        return Err(TraceError::decode(text, "CAN XL frames are not supported"));
    }

    let mut data = [0u8; CANFD_MAX_DLEN];
    let mut len = 0usize;
    while len < max_len {
        if at(idx) == Some(DATA_SEPARATOR) {
            idx += 1;
        }
        if idx >= cs.len() {
            break;
        }
        let hi = nibble_at(idx, "data")?;
        let lo = nibble_at(idx + 1, "data")?;
        data[len] = (hi << 4) | lo;
        len += 1;
        idx += 2;
    }

    Ok(Frame::from_parts(id, flags, len as u8, data))
}

fn push_hex_byte(out: &mut String, byte: u8) {
    out.push(HEX_UPPER[usize::from(byte >> 4)] as char);
    out.push(HEX_UPPER[usize::from(byte & 0x0F)] as char);
}

/// Encode a frame into its compact text form
pub fn encode(frame: &Frame) -> String {
    let mut out = String::with_capacity(12 + CANFD_MAX_DLEN * 2);

    if frame.is_extended() {
        out.push_str(&format!("{:08X}", frame.id() & CAN_EFF_MASK));
    } else {
        out.push_str(&format!("{:03X}", frame.id() & CAN_SFF_MASK));
    }
    out.push(CANID_DELIM as char);

    if frame.is_remote() {
        out.push('R');
        let len = frame.len();
        if len > 0 && len <= CAN_MAX_DLEN {
            out.push(HEX_UPPER[len] as char);
        }
        return out;
    }

    if frame.is_fd() {
        let mut fd_flags = CANFD_FDF;
        if frame.is_brs() {
            fd_flags |= CANFD_BRS;
        }
        if frame.is_esi() {
            fd_flags |= CANFD_ESI;
        }
        out.push(CANID_DELIM as char);
        out.push(HEX_UPPER[usize::from(fd_flags)] as char);
    }

    // data() never reaches past the 64 byte buffer
    for &byte in frame.data() {
        push_hex_byte(&mut out, byte);
    }
    out
}

/// Seven fixed slots `xRoNFBE`, blank when the flag is clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSummary(pub FrameFlags);

impl fmt::Display for FlagSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = [
            (FrameFlags::EXTENDED, 'x'),
            (FrameFlags::REMOTE_REQUEST, 'R'),
            (FrameFlags::OVERRUN_ERROR, 'o'),
            (FrameFlags::TRANSCEIVER_ERROR, 'N'),
            (FrameFlags::FD_FRAME, 'F'),
            (FrameFlags::BIT_RATE_SWITCH, 'B'),
            (FrameFlags::ERROR_STATE_INDICATOR, 'E'),
        ];
        for (flag, c) in slots {
            let c = if self.0.contains(flag) { c } else { ' ' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
