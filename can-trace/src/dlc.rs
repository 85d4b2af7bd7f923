//! DLC <-> payload length tables
//!
//! Classic CAN maps DLC 0-8 one to one onto the byte count. CAN FD reuses
//! codes 9-15 for the longer payload classes 12..64.

/// Maximum payload of a classic CAN frame
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum payload of a CAN FD frame
pub const CANFD_MAX_DLEN: usize = 64;
/// Returned by [`len_to_dlc`] for lengths no DLC can express
pub const INVALID_DLC: u8 = 0xFF;

const DLC_TO_LEN: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Payload length for a DLC. Only the low nibble is considered.
pub fn dlc_to_len(dlc: u8) -> u8 {
    DLC_TO_LEN[usize::from(dlc & 0x0F)]
}

/// Smallest DLC whose payload class holds `len` bytes, or [`INVALID_DLC`]
/// when `len` exceeds 64.
pub fn len_to_dlc(len: usize) -> u8 {
    if len > CANFD_MAX_DLEN {
        return INVALID_DLC;
    }
    match DLC_TO_LEN.iter().position(|&class| usize::from(class) >= len) {
        Some(dlc) => dlc as u8,
        None => INVALID_DLC,
    }
}

/// Variant of [`len_to_dlc`] that saturates at DLC 15.
pub fn len_to_dlc_saturating(len: u8) -> u8 {
    match len_to_dlc(usize::from(len)) {
        INVALID_DLC => 0x0F,
        dlc => dlc,
    }
}
