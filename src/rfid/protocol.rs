//! # RFID Reader Protocol Constants
//!
//! Frame layouts and serial line settings of the supported readers.
//!
//! ## Short-range frame (14 bytes, 9600 8E1)
//!
//! ```text
//! [0x0E][0x00][0x11][0x00][0x05][id0 .. id7][xor]
//!   0     1     2     3     4     5 ..  12    13
//! ```
//!
//! `xor` is the XOR of bytes 0..=12.
//!
//! ## Long-range frame (11 bytes, 38400 8N1)
//!
//! ```text
//! [0x54][id0 .. id7][crc_lo][crc_hi]
//!   0     1 ..  8      9       10
//! ```
//!
//! `crc` is CRC-16/KERMIT over bytes 1..=8.
//!
//! In both layouts the transponder id is bytes 1..=8 rendered most
//! significant (highest index) first.

use serde::Deserialize;
use std::fmt;

/// Supported reader types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum RfidType {
    /// Short-range reader, XOR checksum
    #[serde(rename = "SR")]
    Sr,
    /// Long-range reader, CRC-16 checksum
    #[serde(rename = "LR")]
    Lr,
}

impl RfidType {
    /// Frame length in bytes
    pub const fn frame_len(self) -> usize {
        match self {
            RfidType::Sr => SR_FRAME_LEN,
            RfidType::Lr => LR_FRAME_LEN,
        }
    }

    /// Serial line settings
    pub const fn line_settings(self) -> LineSettings {
        match self {
            RfidType::Sr => LineSettings {
                baud_rate: 9600,
                parity: LineParity::Even,
            },
            RfidType::Lr => LineSettings {
                baud_rate: 38_400,
                parity: LineParity::None,
            },
        }
    }
}

impl fmt::Display for RfidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RfidType::Sr => f.write_str("SR"),
            RfidType::Lr => f.write_str("LR"),
        }
    }
}

/// Parity of the reader UART
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineParity {
    None,
    Even,
}

/// UART configuration; data bits are always 8, stop bits 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub parity: LineParity,
}

/// Short-range frame length
pub const SR_FRAME_LEN: usize = 14;

/// Fixed header of a short-range frame
pub const SR_PREFIX: [u8; 5] = [0x0E, 0x00, 0x11, 0x00, 0x05];

/// Position of the XOR checksum in a short-range frame
pub const SR_XOR_POS: usize = 13;

/// Long-range frame length
pub const LR_FRAME_LEN: usize = 11;

/// Start byte of a long-range frame
pub const LR_START: u8 = 0x54;

/// Position of the CRC low byte in a long-range frame
pub const LR_CRC_LO_POS: usize = 9;

/// Position of the CRC high byte in a long-range frame
pub const LR_CRC_HI_POS: usize = 10;

/// Longest frame of all reader types
pub const MAX_FRAME_LEN: usize = SR_FRAME_LEN;

/// Number of id bytes in a frame
pub const ID_BYTES: usize = 8;

/// Length of a rendered transponder id
pub const ID_LEN: usize = 2 * ID_BYTES;

/// Transponder id as 16 upper-case hex digits; empty if none is present
pub type TransponderId = heapless::String<ID_LEN>;

/// Renders frame bytes 1..=8 as transponder id, highest index first
///
/// # Examples
///
/// ```
/// use tamdl::rfid::protocol::id_from_frame;
///
/// let frame = [0x54, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x00, 0x00];
/// assert_eq!(id_from_frame(&frame).as_str(), "0807060504030201");
/// ```
pub fn id_from_frame(frame: &[u8]) -> TransponderId {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut id = TransponderId::new();

    for &b in frame.iter().skip(1).take(ID_BYTES).rev() {
        // 16 characters fit exactly
        let _ = id.push(char::from(HEX[usize::from(b >> 4)]));
        let _ = id.push(char::from(HEX[usize::from(b & 0x0F)]));
    }

    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lengths() {
        assert_eq!(RfidType::Sr.frame_len(), 14);
        assert_eq!(RfidType::Lr.frame_len(), 11);
        assert!(MAX_FRAME_LEN >= LR_FRAME_LEN);
    }

    #[test]
    fn test_line_settings() {
        let sr = RfidType::Sr.line_settings();
        assert_eq!(sr.baud_rate, 9600);
        assert_eq!(sr.parity, LineParity::Even);

        let lr = RfidType::Lr.line_settings();
        assert_eq!(lr.baud_rate, 38_400);
        assert_eq!(lr.parity, LineParity::None);
    }

    #[test]
    fn test_id_rendering_uppercase() {
        let frame = [0u8, 0xAB, 0xCD, 0xEF, 0x00, 0x00, 0x00, 0x00, 0x9F, 0, 0, 0, 0, 0];
        let id = id_from_frame(&frame);
        assert_eq!(id.as_str(), "9F00000000EFCDAB");
        assert_eq!(id.len(), ID_LEN);
    }

    #[test]
    fn test_display() {
        assert_eq!(RfidType::Sr.to_string(), "SR");
        assert_eq!(RfidType::Lr.to_string(), "LR");
    }
}
