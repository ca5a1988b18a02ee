//! # RFID Frame Encoder
//!
//! Builds reader frames the way the readers transmit them. Used to feed the
//! decoder from simulated readers and tests.

use super::crc::{crc16_kermit, xor_checksum};
use super::protocol::*;

/// Builds a short-range frame around 8 payload bytes
///
/// # Examples
///
/// ```
/// use tamdl::rfid::encoder::encode_sr_frame;
///
/// let frame = encode_sr_frame([1, 2, 3, 4, 5, 6, 7, 8]);
/// assert_eq!(&frame[..5], &[0x0E, 0x00, 0x11, 0x00, 0x05]);
/// ```
pub fn encode_sr_frame(payload: [u8; ID_BYTES]) -> [u8; SR_FRAME_LEN] {
    let mut frame = [0u8; SR_FRAME_LEN];
    frame[..SR_PREFIX.len()].copy_from_slice(&SR_PREFIX);
    frame[SR_PREFIX.len()..SR_XOR_POS].copy_from_slice(&payload);
    frame[SR_XOR_POS] = xor_checksum(&frame[..SR_XOR_POS]);
    frame
}

/// Builds a long-range frame around 8 id bytes
///
/// The rendered transponder id of the frame is the hex form of
/// `u64::from_le_bytes(id)`.
pub fn encode_lr_frame(id: [u8; ID_BYTES]) -> [u8; LR_FRAME_LEN] {
    let mut frame = [0u8; LR_FRAME_LEN];
    frame[0] = LR_START;
    frame[1..=ID_BYTES].copy_from_slice(&id);
    let crc = crc16_kermit(&frame[1..=ID_BYTES]);
    frame[LR_CRC_LO_POS] = crc as u8;
    frame[LR_CRC_HI_POS] = (crc >> 8) as u8;
    frame
}
