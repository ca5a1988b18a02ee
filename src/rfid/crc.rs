//! # RFID Frame Checksums
//!
//! - Short-range reader: XOR over the first 13 frame bytes
//! - Long-range reader: CRC-16/KERMIT over the 8 payload bytes
//!
//! **CRC-16/KERMIT**: polynomial 0x1021 (reflected 0x8408), initial value
//! 0x0000, input and output reflected, no final XOR.

/// Reflected CRC-16/KERMIT polynomial
const KERMIT_POLY: u16 = 0x8408;

/// Precomputed CRC-16/KERMIT lookup table
const KERMIT_TABLE: [u16; 256] = generate_kermit_table();

/// Generate CRC-16/KERMIT lookup table at compile time
const fn generate_kermit_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ KERMIT_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// XOR of all bytes
///
/// # Examples
///
/// ```
/// use tamdl::rfid::crc::xor_checksum;
///
/// assert_eq!(xor_checksum(&[0x0E, 0x00, 0x11]), 0x1F);
/// ```
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Feeds one byte into a running CRC-16/KERMIT
///
/// Used by the streaming decoder, which checksums bytes as they arrive.
pub fn crc16_kermit_update(crc: u16, byte: u8) -> u16 {
    (crc >> 8) ^ KERMIT_TABLE[((crc ^ u16::from(byte)) & 0x00FF) as usize]
}

/// Calculate CRC-16/KERMIT using the lookup table
///
/// # Arguments
///
/// * `data` - Payload bytes
///
/// # Returns
///
/// * `u16` - CRC, transmitted low byte first
pub fn crc16_kermit(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &b| crc16_kermit_update(crc, b))
}

/// Calculate CRC-16/KERMIT nibble by nibble (slow, for verification)
#[allow(dead_code)]
fn crc16_kermit_slow(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        let b = u16::from(byte);
        crc = (crc >> 4) ^ (((crc ^ b) & 0x000F) * 0x1081);
        crc = (crc >> 4) ^ (((crc ^ (b >> 4)) & 0x000F) * 0x1081);
    }

    crc
}
