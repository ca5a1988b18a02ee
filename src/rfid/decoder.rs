//! # RFID Frame Decoder
//!
//! Byte-at-a-time state machine reconstructing reader frames from the UART
//! stream. The position counter walks through the frame; a wrong prefix byte
//! drops the partial frame, a checksum mismatch rejects the completed one.

use std::fmt;
use tracing::trace;

use super::crc::crc16_kermit_update;
use super::protocol::*;

/// Raw bytes of a rejected frame
pub type RawFrame = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Completed frame that failed its checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Short-range XOR mismatch
    Xor {
        received: u8,
        calculated: u8,
        raw: RawFrame,
    },
    /// Long-range CRC mismatch
    Crc {
        received: u16,
        calculated: u16,
        raw: RawFrame,
    },
}

impl FrameError {
    /// Raw frame bytes as received
    pub fn raw(&self) -> &[u8] {
        match self {
            FrameError::Xor { raw, .. } | FrameError::Crc { raw, .. } => raw,
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Xor {
                received,
                calculated,
                ..
            } => write!(f, "recv.XOR=0x{:02X}, calc.XOR=0x{:02X}, data is", received, calculated)?,
            FrameError::Crc {
                received,
                calculated,
                ..
            } => write!(f, "recv.CRC=0x{:04X}, calc.CRC=0x{:04X}, data is", received, calculated)?,
        }
        for b in self.raw() {
            write!(f, " {:02X}", b)?;
        }
        Ok(())
    }
}

/// Result of feeding one byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Frame incomplete or byte discarded
    Pending,
    /// Valid frame with its transponder id
    Frame(TransponderId),
    /// Completed frame with checksum mismatch
    Rejected(FrameError),
}

/// Frame decoder for one reader type
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    kind: RfidType,
    buf: [u8; MAX_FRAME_LEN],
    pos: usize,
    xor: u8,
    crc: u16,
}

impl FrameDecoder {
    /// Creates a decoder at position 0
    pub fn new(kind: RfidType) -> Self {
        Self {
            kind,
            buf: [0; MAX_FRAME_LEN],
            pos: 0,
            xor: 0,
            crc: 0,
        }
    }

    /// Reader type this decoder parses
    pub fn kind(&self) -> RfidType {
        self.kind
    }

    /// Current position inside the frame
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Drops any partial frame
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Feeds one received byte
    ///
    /// # Arguments
    ///
    /// * `byte` - Next byte in UART arrival order
    ///
    /// # Returns
    ///
    /// * `Decoded` - Frame, rejection, or [`Decoded::Pending`]
    pub fn push(&mut self, byte: u8) -> Decoded {
        match self.kind {
            RfidType::Sr => self.push_sr(byte),
            RfidType::Lr => self.push_lr(byte),
        }
    }

    fn push_sr(&mut self, byte: u8) -> Decoded {
        if self.pos == 0 {
            self.xor = 0;
        }

        if let Some(&expected) = SR_PREFIX.get(self.pos) {
            if byte != expected {
                trace!("SR prefix mismatch at {}: 0x{:02X}", self.pos, byte);
                self.pos = 0;
                return Decoded::Pending;
            }
        }

        self.buf[self.pos] = byte;
        if self.pos < SR_XOR_POS {
            self.xor ^= byte;
            self.pos += 1;
            return Decoded::Pending;
        }

        self.pos = 0;
        if byte == self.xor {
            Decoded::Frame(id_from_frame(&self.buf[..SR_FRAME_LEN]))
        } else {
            Decoded::Rejected(FrameError::Xor {
                received: byte,
                calculated: self.xor,
                raw: self.raw(SR_FRAME_LEN),
            })
        }
    }

    fn push_lr(&mut self, byte: u8) -> Decoded {
        if self.pos == 0 {
            if byte != LR_START {
                trace!("LR start byte mismatch: 0x{:02X}", byte);
                return Decoded::Pending;
            }
            self.buf[0] = byte;
            self.crc = 0;
            self.pos = 1;
            return Decoded::Pending;
        }

        self.buf[self.pos] = byte;
        if self.pos < LR_CRC_LO_POS {
            self.crc = crc16_kermit_update(self.crc, byte);
            self.pos += 1;
            return Decoded::Pending;
        }
        if self.pos == LR_CRC_LO_POS {
            self.pos += 1;
            return Decoded::Pending;
        }

        self.pos = 0;
        let received = (u16::from(self.buf[LR_CRC_HI_POS]) << 8) | u16::from(self.buf[LR_CRC_LO_POS]);
        if received == self.crc {
            Decoded::Frame(id_from_frame(&self.buf[..LR_FRAME_LEN]))
        } else {
            Decoded::Rejected(FrameError::Crc {
                received,
                calculated: self.crc,
                raw: self.raw(LR_FRAME_LEN),
            })
        }
    }

    fn raw(&self, len: usize) -> RawFrame {
        RawFrame::from_slice(&self.buf[..len]).unwrap_or_default()
    }
}
