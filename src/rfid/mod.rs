//! # RFID Module
//!
//! Transponder detection through a serial RFID reader.
//!
//! This module handles:
//! - Short-range (XOR) and long-range (CRC-16) frame formats
//! - Byte-wise frame reconstruction and checksum validation
//! - Reader power requests with deferred power-off
//! - New-id notification and absence detection

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
pub mod reader;

pub use protocol::{RfidType, TransponderId};
pub use reader::{RfidReader, PowerRequest};
