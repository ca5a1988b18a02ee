//! # Simulated Hardware
//!
//! Host-side implementations of the hardware traits. Pin and ADC handles are
//! cheap clones sharing their state, so a caller can keep a copy and observe
//! what the control core drives.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{AdcScanner, BatteryGauge, Hardware, NvStorage, PinHandle};
use crate::control::measure::{Measure, NUM_MEASURE};
use crate::control::rail::{Rail, NUM_RAILS};
use crate::error::Result;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Output pin backed by a shared flag
#[derive(Debug, Clone, Default)]
pub struct SimPin {
    level: Arc<AtomicBool>,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current output level
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl PinHandle for SimPin {
    fn get(&self) -> bool {
        self.level()
    }

    fn set(&mut self, on: bool) {
        self.level.store(on, Ordering::SeqCst);
    }
}

/// Snapshot of the simulated ADC
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcState {
    pub running: bool,
    pub channel_mask: u8,
    pub scan_duration_ms: u32,
    /// Number of scan starts since creation
    pub starts: u32,
}

/// ADC recording scan requests
#[derive(Debug, Clone, Default)]
pub struct SimAdc {
    state: Arc<Mutex<AdcState>>,
}

impl SimAdc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AdcState {
        *lock(&self.state)
    }
}

impl AdcScanner for SimAdc {
    fn start_scan(&mut self, channel_mask: u8, scan_duration_ms: u32) {
        let mut state = lock(&self.state);
        state.running = true;
        state.channel_mask = channel_mask;
        state.scan_duration_ms = scan_duration_ms;
        state.starts += 1;
    }

    fn stop_scan(&mut self) {
        lock(&self.state).running = false;
    }
}

/// In-memory storage
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-loaded with an image
    pub fn with_contents(data: &[u8]) -> Self {
        Self {
            data: Arc::new(Mutex::new(data.to_vec())),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }
}

impl NvStorage for MemStorage {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = lock(&self.data);
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write_block(&mut self, data: &[u8]) -> Result<()> {
        *lock(&self.data) = data.to_vec();
        Ok(())
    }
}

/// Storage backed by a single file
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NvStorage for FileStorage {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No calibration file at {}", self.path.display());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write_block(&mut self, data: &[u8]) -> Result<()> {
        fs::write(&self.path, data)?;
        Ok(())
    }
}

/// Battery gauge returning fixed readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBattery {
    pub voltage_mv: Option<i32>,
    pub current_ma: Option<i32>,
}

impl Default for SimBattery {
    fn default() -> Self {
        Self {
            voltage_mv: Some(12_600),
            current_ma: Some(0),
        }
    }
}

impl BatteryGauge for SimBattery {
    fn voltage_mv(&mut self) -> Option<i32> {
        self.voltage_mv
    }

    fn current_ma(&mut self) -> Option<i32> {
        self.current_ma
    }
}

/// Observable set of simulated pins and ADC
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    pub rail_pins: [SimPin; NUM_RAILS],
    pub measure_pins: [SimPin; NUM_MEASURE],
    pub adc: SimAdc,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a [`Hardware`] bundle sharing this board's pins and ADC
    pub fn hardware(&self, storage: Box<dyn NvStorage>, battery: Option<Box<dyn BatteryGauge>>) -> Hardware {
        Hardware {
            rail_pins: self
                .rail_pins
                .clone()
                .map(|p| Box::new(p) as Box<dyn PinHandle>),
            measure_pins: self
                .measure_pins
                .clone()
                .map(|p| Box::new(p) as Box<dyn PinHandle>),
            adc: Box::new(self.adc.clone()),
            storage,
            battery,
        }
    }

    /// Level of a rail enable pin
    pub fn rail(&self, rail: Rail) -> bool {
        self.rail_pins[rail.index()].level()
    }

    /// Level of a measurement enable pin
    pub fn measure(&self, measure: Measure) -> bool {
        self.measure_pins[measure.index()].level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pin_clones_share_level() {
        let pin = SimPin::new();
        let mut handle = pin.clone();
        assert!(!pin.level());
        handle.set(true);
        assert!(pin.level());
        assert!(handle.get());
    }

    #[test]
    fn test_adc_records_scans() {
        let adc = SimAdc::new();
        let mut handle = adc.clone();
        handle.start_scan(0x41, 1000);
        assert_eq!(
            adc.state(),
            AdcState {
                running: true,
                channel_mask: 0x41,
                scan_duration_ms: 1000,
                starts: 1
            }
        );
        handle.stop_scan();
        assert!(!adc.state().running);
    }

    #[test]
    fn test_mem_storage() {
        let mut storage = MemStorage::new();
        let mut buf = [0u8; 4];
        assert_eq!(storage.read_block(&mut buf).unwrap(), 0);

        storage.write_block(&[1, 2, 3]).unwrap();
        assert_eq!(storage.read_block(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(storage.contents(), vec![1, 2, 3]);
    }

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path().join("cal.bin"));
        let mut buf = [0u8; 8];
        assert_eq!(storage.read_block(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_file_storage_write_then_read() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path().join("cal.bin"));
        storage.write_block(&[9, 8, 7, 6]).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(storage.read_block(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_board_hardware_shares_pins() {
        let board = SimBoard::new();
        let mut hw = board.hardware(Box::new(MemStorage::new()), None);
        hw.rail_pins[Rail::Ua2.index()].set(true);
        assert!(board.rail(Rail::Ua2));
        assert!(!board.rail(Rail::Ua1));
        hw.measure_pins[Measure::Ua1.index()].set(true);
        assert!(board.measure(Measure::Ua1));
    }
}
