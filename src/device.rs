//! The emulated device: one engine, its persistent flash store and the
//! console bridge, created once at startup and destroyed once at shutdown.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::console::ConsoleBridge;
use crate::cpu::CPU;
use crate::error::DeviceError;
use crate::firmware::Firmware;
use crate::memory::Memory;
use crate::metrics::record_flush_failure;
use crate::model::{DeviceModel, ModelSpecs};
use crate::persistence::FlashStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    /// Clean halt.
    Done,
    /// Fault; the core will not execute further.
    Crashed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// Instruction-level emulation backend driven by a [`Device`].
pub trait Engine {
    fn reset(&mut self);

    /// Execute one instruction and report the resulting run-state.
    fn run_one(&mut self) -> RunState;

    fn run_state(&self) -> RunState;

    fn data_memory(&self) -> &[u8];
    fn data_memory_mut(&mut self) -> &mut [u8];

    fn program_memory(&self) -> &[u8];
    fn program_memory_mut(&mut self) -> &mut [u8];

    /// Serial output produced since the last call.
    fn drain_serial(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// The built-in engine: a 6502-family core behind the model's address map.
pub struct Mcu65 {
    pub cpu: CPU,
    pub memory: Memory,
}

impl Mcu65 {
    pub fn new(specs: &ModelSpecs) -> Self {
        Self {
            cpu: CPU::new(),
            memory: Memory::new(specs),
        }
    }
}

impl Engine for Mcu65 {
    fn reset(&mut self) {
        self.cpu.reset(&self.memory);
    }

    fn run_one(&mut self) -> RunState {
        self.cpu.step(&mut self.memory)
    }

    fn run_state(&self) -> RunState {
        self.cpu.run_state()
    }

    fn data_memory(&self) -> &[u8] {
        self.memory.sram()
    }

    fn data_memory_mut(&mut self) -> &mut [u8] {
        self.memory.sram_mut()
    }

    fn program_memory(&self) -> &[u8] {
        self.memory.flash()
    }

    fn program_memory_mut(&mut self) -> &mut [u8] {
        self.memory.flash_mut()
    }

    fn drain_serial(&mut self) -> Vec<u8> {
        self.memory.take_serial()
    }
}

/// Where the device keeps its flash and where its console goes.
pub struct DeviceOptions {
    pub model: DeviceModel,
    pub flash_dir: PathBuf,
    pub console: ConsoleBridge,
}

impl DeviceOptions {
    pub fn new(model: DeviceModel, flash_dir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            flash_dir: flash_dir.into(),
            console: ConsoleBridge::stdout(),
        }
    }

    pub fn with_console(mut self, console: ConsoleBridge) -> Self {
        self.console = console;
        self
    }
}

pub struct Device<E: Engine = Mcu65> {
    engine: E,
    model: DeviceModel,
    flash: FlashStore,
    console: ConsoleBridge,
    instructions: u64,
    started_at: DateTime<Utc>,
}

impl Device<Mcu65> {
    /// Build the built-in engine, restore its flash from the model's backing
    /// file and lay the firmware image over it.
    ///
    /// A missing firmware image is reported as [`DeviceError::FirmwareNotFound`]
    /// before any file is touched. Every other error is fatal to the process.
    pub fn create(firmware_path: &Path, options: DeviceOptions) -> Result<Self, DeviceError> {
        if !firmware_path.exists() {
            return Err(DeviceError::FirmwareNotFound(firmware_path.to_path_buf()));
        }

        let specs = options.model.specs();
        let firmware = Firmware::load(firmware_path)?;
        firmware.check_fits(specs.flash_size)?;

        let engine = Mcu65::new(&specs);
        let mut device = Device::with_engine(engine, options)?;
        for segment in &firmware.segments {
            device.engine.memory.load_flash(segment.offset, &segment.data);
        }
        device.engine.reset();

        info!(
            model = %device.model,
            firmware = %firmware_path.display(),
            bytes = firmware.len(),
            frequency_hz = specs.frequency_hz,
            pc = %format_args!("${:04X}", device.engine.cpu.get_pc()),
            "device initialized"
        );
        Ok(device)
    }
}

impl<E: Engine> Device<E> {
    /// Wrap an engine: load persistent memory into it and start the console.
    pub fn with_engine(mut engine: E, options: DeviceOptions) -> Result<Self, DeviceError> {
        let DeviceOptions { model, flash_dir, mut console } = options;
        let flash_size = engine.program_memory().len();
        let flash_path = model.flash_file(&flash_dir);

        let (flash, contents) = FlashStore::load(&flash_path, flash_size)?;
        engine.program_memory_mut().copy_from_slice(&contents);

        console.start();

        Ok(Self {
            engine,
            model,
            flash,
            console,
            instructions: 0,
            started_at: Utc::now(),
        })
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn run_state(&self) -> RunState {
        self.engine.run_state()
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn data_size(&self) -> usize {
        self.engine.data_memory().len()
    }

    pub fn read_data_memory(&self) -> Vec<u8> {
        self.engine.data_memory().to_vec()
    }

    /// Overwrite all of data memory; `bytes` must be exactly the region size.
    pub fn write_data_memory(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let region = self.engine.data_memory_mut();
        if bytes.len() != region.len() {
            return Err(DeviceError::DataSize {
                expected: region.len(),
                actual: bytes.len(),
            });
        }
        region.copy_from_slice(bytes);
        Ok(())
    }

    pub fn execute_one_cycle(&mut self) -> RunState {
        self.instructions += 1;
        self.engine.run_one()
    }

    /// Forward pending serial output to the console bridge.
    pub fn pump_console(&mut self) {
        let bytes = self.engine.drain_serial();
        if !bytes.is_empty() {
            self.console.forward(&bytes);
        }
    }

    /// Flush flash to its backing file and stop the console. A failed flush
    /// is reported, never fatal.
    pub fn destroy(mut self) {
        self.pump_console();

        if let Err(err) = self.flash.store(self.engine.program_memory()) {
            error!(error = %err, "failed to persist flash memory");
            record_flush_failure();
        }
        self.console.stop();

        let runtime = Utc::now() - self.started_at;
        info!(
            model = %self.model,
            instructions = self.instructions,
            runtime_seconds = runtime.num_seconds(),
            state = ?self.engine.run_state(),
            "device destroyed"
        );
    }

    pub fn flash_path(&self) -> &Path {
        self.flash.path()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::fs;

    fn write_firmware(dir: &Path, program: &[u8]) -> PathBuf {
        let mut image = vec![0xEA; 0x8000];
        image[..program.len()].copy_from_slice(program);
        image[0x7FFC] = 0x00; // reset vector -> $8000
        image[0x7FFD] = 0x80;
        let path = dir.join("firmware.bin");
        fs::write(&path, image).unwrap();
        path
    }

    #[test]
    fn test_create_missing_firmware() {
        let dir = tempfile::tempdir().unwrap();
        let options = DeviceOptions::new(DeviceModel::Mcu65x8, dir.path());
        let result = Device::create(&dir.path().join("missing.hex"), options);

        assert!(matches!(result, Err(DeviceError::FirmwareNotFound(_))));
        assert!(!DeviceModel::Mcu65x8.flash_file(dir.path()).exists());
    }

    #[test]
    fn test_create_runs_from_reset_vector() {
        let dir = tempfile::tempdir().unwrap();
        // LDA #$11, STA $0000, BRK
        let firmware = write_firmware(dir.path(), &[0xA9, 0x11, 0x8D, 0x00, 0x00, 0x00]);
        let options = DeviceOptions::new(DeviceModel::Mcu65x8, dir.path())
            .with_console(ConsoleBridge::discard());
        let mut device = Device::create(&firmware, options).unwrap();

        assert_eq!(device.data_size(), 2048);
        assert_eq!(device.run_state(), RunState::Running);
        assert_eq!(device.execute_one_cycle(), RunState::Running);
        assert_eq!(device.execute_one_cycle(), RunState::Running);
        assert_eq!(device.read_data_memory()[0], 0x11);
        assert_eq!(device.execute_one_cycle(), RunState::Done);
        assert_eq!(device.instructions(), 3);
        device.destroy();
    }

    #[test]
    fn test_write_data_memory_requires_full_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = scripted_device(dir.path(), ScriptedEngine::endless(16, 64));

        let err = device.write_data_memory(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DeviceError::DataSize { expected: 16, actual: 3 }));

        let block: Vec<u8> = (0..16).collect();
        device.write_data_memory(&block).unwrap();
        assert_eq!(device.read_data_memory(), block);
    }

    #[test]
    fn test_destroy_persists_flash() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine::endless(16, 64);
        engine.flash[10] = 0xA5;
        let device = scripted_device(dir.path(), engine);
        let path = device.flash_path().to_path_buf();

        // loading the empty store zeroed the engine's flash
        assert_eq!(device.engine().flash[10], 0);
        device.destroy();
        assert_eq!(fs::read(&path).unwrap(), vec![0; 64]);
    }

    #[test]
    fn test_destroy_survives_flush_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = scripted_device(dir.path(), ScriptedEngine::endless(16, 64));
        let path = device.flash_path().to_path_buf();
        // program memory no longer matches the 64-byte store
        device.engine.flash.truncate(10);

        let before = crate::metrics::FLUSH_FAILURES_TOTAL.get();
        device.destroy();
        assert!(crate::metrics::FLUSH_FAILURES_TOTAL.get() >= before + 1.0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 64);
    }

    #[test]
    fn test_run_state_and_model() {
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Done.is_terminal());
        assert!(RunState::Crashed.is_terminal());

        let dir = tempfile::tempdir().unwrap();
        let device = scripted_device(dir.path(), ScriptedEngine::endless(4, 16));
        assert_eq!(device.model(), DeviceModel::Mcu65x4);
        assert_eq!(device.flash_path(), DeviceModel::Mcu65x4.flash_file(dir.path()).as_path());
    }

    #[test]
    fn test_console_receives_serial_output() {
        let dir = tempfile::tempdir().unwrap();
        // LDX #0 ; loop: LDA msg,X ; BEQ done ; STA $7F00 ; INX ; BNE loop ; done: BRK ; msg: "hi\n\0"
        let program = [
            0xA2, 0x00, 0xBD, 0x0E, 0x80, 0xF0, 0x06, 0x8D, 0x00, 0x7F, 0xE8, 0xD0, 0xF5, 0x00,
            b'h', b'i', b'\n', 0x00,
        ];
        let firmware = write_firmware(dir.path(), &program);
        let (console, captured) = ConsoleBridge::capture();
        let options = DeviceOptions::new(DeviceModel::Mcu65x8, dir.path()).with_console(console);
        let mut device = Device::create(&firmware, options).unwrap();

        while device.execute_one_cycle() == RunState::Running {}
        device.pump_console();
        assert_eq!(captured.contents(), b"hi\n".to_vec());
        device.destroy();
    }
}
