use crate::model::ModelSpecs;

// I/O page shared by every model
pub const UART_DATA: u16 = 0x7F00;
pub const UART_STATUS: u16 = 0x7F01;
pub const UART_TX_READY: u8 = 0x01;

/// Address space of the microcontroller: SRAM from `$0000`, a UART in the
/// I/O page and flash running up to `$FFFF` (vectors live at the top).
pub struct Memory {
    sram: Vec<u8>,
    flash: Vec<u8>,
    flash_base: u16,
    serial_tx: Vec<u8>,
}

impl Memory {
    pub fn new(specs: &ModelSpecs) -> Self {
        Memory {
            sram: vec![0; specs.data_size],
            flash: vec![0; specs.flash_size],
            flash_base: (0x1_0000 - specs.flash_size) as u16,
            serial_tx: Vec::new(),
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        if address >= self.flash_base {
            return self.flash[(address - self.flash_base) as usize];
        }
        match address {
            UART_STATUS => UART_TX_READY,
            _ => self.sram.get(address as usize).copied().unwrap_or(0),
        }
    }

    pub fn write(&mut self, address: u16, value: u8) {
        if address >= self.flash_base {
            self.flash[(address - self.flash_base) as usize] = value;
            return;
        }
        match address {
            UART_DATA => self.serial_tx.push(value),
            _ => {
                if let Some(cell) = self.sram.get_mut(address as usize) {
                    *cell = value;
                }
            }
        }
    }

    // Read a 16-bit value in little-endian format
    pub fn read_u16(&self, address: u16) -> u16 {
        let low = self.read(address) as u16;
        let high = self.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    // Write a 16-bit value in little-endian format
    pub fn write_u16(&mut self, address: u16, value: u16) {
        self.write(address, (value & 0xFF) as u8);
        self.write(address.wrapping_add(1), (value >> 8) as u8);
    }

    /// Copy `data` into flash at a program-memory offset.
    pub fn load_flash(&mut self, offset: usize, data: &[u8]) {
        let start = offset.min(self.flash.len());
        let end = (offset + data.len()).min(self.flash.len());
        self.flash[start..end].copy_from_slice(&data[..end - start]);
    }

    pub fn flash_base(&self) -> u16 {
        self.flash_base
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn sram_mut(&mut self) -> &mut [u8] {
        &mut self.sram
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// Bytes the firmware transmitted since the last call.
    pub fn take_serial(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.serial_tx)
    }
}
