use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Microcontroller models the server can emulate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    #[value(name = "mcu65x4")]
    Mcu65x4, // 1KB SRAM, 16KB flash, 8 MHz
    #[value(name = "mcu65x8")]
    #[default]
    Mcu65x8, // 2KB SRAM, 32KB flash, 16 MHz
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSpecs {
    /// Data memory (SRAM) size in bytes; also the protocol payload size.
    pub data_size: usize,
    /// Program memory (flash) size in bytes, persisted across runs.
    pub flash_size: usize,
    pub frequency_hz: u32,
}

impl DeviceModel {
    pub fn specs(&self) -> ModelSpecs {
        match self {
            DeviceModel::Mcu65x4 => ModelSpecs {
                data_size: 1024,
                flash_size: 16 * 1024,
                frequency_hz: 8_000_000,
            },
            DeviceModel::Mcu65x8 => ModelSpecs {
                data_size: 2048,
                flash_size: 32 * 1024,
                frequency_hz: 16_000_000,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceModel::Mcu65x4 => "mcu65x4",
            DeviceModel::Mcu65x8 => "mcu65x8",
        }
    }

    /// Backing file for this model's flash, e.g. `mcu65x8_flash.bin`.
    pub fn flash_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_flash.bin", self.name()))
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
