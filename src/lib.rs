//! # MCU65 emulation server
//!
//! Runs one emulated MCU65 microcontroller (a 6502-family core with on-chip
//! SRAM, flash and a UART) and lets another process drive it over a pair of
//! message queues.
//!
//! ## Features
//!
//! - Typed command/response protocol: Init, ReadMemory, WriteMemory, Step, Kill
//! - Client-paced execution with a fixed instruction budget per Step
//! - Flash persisted to a per-model backing file across runs
//! - Intel HEX and raw binary firmware images
//! - UART output bridged to a host file, FIFO or terminal
//! - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use mcu65_server::client::Client;
//! use mcu65_server::device::{Device, DeviceOptions};
//! use mcu65_server::model::DeviceModel;
//! use mcu65_server::server::CommandLoop;
//! use mcu65_server::transport::channel;
//!
//! let options = DeviceOptions::new(DeviceModel::Mcu65x8, ".");
//! let device = Device::create(Path::new("firmware.hex"), options).unwrap();
//! let data_size = device.data_size();
//!
//! let (commands_tx, commands_rx) = channel(16);
//! let (responses_tx, responses_rx) = channel(16);
//! let server = std::thread::spawn(move || {
//!     CommandLoop::new(device, commands_rx, responses_tx).run()
//! });
//!
//! let mut client = Client::new(commands_tx, responses_rx, data_size);
//! assert!(client.init().unwrap());
//! let memory = client.step().unwrap();
//! println!("first byte after one step: {:#04x}", memory[0]);
//! client.kill().unwrap();
//! server.join().unwrap();
//! ```

pub mod client;
pub mod config;
pub mod console;
pub mod cpu;
pub mod device;
pub mod error;
pub mod firmware;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod stepper;
pub mod transport;

pub use device::{Device, DeviceOptions, Engine, RunState};
pub use error::{ClientError, ConfigError, DecodeError, DeviceError, TransportError};
pub use model::DeviceModel;
pub use protocol::{Command, MessageKind, Response};
pub use server::{CommandLoop, ShutdownReason};
