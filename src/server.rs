//! The command loop: one command in, one response out, until Kill or the
//! inbound transport fails.

use tracing::{debug, error, info, warn};

use crate::device::{Device, Engine, Mcu65};
use crate::metrics::{record_command, record_invalid_command, record_send_failure, Timer};
use crate::protocol::{Command, Response};
use crate::stepper::{self, DEFAULT_STEP_BUDGET};
use crate::transport::{Inbound, Outbound};

/// Why [`CommandLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Killed,
    TransportClosed,
}

pub struct CommandLoop<I: Inbound, O: Outbound, E: Engine = Mcu65> {
    device: Option<Device<E>>,
    inbound: I,
    outbound: O,
    data_size: usize,
    step_budget: u64,
    alive: bool,
}

impl<I: Inbound, O: Outbound> CommandLoop<I, O, Mcu65> {
    /// A loop with no device behind it: Init answers InitFailed and memory
    /// snapshots are all zeros.
    pub fn without_device(inbound: I, outbound: O, data_size: usize) -> Self {
        Self {
            device: None,
            inbound,
            outbound,
            data_size,
            step_budget: DEFAULT_STEP_BUDGET,
            alive: true,
        }
    }
}

impl<I: Inbound, O: Outbound, E: Engine> CommandLoop<I, O, E> {
    pub fn new(device: Device<E>, inbound: I, outbound: O) -> Self {
        Self {
            data_size: device.data_size(),
            device: Some(device),
            inbound,
            outbound,
            step_budget: DEFAULT_STEP_BUDGET,
            alive: true,
        }
    }

    pub fn with_step_budget(mut self, step_budget: u64) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn device(&self) -> Option<&Device<E>> {
        self.device.as_ref()
    }

    /// Apply one command. `None` means nothing is sent back: that only
    /// happens for a WriteMemory block that is not exactly the size of data
    /// memory, which [`Command::decode`] never produces, so every command
    /// reaching this through [`CommandLoop::run`] gets a response.
    pub fn dispatch(&mut self, command: Command) -> Option<Response> {
        match command {
            Command::Init => Some(if self.device.is_some() {
                Response::InitOk
            } else {
                Response::InitFailed
            }),
            Command::ReadMemory => Some(Response::ReadMemoryOk(self.snapshot())),
            Command::WriteMemory(block) => match self.device.as_mut() {
                Some(device) => match device.write_data_memory(&block) {
                    Ok(()) => Some(Response::WriteMemoryOk),
                    Err(err) => {
                        error!(error = %err, "write rejected");
                        None
                    }
                },
                None => Some(Response::WriteMemoryOk),
            },
            Command::Step => {
                if let Some(device) = self.device.as_mut() {
                    let outcome = stepper::step(device, self.step_budget);
                    debug!(executed = outcome.executed, state = ?outcome.state, "step");
                }
                Some(Response::StepOk(self.snapshot()))
            }
            Command::Kill => {
                self.alive = false;
                Some(Response::KillOk)
            }
        }
    }

    /// Serve commands until Kill or a receive error, then destroy the device.
    pub fn run(mut self) -> ShutdownReason {
        let model = self.device.as_ref().map(|device| device.model().name());
        info!(
            data_size = self.data_size,
            step_budget = self.step_budget,
            model = model.unwrap_or("none"),
            "command loop started"
        );

        let reason = loop {
            let frame = match self.inbound.recv() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "receive failed, shutting down");
                    break ShutdownReason::TransportClosed;
                }
            };

            let command = match Command::decode(&frame, self.data_size) {
                Ok(command) => command,
                Err(err) => {
                    warn!(kind = frame.kind, error = %err, "invalid command ignored");
                    record_invalid_command();
                    continue;
                }
            };

            let kind = command.kind();
            let timer = Timer::new();
            if let Some(response) = self.dispatch(command) {
                self.respond(&response);
            }
            record_command(kind.name(), timer.elapsed());

            if !self.alive {
                break ShutdownReason::Killed;
            }
        };

        if let Some(device) = self.device.take() {
            device.destroy();
        }
        info!(reason = ?reason, "command loop stopped");
        reason
    }

    // One attempt, never blocks; a lost response is only logged.
    fn respond(&mut self, response: &Response) {
        let frame = response.encode(self.data_size);
        if let Err(err) = self.outbound.try_send(&frame) {
            error!(kind = ?response.kind(), error = %err, "failed to send response");
            record_send_failure();
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        match &self.device {
            Some(device) => device.read_data_memory(),
            None => vec![0; self.data_size],
        }
    }
}
