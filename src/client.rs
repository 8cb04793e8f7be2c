//! Client side of the command protocol, used by tools and tests that
//! drive a running server.

use tracing::debug;

use crate::error::ClientError;
use crate::protocol::{Command, MessageKind, Response};
use crate::transport::{Inbound, Outbound};

pub struct Client<O: Outbound, I: Inbound> {
    commands: O,
    responses: I,
    data_size: usize,
}

impl<O: Outbound, I: Inbound> Client<O, I> {
    pub fn new(commands: O, responses: I, data_size: usize) -> Self {
        Self {
            commands,
            responses,
            data_size,
        }
    }

    /// Send one command and wait for the one response it produces.
    pub fn request(&mut self, command: &Command) -> Result<Response, ClientError> {
        self.commands.send(&command.encode(self.data_size))?;
        let frame = self.responses.recv()?;
        let response = Response::decode(&frame, self.data_size)?;
        debug!(command = ?command.kind(), response = ?response.kind(), "request complete");
        Ok(response)
    }

    /// `Ok(true)` for InitOk, `Ok(false)` for InitFailed.
    pub fn init(&mut self) -> Result<bool, ClientError> {
        match self.request(&Command::Init)? {
            Response::InitOk => Ok(true),
            Response::InitFailed => Ok(false),
            other => Err(unexpected(MessageKind::InitOk, &other)),
        }
    }

    pub fn read_memory(&mut self) -> Result<Vec<u8>, ClientError> {
        match self.request(&Command::ReadMemory)? {
            Response::ReadMemoryOk(block) => Ok(block),
            other => Err(unexpected(MessageKind::ReadDataOk, &other)),
        }
    }

    pub fn write_memory(&mut self, block: &[u8]) -> Result<(), ClientError> {
        match self.request(&Command::WriteMemory(block.to_vec()))? {
            Response::WriteMemoryOk => Ok(()),
            other => Err(unexpected(MessageKind::WriteDataOk, &other)),
        }
    }

    /// Advance the device by one step budget; returns the data memory after.
    pub fn step(&mut self) -> Result<Vec<u8>, ClientError> {
        match self.request(&Command::Step)? {
            Response::StepOk(block) => Ok(block),
            other => Err(unexpected(MessageKind::StepOk, &other)),
        }
    }

    pub fn kill(&mut self) -> Result<(), ClientError> {
        match self.request(&Command::Kill)? {
            Response::KillOk => Ok(()),
            other => Err(unexpected(MessageKind::KillOk, &other)),
        }
    }
}

fn unexpected(expected: MessageKind, actual: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        actual: actual.kind(),
    }
}
