//! Command/response messages exchanged with the client.
//!
//! On the wire every record is a message-kind tag followed by a fixed
//! payload the size of the device's data memory. In memory, commands and
//! responses are tagged variants and only the kinds that carry a memory
//! block have one.

use serde::Serialize;

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i64)]
pub enum MessageKind {
    None = 0,
    Init = 1,
    ReadData = 2,
    WriteData = 3,
    Step = 4,
    Kill = 5,
    InitOk = 6,
    InitFailed = 7,
    ReadDataOk = 8,
    WriteDataOk = 9,
    StepOk = 10,
    KillOk = 11,
}

impl MessageKind {
    pub fn from_raw(raw: i64) -> Option<Self> {
        let kind = match raw {
            0 => MessageKind::None,
            1 => MessageKind::Init,
            2 => MessageKind::ReadData,
            3 => MessageKind::WriteData,
            4 => MessageKind::Step,
            5 => MessageKind::Kill,
            6 => MessageKind::InitOk,
            7 => MessageKind::InitFailed,
            8 => MessageKind::ReadDataOk,
            9 => MessageKind::WriteDataOk,
            10 => MessageKind::StepOk,
            11 => MessageKind::KillOk,
            _ => return None,
        };
        Some(kind)
    }

    pub fn raw(self) -> i64 {
        self as i64
    }

    pub fn is_response(self) -> bool {
        self.raw() >= MessageKind::InitOk.raw()
    }

    /// Metric label.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::None => "none",
            MessageKind::Init => "init",
            MessageKind::ReadData => "read_data",
            MessageKind::WriteData => "write_data",
            MessageKind::Step => "step",
            MessageKind::Kill => "kill",
            MessageKind::InitOk => "init_ok",
            MessageKind::InitFailed => "init_failed",
            MessageKind::ReadDataOk => "read_data_ok",
            MessageKind::WriteDataOk => "write_data_ok",
            MessageKind::StepOk => "step_ok",
            MessageKind::KillOk => "kill_ok",
        }
    }
}

/// One record as it travels over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: i64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            kind: kind.raw(),
            payload,
        }
    }

    /// A frame whose payload region is all zeros.
    pub fn empty(kind: MessageKind, payload_size: usize) -> Self {
        Self::new(kind, vec![0; payload_size])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init,
    ReadMemory,
    WriteMemory(Vec<u8>),
    Step,
    Kill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    InitOk,
    InitFailed,
    ReadMemoryOk(Vec<u8>),
    WriteMemoryOk,
    StepOk(Vec<u8>),
    KillOk,
}

impl Command {
    pub fn kind(&self) -> MessageKind {
        match self {
            Command::Init => MessageKind::Init,
            Command::ReadMemory => MessageKind::ReadData,
            Command::WriteMemory(_) => MessageKind::WriteData,
            Command::Step => MessageKind::Step,
            Command::Kill => MessageKind::Kill,
        }
    }

    /// Decode a received frame. A WriteMemory payload longer than
    /// `data_size` is truncated; a shorter one is rejected.
    pub fn decode(frame: &Frame, data_size: usize) -> Result<Self, DecodeError> {
        let kind = MessageKind::from_raw(frame.kind).ok_or(DecodeError::UnknownKind(frame.kind))?;
        match kind {
            MessageKind::None => Err(DecodeError::NoneKind),
            MessageKind::Init => Ok(Command::Init),
            MessageKind::ReadData => Ok(Command::ReadMemory),
            MessageKind::WriteData => {
                if frame.payload.len() < data_size {
                    return Err(DecodeError::ShortPayload {
                        expected: data_size,
                        actual: frame.payload.len(),
                    });
                }
                Ok(Command::WriteMemory(frame.payload[..data_size].to_vec()))
            }
            MessageKind::Step => Ok(Command::Step),
            MessageKind::Kill => Ok(Command::Kill),
            MessageKind::InitOk
            | MessageKind::InitFailed
            | MessageKind::ReadDataOk
            | MessageKind::WriteDataOk
            | MessageKind::StepOk
            | MessageKind::KillOk => Err(DecodeError::UnexpectedResponse(kind)),
        }
    }

    pub fn encode(&self, data_size: usize) -> Frame {
        match self {
            Command::WriteMemory(block) => Frame::new(self.kind(), fixed_block(block, data_size)),
            _ => Frame::empty(self.kind(), data_size),
        }
    }
}

impl Response {
    pub fn kind(&self) -> MessageKind {
        match self {
            Response::InitOk => MessageKind::InitOk,
            Response::InitFailed => MessageKind::InitFailed,
            Response::ReadMemoryOk(_) => MessageKind::ReadDataOk,
            Response::WriteMemoryOk => MessageKind::WriteDataOk,
            Response::StepOk(_) => MessageKind::StepOk,
            Response::KillOk => MessageKind::KillOk,
        }
    }

    pub fn encode(&self, data_size: usize) -> Frame {
        match self {
            Response::ReadMemoryOk(block) | Response::StepOk(block) => {
                Frame::new(self.kind(), fixed_block(block, data_size))
            }
            _ => Frame::empty(self.kind(), data_size),
        }
    }

    pub fn decode(frame: &Frame, data_size: usize) -> Result<Self, DecodeError> {
        let kind = MessageKind::from_raw(frame.kind).ok_or(DecodeError::UnknownKind(frame.kind))?;
        let block = || -> Result<Vec<u8>, DecodeError> {
            if frame.payload.len() < data_size {
                return Err(DecodeError::ShortPayload {
                    expected: data_size,
                    actual: frame.payload.len(),
                });
            }
            Ok(frame.payload[..data_size].to_vec())
        };
        match kind {
            MessageKind::None => Err(DecodeError::NoneKind),
            MessageKind::InitOk => Ok(Response::InitOk),
            MessageKind::InitFailed => Ok(Response::InitFailed),
            MessageKind::ReadDataOk => Ok(Response::ReadMemoryOk(block()?)),
            MessageKind::WriteDataOk => Ok(Response::WriteMemoryOk),
            MessageKind::StepOk => Ok(Response::StepOk(block()?)),
            MessageKind::KillOk => Ok(Response::KillOk),
            MessageKind::Init
            | MessageKind::ReadData
            | MessageKind::WriteData
            | MessageKind::Step
            | MessageKind::Kill => Err(DecodeError::UnexpectedCommand(kind)),
        }
    }
}

// Pad or cut to exactly `size` bytes.
fn fixed_block(block: &[u8], size: usize) -> Vec<u8> {
    let mut out = vec![0; size];
    let len = block.len().min(size);
    out[..len].copy_from_slice(&block[..len]);
    out
}
