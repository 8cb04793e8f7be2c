use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::MessageKind;

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("failed to read firmware {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("firmware segment at offset {offset:#06x} ({len} bytes) exceeds {flash_size}-byte flash")]
    OutOfRange {
        offset: usize,
        len: usize,
        flash_size: usize,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to resize {path} to {size} bytes: {source}")]
    Resize {
        path: PathBuf,
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("short read from {path}: expected {expected} bytes, got {actual}")]
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("short write to {path}: expected {expected} bytes, wrote {actual}")]
    ShortWrite {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("firmware image does not exist: {}", .0.display())]
    FirmwareNotFound(PathBuf),
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("data memory is {expected} bytes, got {actual}")]
    DataSize { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to attach to message queue {key}: {source}")]
    Open {
        key: i32,
        #[source]
        source: io::Error,
    },
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("channel full")]
    Full,
    #[error("peer disconnected")]
    Disconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message kind is NONE")]
    NoneKind,
    #[error("unknown message kind {0}")]
    UnknownKind(i64),
    #[error("received {0:?} where a command was expected")]
    UnexpectedResponse(MessageKind),
    #[error("received {0:?} where a response was expected")]
    UnexpectedCommand(MessageKind),
    #[error("payload too short: expected {expected} bytes, got {actual}")]
    ShortPayload { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("expected {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        expected: MessageKind,
        actual: MessageKind,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("step budget must be at least 1")]
    ZeroStepBudget,
}
