//! Message channels between the client and the command loop.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use crate::error::TransportError;
use crate::protocol::Frame;

/// Receiving end: blocks until a record arrives or the transport fails.
pub trait Inbound {
    fn recv(&mut self) -> Result<Frame, TransportError>;
}

/// Sending end.
pub trait Outbound {
    /// Block until the record is queued.
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Queue the record or fail immediately.
    fn try_send(&mut self, frame: &Frame) -> Result<(), TransportError>;
}

/// Bounded in-process channel with the same semantics as a message queue.
pub fn channel(capacity: usize) -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (ChannelSender { tx }, ChannelReceiver { rx })
}

#[derive(Clone)]
pub struct ChannelSender {
    tx: SyncSender<Frame>,
}

pub struct ChannelReceiver {
    rx: Receiver<Frame>,
}

impl ChannelReceiver {
    pub fn try_recv(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl Inbound for ChannelReceiver {
    fn recv(&mut self) -> Result<Frame, TransportError> {
        self.rx.recv().map_err(|_| TransportError::Disconnected)
    }
}

impl Outbound for ChannelSender {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame.clone())
            .map_err(|_| TransportError::Disconnected)
    }

    fn try_send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.tx.try_send(frame.clone()).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Disconnected(_) => TransportError::Disconnected,
        })
    }
}

#[cfg(target_os = "linux")]
pub use sysv::MessageQueue;

#[cfg(target_os = "linux")]
mod sysv {
    use std::io;
    use std::mem::size_of;

    use libc::{c_int, c_long, c_void, key_t};
    use tracing::debug;

    use super::{Inbound, Outbound};
    use crate::error::TransportError;
    use crate::protocol::Frame;

    /// Handle to a pre-existing System V message queue. Records are a
    /// `long` type tag followed by the payload, as `msgsnd(2)` expects.
    #[derive(Debug)]
    pub struct MessageQueue {
        id: c_int,
        key: key_t,
        payload_size: usize,
    }

    impl MessageQueue {
        /// Attach to the queue for `key`; never creates it.
        pub fn open(key: key_t, payload_size: usize) -> Result<Self, TransportError> {
            // SAFETY: msgget takes no pointers.
            let id = unsafe { libc::msgget(key, 0o666) };
            if id == -1 {
                return Err(TransportError::Open {
                    key,
                    source: io::Error::last_os_error(),
                });
            }
            debug!(key, id, "attached to message queue");
            Ok(Self {
                id,
                key,
                payload_size,
            })
        }

        #[cfg(test)]
        pub(crate) fn from_id(id: c_int, payload_size: usize) -> Self {
            Self {
                id,
                key: libc::IPC_PRIVATE,
                payload_size,
            }
        }

        /// Remove the queue from the system.
        pub fn remove(self) -> io::Result<()> {
            // SAFETY: IPC_RMID ignores the buffer argument.
            let rc = unsafe { libc::msgctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
            if rc == -1 {
                return Err(io::Error::last_os_error());
            }
            debug!(key = self.key, id = self.id, "removed message queue");
            Ok(())
        }

        fn send_with(&self, frame: &Frame, flags: c_int) -> Result<(), TransportError> {
            let mut buf = record_buffer(self.payload_size);
            buf[0] = frame.kind as c_long;
            let len = frame.payload.len().min(self.payload_size);
            record_bytes(&mut buf)[size_of::<c_long>()..size_of::<c_long>() + len]
                .copy_from_slice(&frame.payload[..len]);

            loop {
                // SAFETY: buf holds a c_long tag followed by payload_size bytes.
                let rc = unsafe {
                    libc::msgsnd(self.id, buf.as_ptr() as *const c_void, self.payload_size, flags)
                };
                if rc == 0 {
                    return Ok(());
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::EAGAIN) => return Err(TransportError::Full),
                    _ => return Err(TransportError::Send(err)),
                }
            }
        }
    }

    impl Inbound for MessageQueue {
        fn recv(&mut self) -> Result<Frame, TransportError> {
            // Room for clients that send their whole record struct as the text.
            let capacity = self.payload_size + size_of::<c_long>();
            let mut buf = record_buffer(capacity);
            loop {
                // SAFETY: buf holds a c_long tag followed by capacity bytes.
                let received = unsafe {
                    libc::msgrcv(
                        self.id,
                        buf.as_mut_ptr() as *mut c_void,
                        capacity,
                        0,
                        libc::MSG_NOERROR,
                    )
                };
                if received >= 0 {
                    let len = received as usize;
                    let kind = buf[0] as i64;
                    let payload =
                        record_bytes(&mut buf)[size_of::<c_long>()..size_of::<c_long>() + len].to_vec();
                    return Ok(Frame { kind, payload });
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(TransportError::Receive(err));
            }
        }
    }

    impl Outbound for MessageQueue {
        fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
            self.send_with(frame, 0)
        }

        fn try_send(&mut self, frame: &Frame) -> Result<(), TransportError> {
            self.send_with(frame, libc::IPC_NOWAIT)
        }
    }

    // c_long-aligned storage for a tag plus `payload` bytes.
    fn record_buffer(payload: usize) -> Vec<c_long> {
        let word = size_of::<c_long>();
        vec![0; 1 + (payload + word - 1) / word]
    }

    fn record_bytes(buf: &mut [c_long]) -> &mut [u8] {
        let len = buf.len() * size_of::<c_long>();
        // SAFETY: u8 has no alignment or validity requirements and the
        // slice covers exactly the same allocation.
        unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut u8, len) }
    }
}
