use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

/// Host side of the device UART. Bytes the firmware transmits are written
/// to the sink as-is; completed lines also go to the log.
pub struct ConsoleBridge {
    sink: Box<dyn Write + Send>,
    line: Vec<u8>,
    running: bool,
}

/// Shared buffer behind [`ConsoleBridge::capture`].
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|buf| buf.clone()).unwrap_or_default()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "console buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ConsoleBridge {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink,
            line: Vec::new(),
            running: false,
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Append to a file, FIFO or tty.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Bridge that drops everything.
    pub fn discard() -> Self {
        Self::new(Box::new(io::sink()))
    }

    /// In-memory bridge plus a handle to read back what it forwarded.
    pub fn capture() -> (Self, CapturedOutput) {
        let output = CapturedOutput::default();
        (Self::new(Box::new(output.clone())), output)
    }

    pub fn start(&mut self) {
        self.running = true;
        info!("console bridge started");
    }

    pub fn forward(&mut self, bytes: &[u8]) {
        if !self.running {
            return;
        }
        if let Err(err) = self.sink.write_all(bytes).and_then(|_| self.sink.flush()) {
            warn!(error = %err, "console write failed");
        }
        for &byte in bytes {
            if byte == b'\n' {
                debug!(target: "console", "{}", String::from_utf8_lossy(&self.line));
                self.line.clear();
            } else {
                self.line.push(byte);
            }
        }
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if !self.line.is_empty() {
            debug!(target: "console", "{}", String::from_utf8_lossy(&self.line));
            self.line.clear();
        }
        self.sink.flush().ok();
        self.running = false;
        info!("console bridge stopped");
    }
}
