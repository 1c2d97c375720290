//! Line-buffered adapter from a child's stdio to the structured log.
//!
//! Each completed line becomes one `tracing` record at the writer's level,
//! tagged with the spinner identity, the step name and the stream label.
//! A trailing partial line is emitted by [`LogWriter::finish`] (or on drop).

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::Level;

/// Which child stream a writer is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared handle to a writer used for human-readable output
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Destination pair for raw child output
#[derive(Clone)]
pub struct SpinnerSink {
    stdout: SharedWriter,
    stderr: SharedWriter,
}

impl SpinnerSink {
    pub fn new(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self {
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
        }
    }

    /// The parent's own stdout and stderr
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn writer(&self, stream: Stream) -> SharedWriter {
        match stream {
            Stream::Stdout => Arc::clone(&self.stdout),
            Stream::Stderr => Arc::clone(&self.stderr),
        }
    }
}

/// Byte sink that emits one log record per line
pub struct LogWriter {
    spinner: String,
    step: String,
    stream: Stream,
    level: Level,
    buffer: Vec<u8>,
    mirror: Option<SharedWriter>,
}

impl LogWriter {
    pub fn new(spinner: &str, step: &str, stream: Stream, level: Level) -> Self {
        Self {
            spinner: spinner.to_string(),
            step: step.to_string(),
            stream,
            level,
            buffer: Vec::new(),
            mirror: None,
        }
    }

    /// Also copy every line to `mirror`
    pub fn with_mirror(mut self, mirror: Option<SharedWriter>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Emit whatever partial line is still buffered
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.emit(&line);
        }
    }

    fn emit(&self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);

        if let Some(mirror) = &self.mirror {
            if let Ok(mut out) = mirror.lock() {
                let _ = writeln!(out, "{}", line);
            }
        }

        let spinner = self.spinner.as_str();
        let step = self.step.as_str();
        let stream = self.stream.label();
        if self.level == Level::ERROR {
            tracing::error!(spinner, step, stream, "{}", line);
        } else if self.level == Level::WARN {
            tracing::warn!(spinner, step, stream, "{}", line);
        } else if self.level == Level::INFO {
            tracing::info!(spinner, step, stream, "{}", line);
        } else if self.level == Level::DEBUG {
            tracing::debug!(spinner, step, stream, "{}", line);
        } else {
            tracing::trace!(spinner, step, stream, "{}", line);
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.emit(&line[..pos]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Copy a child stream into `writer` until EOF
pub(crate) async fn drain<R>(mut reader: R, mut writer: LogWriter)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = writer.write_all(&chunk[..n]);
            }
            Err(e) => {
                tracing::warn!(
                    spinner = %writer.spinner,
                    stream = %writer.stream,
                    "Failed to read child output: {}",
                    e
                );
                break;
            }
        }
    }
    writer.finish();
}
