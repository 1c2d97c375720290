//! # Event notifiers
//!
//! A [`Notifier`] accepts one [`Event`] at a time. Spinners push events
//! synchronously, in emission order; a failing notifier is logged by the
//! caller and never changes the outcome of a run.
//!
//! ## Example
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use trackman::domain::{Event, EventKind};
//! use trackman::services::{FnNotifier, Notifier};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let notifier = FnNotifier::new("collect", move |ev: &Event| {
//!     sink.lock().unwrap().push(ev.kind());
//!     Ok(())
//! });
//! # tokio_test::block_on(async {
//! notifier.notify(&Event::requested("id", "build")).await.unwrap();
//! # });
//! assert_eq!(seen.lock().unwrap().as_slice(), &[EventKind::RunRequested]);
//! ```

use crate::domain::Event;
use crate::error::NotifyError;
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Sink for spinner lifecycle events
///
/// Implementations that hand events to background consumers must be
/// internally thread-safe; `notify` may be called from any task.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver a single event
    async fn notify(&self, event: &Event) -> Result<(), NotifyError>;

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Bring the transport up
    async fn start(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    /// Quiesce the transport
    async fn stop(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    /// Release resources
    async fn close(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Adapts a closure into a [`Notifier`]
pub struct FnNotifier<F> {
    name: String,
    func: F,
}

impl<F> FnNotifier<F>
where
    F: Fn(&Event) -> Result<(), NotifyError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Notifier for FnNotifier<F>
where
    F: Fn(&Event) -> Result<(), NotifyError> + Send + Sync + 'static,
{
    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        (self.func)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Prints each event as a single line
pub struct ConsoleNotifier {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleNotifier {
    /// Print to standard output
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Shared handle, ready to install as a workflow notifier
    pub fn shared() -> Arc<dyn Notifier> {
        Arc::new(Self::new())
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| NotifyError::failed("console", "output lock poisoned"))?;
        writeln!(out, "{}", event)?;
        out.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_console_prints_one_line_per_event() {
        let buffer = Buffer::default();
        let console = ConsoleNotifier::with_writer(Box::new(buffer.clone()));
        console.notify(&Event::requested("id", "build")).await.unwrap();
        console.notify(&Event::success("id", "build")).await.unwrap();

        let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[build] RunRequested"));
        assert!(lines[1].ends_with("[build] RunSuccess"));
    }

    #[tokio::test]
    async fn test_fn_notifier_propagates_errors() {
        let notifier = FnNotifier::new("broken", |ev: &Event| {
            if ev.kind() == EventKind::RunStarted {
                Err(NotifyError::failed("broken", "nope"))
            } else {
                Ok(())
            }
        });
        assert_eq!(notifier.name(), "broken");
        assert!(notifier.notify(&Event::requested("id", "x")).await.is_ok());
        assert!(notifier.notify(&Event::started("id", "x")).await.is_err());
    }
}
