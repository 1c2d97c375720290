//! Execution services for trackman.
//!
//! This module contains:
//! - Spinner: runs one step as a child process under a deadline
//! - Sequencer: drives the steps of a workflow in order
//! - LogWriter: turns child output into structured log records
//! - Notifier / NotificationManager: event delivery and fan-out
//! - expand: environment expansion and argument templating

pub mod expand;
pub mod log_writer;
mod manager;
mod notifier;
mod sequencer;
mod spinner;

pub use log_writer::{LogWriter, SpinnerSink, Stream};
pub use manager::NotificationManager;
pub use notifier::{ConsoleNotifier, FnNotifier, Notifier};
pub use spinner::{Spinner, SpinnerOptions};
