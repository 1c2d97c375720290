//! trackman: workflow runner for sequences of shell steps
//!
//! Loads a declarative workflow document, runs each step as a child process
//! under a time budget, streams its output into the structured log and
//! reports lifecycle events to pluggable notifiers.

pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod signals;

pub use config::RunnerConfig;
pub use domain::{Event, EventKind, Step, Workflow, WorkflowOptions};
pub use error::{ConfigError, Result, RunnerError};
pub use services::{NotificationManager, Notifier, Spinner, SpinnerOptions};
