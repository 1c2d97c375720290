//! Lifecycle events emitted by a spinner while it runs one step.
//!
//! Every [`Spinner`](crate::services::Spinner) run produces, in order:
//! - `RunRequested`
//! - `RunStarted` (only when the child was launched)
//! - exactly one terminal event: `RunSuccess`, `RunFail`, `RunTimeout`,
//!   `RunError` or `RunWaitError`
//!
//! The payload is tied to the kind through the constructors below, so a
//! `RunFail` always carries the exit status and a `RunTimeout` the budget.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

/// Classification of spinner lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Run was invoked; nothing launched yet
    RunRequested,
    /// Child process launched
    RunStarted,
    /// Child exited with status zero
    RunSuccess,
    /// Child exited non-zero (or was killed by a signal)
    RunFail,
    /// Deadline elapsed before the child exited
    RunTimeout,
    /// Child could not be launched
    RunError,
    /// Waiting on the child failed without an exit status
    RunWaitError,
}

impl EventKind {
    /// Whether this kind ends a run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RunRequested | Self::RunStarted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunRequested => "RunRequested",
            Self::RunStarted => "RunStarted",
            Self::RunSuccess => "RunSuccess",
            Self::RunFail => "RunFail",
            Self::RunTimeout => "RunTimeout",
            Self::RunError => "RunError",
            Self::RunWaitError => "RunWaitError",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific data attached to an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    /// Exit status of a failed child (`RunFail`)
    Exit(ExitStatus),
    /// Budget that elapsed (`RunTimeout`)
    Timeout(Duration),
    /// Launch or wait failure (`RunError`, `RunWaitError`)
    Error(String),
}

/// Immutable record of one lifecycle transition
#[derive(Debug, Clone)]
pub struct Event {
    spinner_id: String,
    spinner_name: String,
    kind: EventKind,
    at: DateTime<Utc>,
    payload: Payload,
}

impl Event {
    fn new(spinner_id: &str, spinner_name: &str, kind: EventKind, payload: Payload) -> Self {
        Self {
            spinner_id: spinner_id.to_string(),
            spinner_name: spinner_name.to_string(),
            kind,
            at: Utc::now(),
            payload,
        }
    }

    pub fn requested(spinner_id: &str, spinner_name: &str) -> Self {
        Self::new(spinner_id, spinner_name, EventKind::RunRequested, Payload::None)
    }

    pub fn started(spinner_id: &str, spinner_name: &str) -> Self {
        Self::new(spinner_id, spinner_name, EventKind::RunStarted, Payload::None)
    }

    pub fn success(spinner_id: &str, spinner_name: &str) -> Self {
        Self::new(spinner_id, spinner_name, EventKind::RunSuccess, Payload::None)
    }

    pub fn fail(spinner_id: &str, spinner_name: &str, status: ExitStatus) -> Self {
        Self::new(spinner_id, spinner_name, EventKind::RunFail, Payload::Exit(status))
    }

    pub fn timeout(spinner_id: &str, spinner_name: &str, budget: Duration) -> Self {
        Self::new(spinner_id, spinner_name, EventKind::RunTimeout, Payload::Timeout(budget))
    }

    pub fn error(spinner_id: &str, spinner_name: &str, reason: impl Into<String>) -> Self {
        Self::new(
            spinner_id,
            spinner_name,
            EventKind::RunError,
            Payload::Error(reason.into()),
        )
    }

    pub fn wait_error(spinner_id: &str, spinner_name: &str, reason: impl Into<String>) -> Self {
        Self::new(
            spinner_id,
            spinner_name,
            EventKind::RunWaitError,
            Payload::Error(reason.into()),
        )
    }

    /// Override the timestamp (used for deterministic rendering)
    pub fn at_time(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Identity of the producing spinner
    pub fn spinner_id(&self) -> &str {
        &self.spinner_id
    }

    pub fn spinner_name(&self) -> &str {
        &self.spinner_name
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.spinner_name,
            self.kind
        )?;
        match &self.payload {
            Payload::None => Ok(()),
            Payload::Exit(status) => write!(f, " ({})", status),
            Payload::Timeout(budget) => write!(f, " (after {:?})", budget),
            Payload::Error(reason) => write!(f, " ({})", reason),
        }
    }
}
