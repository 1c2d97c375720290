//! Domain types for trackman.
//!
//! This module contains the declarative and value types:
//! - Workflow: the loaded document and its steps
//! - Event: lifecycle transitions emitted by spinners
//! - duration: Go-style duration strings

pub mod duration;
mod event;
mod workflow;

pub use event::{Event, EventKind, Payload};
pub use workflow::{Probe, Step, Workflow, WorkflowOptions};
