//! Workflow document: version, metadata and an ordered list of steps.
//!
//! Documents are YAML. Loading attaches the workflow-level options
//! (notifier, default timeout, output sink) and links every step back to
//! them, so a spinner built from a step can resolve the workflow defaults.

use super::duration;
use crate::error::{ConfigError, ConfigResult, Result};
use crate::services::{ConsoleNotifier, NotificationManager, Notifier, SpinnerSink};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Secondary command of a step, run as `<name>.probe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// One unit of work in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(
        default,
        with = "duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub stop_on_fail: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Probe>,

    /// Link to the enclosing workflow's options, installed at load time
    #[serde(skip)]
    workflow: Option<Arc<WorkflowOptions>>,
}

impl Step {
    /// Create an unlinked step (link it by loading it into a workflow)
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            workdir: None,
            timeout: None,
            stop_on_fail: false,
            probe: None,
            workflow: None,
        }
    }

    /// Options of the workflow this step belongs to
    pub fn workflow_options(&self) -> Option<&WorkflowOptions> {
        self.workflow.as_deref()
    }

    pub fn is_linked(&self) -> bool {
        self.workflow.is_some()
    }

    /// Effective timeout: the step's own, else the workflow default
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout
            .or_else(|| self.workflow_options().map(WorkflowOptions::timeout))
    }
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.command == other.command
            && self.args == other.args
            && self.workdir == other.workdir
            && self.timeout == other.timeout
            && self.stop_on_fail == other.stop_on_fail
            && self.probe == other.probe
    }
}

/// Workflow-level options shared by every step
#[derive(Clone)]
pub struct WorkflowOptions {
    notifier: Option<Arc<dyn Notifier>>,
    timeout: Duration,
    sink: Option<SpinnerSink>,
}

impl WorkflowOptions {
    /// Default step budget when neither the step nor the caller sets one
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

    pub fn new() -> Self {
        Self {
            notifier: None,
            timeout: Self::DEFAULT_TIMEOUT,
            sink: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Deliver events through a notification manager
    pub fn with_manager(self, manager: Arc<NotificationManager>) -> Self {
        self.with_notifier(manager)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mirror raw child output to a human-readable sink
    pub fn with_sink(mut self, sink: SpinnerSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Event notifier; a stdout line printer when none was set
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        match &self.notifier {
            Some(notifier) => Arc::clone(notifier),
            None => Arc::new(ConsoleNotifier::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn sink(&self) -> Option<&SpinnerSink> {
        self.sink.as_ref()
    }

    /// Fill in the default notifier and check the default timeout
    fn resolve(mut self) -> ConfigResult<Self> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("workflow default".to_string()));
        }
        if self.notifier.is_none() {
            self.notifier = Some(Arc::new(ConsoleNotifier::new()));
        }
        Ok(self)
    }
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkflowOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowOptions")
            .field("notifier", &self.notifier.as_ref().map(|n| n.name().to_string()))
            .field("timeout", &self.timeout)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// A loaded workflow document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(skip)]
    options: Option<Arc<WorkflowOptions>>,
}

impl Workflow {
    /// Load a workflow from a YAML buffer
    pub fn from_slice(buffer: &[u8], options: WorkflowOptions) -> Result<Self> {
        let mut workflow: Workflow = serde_yaml::from_slice(buffer)?;
        workflow.attach(options)?;
        Ok(workflow)
    }

    /// Load a workflow from a byte stream
    pub fn from_reader<R: Read>(mut reader: R, options: WorkflowOptions) -> Result<Self> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Self::from_slice(&buffer, options)
    }

    /// Load a workflow file
    pub fn from_path(path: impl AsRef<Path>, options: WorkflowOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }
        let buffer = std::fs::read(path)?;
        Self::from_slice(&buffer, options)
    }

    /// Validate the document, install the options and link every step
    fn attach(&mut self, options: WorkflowOptions) -> ConfigResult<()> {
        self.validate()?;
        let options = Arc::new(options.resolve()?);
        for step in &mut self.steps {
            step.workflow = Some(Arc::clone(&options));
        }
        self.options = Some(options);
        Ok(())
    }

    /// Check step names, commands and timeouts
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("step #{} has no name", idx + 1)));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ConfigError::DuplicateStep(step.name.clone()));
            }
            if step.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "step {} has no command",
                    step.name
                )));
            }
            if step.timeout.is_some_and(|t| t.is_zero()) {
                return Err(ConfigError::InvalidTimeout(step.name.clone()));
            }
            if let Some(probe) = &step.probe {
                if probe.command.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "probe of step {} has no command",
                        step.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Options installed by the loader
    pub fn options(&self) -> Option<&WorkflowOptions> {
        self.options.as_deref()
    }

    /// Look up a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Serialize the declarative part of the document
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl PartialEq for Workflow {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.metadata == other.metadata
            && self.steps == other.steps
    }
}
