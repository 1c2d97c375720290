//! Workflow sequencer: runs the steps of a loaded workflow strictly in order.
//!
//! A failing step either aborts the run (`stopOnFail: true`) or is logged
//! and skipped. Cancellation is checked at every step boundary; an in-flight
//! step terminates through its own spinner.

use super::{Spinner, SpinnerOptions};
use crate::domain::{Workflow, WorkflowOptions};
use crate::error::{ConfigError, Result, RunnerError};
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::subscriber::NoSubscriber;
use tracing::Instrument;

impl Workflow {
    /// Run every step in declaration order
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        // Span is created inside the future so it binds to the fallback logger
        let run = async {
            let span = tracing::info_span!("workflow", version = %self.version);
            self.run_steps(cancel).instrument(span).await
        };
        if has_ambient_logger() {
            run.await
        } else {
            run.with_subscriber(default_logger()).await
        }
    }

    /// Run the probe of the named step
    pub async fn run_probe(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let options = self.loaded_options()?;
        let step = self
            .step(name)
            .ok_or_else(|| ConfigError::StepNotFound(name.to_string()))?;
        let spinner = Spinner::for_probe(step, SpinnerOptions::from_workflow(options))?;
        let run = spinner.run(cancel);
        if has_ambient_logger() {
            run.await
        } else {
            run.with_subscriber(default_logger()).await
        }
    }

    async fn run_steps(&self, cancel: &CancellationToken) -> Result<()> {
        let options = SpinnerOptions::from_workflow(self.loaded_options()?);
        tracing::info!(steps = self.steps.len(), "Running workflow");

        for step in &self.steps {
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled {
                    step: step.name.clone(),
                });
            }

            let spinner = Spinner::for_step(step, options.clone())?;
            match spinner.run(cancel).await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() || step.stop_on_fail => {
                    tracing::error!(step = %step.name, "{}", err);
                    return Err(err);
                }
                Err(err) => {
                    tracing::error!(step = %step.name, "{}; continuing", err);
                }
            }
        }

        tracing::info!("Workflow finished");
        Ok(())
    }

    fn loaded_options(&self) -> Result<&WorkflowOptions> {
        self.options()
            .ok_or_else(|| ConfigError::Invalid("workflow was not loaded with options".to_string()).into())
    }
}

/// Whether the caller installed a subscriber (global or scoped)
fn has_ambient_logger() -> bool {
    tracing::dispatcher::get_default(|dispatch| !dispatch.is::<NoSubscriber>())
}

fn default_logger() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Event, EventKind};
    use crate::services::FnNotifier;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<Event>>>, WorkflowOptions) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = FnNotifier::new("recorder", move |ev: &Event| {
            sink.lock().unwrap().push(ev.clone());
            Ok(())
        });
        let options = WorkflowOptions::new()
            .with_notifier(Arc::new(notifier))
            .with_timeout(Duration::from_secs(30));
        (seen, options)
    }

    fn terminal(events: &Arc<Mutex<Vec<Event>>>) -> Vec<(String, EventKind)> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|ev| ev.kind().is_terminal())
            .map(|ev| (ev.spinner_name().to_string(), ev.kind()))
            .collect()
    }

    #[tokio::test]
    async fn test_unloaded_workflow_is_config_error() {
        let wf: Workflow = serde_yaml::from_str("steps:\n  - {name: a, command: 'true'}\n").unwrap();
        let err = wf.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Config(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let (events, options) = recorder();
        let doc = "steps:\n  - {name: one, command: 'true'}\n  - {name: two, command: 'true'}\n  - {name: three, command: 'true'}\n";
        let wf = Workflow::from_slice(doc.as_bytes(), options).unwrap();
        wf.run(&CancellationToken::new()).await.unwrap();

        let names: Vec<String> = terminal(&events).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
        assert_eq!(events.lock().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_construction_failure_aborts() {
        let (events, options) = recorder();
        let doc = "steps:\n  - {name: bad, command: echo, args: ['{{nope}}']}\n  - {name: after, command: 'true'}\n";
        let wf = Workflow::from_slice(doc.as_bytes(), options).unwrap();
        let err = wf.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Template { .. }));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (events, options) = recorder();
        let wf = Workflow::from_slice(b"steps:\n  - {name: a, command: 'true'}\n", options).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wf.run(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_sequence_even_without_stop_on_fail() {
        let (events, options) = recorder();
        let doc = "steps:\n  - {name: long, command: sleep, args: ['10']}\n  - {name: after, command: 'true'}\n";
        let wf = Workflow::from_slice(doc.as_bytes(), options).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = wf.run(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(terminal(&events).iter().all(|(name, _)| name == "long"));
    }

    #[tokio::test]
    async fn test_run_probe() {
        let (events, options) = recorder();
        let doc = "steps:\n  - {name: db, command: 'false', probe: {command: 'true'}}\n";
        let wf = Workflow::from_slice(doc.as_bytes(), options).unwrap();
        wf.run_probe("db", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            terminal(&events),
            vec![("db.probe".to_string(), EventKind::RunSuccess)]
        );

        let err = wf.run_probe("nope", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Config(ConfigError::StepNotFound(_))));
    }
}
