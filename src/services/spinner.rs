//! Spinner: runs one step (or its probe) as a child process under a deadline.
//!
//! Construction resolves everything up front: environment expansion of the
//! command, arguments and working directory, the effective timeout, then
//! argument templating. [`Spinner::run`] launches the child once, streams its
//! output through [`LogWriter`]s and pushes lifecycle events:
//!
//! ```text
//! RunRequested ─► spawn ─┬─ failed ──────────────────────────► RunError
//!                        └─ RunStarted ─► wait ─┬─ exit 0 ───► RunSuccess
//!                                               ├─ exit != 0 ► RunFail
//!                                               ├─ deadline ─► RunTimeout
//!                                               └─ io error ─► RunWaitError
//! ```

use super::expand::{expand_env, ArgRenderer};
use super::log_writer::{drain, LogWriter, SpinnerSink, Stream};
use super::Notifier;
use crate::domain::{Event, Step, WorkflowOptions};
use crate::error::{ConfigError, Result, RunnerError};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Instrument, Level};
use uuid::Uuid;

/// How long to wait for stdio drainers once the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Per-run options shared by every spinner of a workflow
#[derive(Clone)]
pub struct SpinnerOptions {
    pub notifier: Arc<dyn Notifier>,
    pub sink: Option<SpinnerSink>,
}

impl SpinnerOptions {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: SpinnerSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Derive spinner options from the workflow's options
    pub fn from_workflow(options: &WorkflowOptions) -> Self {
        Self {
            notifier: options.notifier(),
            sink: options.sink().cloned(),
        }
    }
}

/// How waiting on the child ended
enum Outcome {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    /// Status of the killed child
    Cancelled(io::Result<ExitStatus>),
}

/// Single-use executor bound to one step
pub struct Spinner<'a> {
    uuid: String,
    name: String,
    cmd: String,
    args: Vec<String>,
    timeout: Duration,
    workdir: Option<PathBuf>,
    step: &'a Step,
    options: SpinnerOptions,
}

impl<'a> Spinner<'a> {
    /// Spinner for the step's primary command
    pub fn for_step(step: &'a Step, options: SpinnerOptions) -> Result<Self> {
        Self::prepare(
            step,
            step.name.clone(),
            &step.command,
            &step.args,
            options,
        )
    }

    /// Spinner for the step's probe, named `<name>.probe`
    pub fn for_probe(step: &'a Step, options: SpinnerOptions) -> Result<Self> {
        let probe = step
            .probe
            .as_ref()
            .ok_or_else(|| ConfigError::MissingProbe(step.name.clone()))?;
        Self::prepare(
            step,
            format!("{}.probe", step.name),
            &probe.command,
            &probe.args,
            options,
        )
    }

    fn prepare(
        step: &'a Step,
        name: String,
        command: &str,
        args: &[String],
        options: SpinnerOptions,
    ) -> Result<Self> {
        let workflow = step
            .workflow_options()
            .ok_or_else(|| ConfigError::UnlinkedStep(step.name.clone()))?;

        let cmd = expand_env(command);
        let args: Vec<String> = args.iter().map(|arg| expand_env(arg)).collect();
        let workdir = step
            .workdir
            .as_deref()
            .map(expand_env)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let timeout = step.timeout.unwrap_or_else(|| workflow.timeout());
        if timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(name).into());
        }

        let args = ArgRenderer::new(step, timeout).render_all(&args)?;

        Ok(Self {
            uuid: Uuid::new_v4().to_string(),
            name,
            cmd,
            args,
            timeout,
            workdir,
            step,
            options,
        })
    }

    /// Unique identity of this spinner
    pub fn id(&self) -> &str {
        &self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.cmd
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Working directory; `None` inherits the parent's
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// The step this spinner was built from
    pub fn step(&self) -> &Step {
        self.step
    }

    /// Run the prepared command. A spinner is spent by its run; build a
    /// fresh one from the step to run it again.
    pub async fn run(self, cancel: &CancellationToken) -> Result<()> {
        let span = tracing::info_span!("spinner", id = %self.uuid, name = %self.name);
        self.execute(cancel).instrument(span).await
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<()> {
        self.push(Event::requested(&self.uuid, &self.name)).await;

        // The budget covers launch and the RunStarted delivery
        let deadline = Instant::now() + self.timeout;
        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(command = %self.cmd, "Failed to start: {}", e);
                self.push(Event::error(&self.uuid, &self.name, e.to_string()))
                    .await;
                return Err(RunnerError::Start {
                    step: self.name.clone(),
                    source: e,
                });
            }
        };
        let drainers = self.attach_output(&mut child);
        tracing::debug!(command = %self.cmd, args = ?self.args, pid = ?child.id(), "Started");

        let ((), outcome) = tokio::join!(
            self.push(Event::started(&self.uuid, &self.name)),
            watch(&mut child, deadline, cancel),
        );
        self.conclude(outcome, drainers).await
    }

    /// Emit the terminal event for `outcome` and map it to the run result
    async fn conclude(&self, outcome: Outcome, drainers: Vec<JoinHandle<()>>) -> Result<()> {
        join_drainers(drainers).await;
        match outcome {
            Outcome::Exited(Ok(status)) if status.success() => {
                self.push(Event::success(&self.uuid, &self.name)).await;
                Ok(())
            }
            Outcome::Exited(Ok(status)) => {
                self.push(Event::fail(&self.uuid, &self.name, status)).await;
                Err(RunnerError::Exit {
                    step: self.name.clone(),
                    status,
                })
            }
            Outcome::Exited(Err(e)) => {
                self.push(Event::wait_error(&self.uuid, &self.name, e.to_string()))
                    .await;
                Err(RunnerError::Wait {
                    step: self.name.clone(),
                    source: e,
                })
            }
            Outcome::TimedOut => {
                self.push(Event::timeout(&self.uuid, &self.name, self.timeout))
                    .await;
                Err(RunnerError::Timeout {
                    step: self.name.clone(),
                    budget: self.timeout,
                })
            }
            Outcome::Cancelled(status) => {
                match status {
                    Ok(status) => self.push(Event::fail(&self.uuid, &self.name, status)).await,
                    Err(e) => {
                        self.push(Event::wait_error(&self.uuid, &self.name, e.to_string()))
                            .await
                    }
                }
                Err(RunnerError::Cancelled {
                    step: self.name.clone(),
                })
            }
        }
    }

    fn spawn(&self) -> io::Result<Child> {
        if self.cmd.trim().is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "empty command"));
        }

        let mut command = Command::new(&self.cmd);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        command.spawn()
    }

    /// Stdout goes to the log at DEBUG, stderr at ERROR
    fn attach_output(&self, child: &mut Child) -> Vec<JoinHandle<()>> {
        let mut drainers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let writer = self.log_writer(Stream::Stdout, Level::DEBUG);
            drainers.push(tokio::spawn(
                drain(stdout, writer)
                    .in_current_span()
                    .with_current_subscriber(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            let writer = self.log_writer(Stream::Stderr, Level::ERROR);
            drainers.push(tokio::spawn(
                drain(stderr, writer)
                    .in_current_span()
                    .with_current_subscriber(),
            ));
        }
        drainers
    }

    fn log_writer(&self, stream: Stream, level: Level) -> LogWriter {
        let mirror = self.options.sink.as_ref().map(|sink| sink.writer(stream));
        LogWriter::new(&self.uuid, &self.name, stream, level).with_mirror(mirror)
    }

    /// Hand an event to the notifier; failures are logged, never surfaced
    async fn push(&self, event: Event) {
        if let Err(e) = self.options.notifier.notify(&event).await {
            tracing::warn!(
                spinner = %self.uuid,
                event = %event.kind(),
                "Notifier {} failed: {}",
                self.options.notifier.name(),
                e
            );
        }
    }
}

/// Wait for the child to exit. A child still running at the deadline or on
/// cancellation is killed and reaped here. Once the deadline has passed it
/// wins over an exit observed at the same poll.
async fn watch(child: &mut Child, deadline: Instant, cancel: &CancellationToken) -> Outcome {
    let timed_out = tokio::select! {
        biased;
        _ = tokio::time::sleep_until(deadline) => true,
        _ = cancel.cancelled() => false,
        status = child.wait() => return Outcome::Exited(status),
    };
    let status = terminate(child).await;
    if timed_out {
        Outcome::TimedOut
    } else {
        Outcome::Cancelled(status)
    }
}

/// Kill the child and reap it
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        tracing::debug!("Kill failed: {}", e);
    }
    child.wait().await
}

async fn join_drainers(drainers: Vec<JoinHandle<()>>) {
    for mut handle in drainers {
        if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
            tracing::warn!("Child output still open after exit, detaching");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, Payload, Workflow};
    use crate::error::NotifyError;
    use crate::services::FnNotifier;
    use std::io::Write;
    use std::sync::Mutex;

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

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Event>>>, SpinnerOptions) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = FnNotifier::new("recorder", move |ev: &Event| {
            sink.lock().unwrap().push(ev.clone());
            Ok(())
        });
        (seen, SpinnerOptions::new(Arc::new(notifier)))
    }

    fn kinds(events: &Arc<Mutex<Vec<Event>>>) -> Vec<EventKind> {
        events.lock().unwrap().iter().map(Event::kind).collect()
    }

    fn load(doc: &str) -> Workflow {
        let options = WorkflowOptions::new().with_timeout(Duration::from_secs(30));
        Workflow::from_slice(doc.as_bytes(), options).unwrap()
    }

    #[test]
    fn test_unlinked_step_is_config_error() {
        let step = Step::new("loose", "true");
        let (_, options) = recorder();
        let err = Spinner::for_step(&step, options).err().unwrap();
        assert!(matches!(err, RunnerError::Config(ConfigError::UnlinkedStep(_))));
    }

    #[test]
    fn test_identity_is_unique() {
        let wf = load("steps:\n  - {name: a, command: 'true'}\n");
        let (_, options) = recorder();
        let first = Spinner::for_step(&wf.steps[0], options.clone()).unwrap();
        let second = Spinner::for_step(&wf.steps[0], options).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.name(), "a");
    }

    #[test]
    fn test_timeout_resolution() {
        let wf = load(
            "steps:\n  - {name: own, command: 'true', timeout: 250ms}\n  - {name: inherit, command: 'true'}\n",
        );
        let (_, options) = recorder();
        let own = Spinner::for_step(&wf.steps[0], options.clone()).unwrap();
        let inherit = Spinner::for_step(&wf.steps[1], options).unwrap();
        assert_eq!(own.timeout(), Duration::from_millis(250));
        assert_eq!(inherit.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_expansion_then_templating() {
        std::env::set_var("TRACKMAN_SPINNER_TARGET", "prod");
        std::env::set_var("TRACKMAN_SPINNER_TOOL", "deployer");
        std::env::set_var("TRACKMAN_SPINNER_DIR", "/srv");
        let wf = load(concat!(
            "steps:\n",
            "  - name: ship\n",
            "    command: ${TRACKMAN_SPINNER_TOOL}\n",
            "    args: ['--env=$TRACKMAN_SPINNER_TARGET', '--step={{name}}', 'plain', '${TRACKMAN_SPINNER_UNSET}']\n",
            "    workdir: ${TRACKMAN_SPINNER_DIR}/app\n",
        ));
        let (_, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        assert_eq!(spinner.command(), "deployer");
        assert_eq!(spinner.args(), &["--env=prod", "--step=ship", "plain", ""]);
        assert_eq!(spinner.workdir(), Some(Path::new("/srv/app")));
    }

    #[test]
    fn test_empty_workdir_inherits() {
        let wf = load("steps:\n  - {name: a, command: 'true', workdir: '${TRACKMAN_SPINNER_NO_DIR}'}\n");
        let (_, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        assert!(spinner.workdir().is_none());
    }

    #[test]
    fn test_template_error_surfaces_from_construction() {
        let wf = load("steps:\n  - {name: a, command: echo, args: ['{{missing}}']}\n");
        let (_, options) = recorder();
        let err = Spinner::for_step(&wf.steps[0], options).err().unwrap();
        assert!(matches!(err, RunnerError::Template { .. }));
    }

    #[test]
    fn test_probe_spinner() {
        let wf = load(concat!(
            "steps:\n",
            "  - name: db\n",
            "    command: start-db\n",
            "    workdir: /var/lib\n",
            "    probe: {command: pg_isready, args: ['-t', '{{timeout}}']}\n",
            "  - {name: bare, command: 'true'}\n",
        ));
        let (_, options) = recorder();
        let probe = Spinner::for_probe(&wf.steps[0], options.clone()).unwrap();
        assert_eq!(probe.name(), "db.probe");
        assert_eq!(probe.command(), "pg_isready");
        assert_eq!(probe.args(), &["-t", "30s"]);
        assert_eq!(probe.workdir(), Some(Path::new("/var/lib")));
        assert_eq!(probe.step().name, "db");

        let err = Spinner::for_probe(&wf.steps[1], options).err().unwrap();
        assert!(matches!(err, RunnerError::Config(ConfigError::MissingProbe(_))));
    }

    #[tokio::test]
    async fn test_success_event_order() {
        let wf = load("steps:\n  - {name: ok, command: 'true'}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        let id = spinner.id().to_string();
        spinner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            kinds(&events),
            vec![EventKind::RunRequested, EventKind::RunStarted, EventKind::RunSuccess]
        );
        assert!(events.lock().unwrap().iter().all(|ev| ev.spinner_id() == id));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let wf = load("steps:\n  - {name: bad, command: sh, args: ['-c', 'exit 3']}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        let err = spinner.run(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.exit_status().and_then(|s| s.code()), Some(3));
        let events = events.lock().unwrap();
        assert_eq!(events.last().unwrap().kind(), EventKind::RunFail);
        assert!(matches!(events.last().unwrap().payload(), Payload::Exit(s) if s.code() == Some(3)));
    }

    #[tokio::test]
    async fn test_deadline_kills_child() {
        let wf = load("steps:\n  - {name: slow, command: sleep, args: ['10'], timeout: 100ms}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();

        let started = std::time::Instant::now();
        let err = spinner.run(&CancellationToken::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.is_timeout());
        assert_eq!(
            kinds(&events),
            vec![EventKind::RunRequested, EventKind::RunStarted, EventKind::RunTimeout]
        );
    }

    /// Holds up delivery of RunStarted
    struct SlowStart {
        seen: Arc<Mutex<Vec<Event>>>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Notifier for SlowStart {
        async fn notify(&self, event: &Event) -> std::result::Result<(), NotifyError> {
            if event.kind() == EventKind::RunStarted {
                tokio::time::sleep(self.delay).await;
            }
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deadline_runs_during_started_delivery() {
        let wf = load("steps:\n  - {name: slow, command: sleep, args: ['0.4'], timeout: 100ms}\n");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier = SlowStart {
            seen: Arc::clone(&seen),
            delay: Duration::from_millis(600),
        };
        let spinner =
            Spinner::for_step(&wf.steps[0], SpinnerOptions::new(Arc::new(notifier))).unwrap();

        let err = spinner.run(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            kinds(&seen),
            vec![EventKind::RunRequested, EventKind::RunStarted, EventKind::RunTimeout]
        );
    }

    #[tokio::test]
    async fn test_wait_failure_is_reported() {
        let wf = load("steps:\n  - {name: lost, command: 'true'}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();

        let failure = io::Error::new(io::ErrorKind::Other, "no child process");
        let err = spinner
            .conclude(Outcome::Exited(Err(failure)), Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Wait { ref step, .. } if step == "lost"));
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::RunWaitError);
        assert!(matches!(events[0].payload(), Payload::Error(reason) if reason == "no child process"));
    }

    #[tokio::test]
    async fn test_fast_child_beats_deadline() {
        let wf = load("steps:\n  - {name: quick, command: 'true', timeout: 5s}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        spinner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(kinds(&events).last(), Some(&EventKind::RunSuccess));
    }

    #[tokio::test]
    async fn test_start_failure_skips_started() {
        let wf = load("steps:\n  - {name: missing, command: /no/such/binary}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        let err = spinner.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, RunnerError::Start { .. }));
        assert_eq!(kinds(&events), vec![EventKind::RunRequested, EventKind::RunError]);
    }

    #[tokio::test]
    async fn test_empty_command_is_start_error() {
        let wf = load("steps:\n  - {name: ghost, command: '${TRACKMAN_SPINNER_NO_CMD}'}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        assert_eq!(spinner.command(), "");
        let err = spinner.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Start { .. }));
        assert_eq!(kinds(&events), vec![EventKind::RunRequested, EventKind::RunError]);
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let wf = load("steps:\n  - {name: long, command: sleep, args: ['10']}\n");
        let (events, options) = recorder();
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = spinner.run(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        let kinds = kinds(&events);
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[2], EventKind::RunFail);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_change_outcome() {
        let wf = load("steps:\n  - {name: ok, command: 'true'}\n");
        let notifier = FnNotifier::new("broken", |_: &Event| {
            Err(NotifyError::failed("broken", "down"))
        });
        let spinner =
            Spinner::for_step(&wf.steps[0], SpinnerOptions::new(Arc::new(notifier))).unwrap();
        assert!(spinner.run(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_workdir_and_sink_mirror() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().canonicalize().unwrap();
        let doc = format!(
            "steps:\n  - {{name: where, command: pwd, workdir: '{}'}}\n",
            dir.display()
        );
        let wf = load(&doc);

        let out = Buffer::default();
        let err = Buffer::default();
        let (_, options) = recorder();
        let options =
            options.with_sink(SpinnerSink::new(Box::new(out.clone()), Box::new(err.clone())));
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        spinner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(out.text().trim_end(), dir.display().to_string());
        assert!(err.text().is_empty());
    }

    #[tokio::test]
    async fn test_stderr_is_mirrored_separately() {
        let wf = load("steps:\n  - {name: noisy, command: sh, args: ['-c', 'echo out; echo err >&2']}\n");
        let out = Buffer::default();
        let err = Buffer::default();
        let (_, options) = recorder();
        let options =
            options.with_sink(SpinnerSink::new(Box::new(out.clone()), Box::new(err.clone())));
        let spinner = Spinner::for_step(&wf.steps[0], options).unwrap();
        spinner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(out.text(), "out\n");
        assert_eq!(err.text(), "err\n");
    }
}
