use super::bridge::EventSender;
use super::input_writer::InputWriter;
use super::log_entry::StreamKind;
use super::stream_reader::spawn_stream_reader;
use crate::error::AppError;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How long a worker gets to exit after SIGTERM before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How to launch the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub program: PathBuf,
    /// Runs `interpreter <program>` instead of executing `program` directly.
    pub interpreter: Option<PathBuf>,
}

impl WorkerSpec {
    fn command(&self) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        }
    }
}

impl fmt::Display for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.interpreter {
            Some(interpreter) => write!(f, "{} {}", interpreter.display(), self.program.display()),
            None => write!(f, "{}", self.program.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    AlreadyRunning,
    SpawnFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Terminated,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Ignored,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct MonitorReport {
    requested: bool,
    shutdown_sent: bool,
}

#[derive(Debug)]
struct ActiveWorker {
    pid: Option<u32>,
    input: InputWriter,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<MonitorReport>,
}

/// Owns the worker process for one session.
///
/// Only the supervisor and the monitor task it spawns ever signal or wait on
/// the child; everything else observes the session through the event bridge.
#[derive(Debug)]
pub struct ProcessSupervisor {
    worker: WorkerSpec,
    events: EventSender,
    state: Arc<watch::Sender<LifecycleState>>,
    active: Option<ActiveWorker>,
    exit_with_worker: bool,
    shutdown_grace: Duration,
    session_id: Uuid,
}

impl ProcessSupervisor {
    pub fn new(worker: WorkerSpec, events: EventSender, exit_with_worker: bool) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            worker,
            events,
            state: Arc::new(state),
            active: None,
            exit_with_worker,
            shutdown_grace: SHUTDOWN_GRACE,
            session_id: Uuid::new_v4(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn pid(&self) -> Option<u32> {
        match self.state() {
            LifecycleState::Running | LifecycleState::Stopping => self.active.as_ref().and_then(|a| a.pid),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    #[instrument(skip(self), fields(session = %self.session_id, worker = %self.worker))]
    pub fn start(&mut self) -> StartOutcome {
        let current = self.state();
        if matches!(
            current,
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Stopping
        ) {
            warn!(state = %current, "Start requested while worker is live");
            self.events.system("worker already running");
            return StartOutcome::AlreadyRunning;
        }

        self.state.send_replace(LifecycleState::Starting);

        let mut command = self.worker.command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning worker");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "Failed to spawn worker");
                let err = AppError::SpawnFailure(format!("{}: {}", self.worker, e));
                return self.spawn_failed(err);
            }
        };

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return self.spawn_failed(AppError::SpawnFailure("worker stdio was not captured".to_string()));
        };

        // An early exit still goes through Running; the monitor reports it next.
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => debug!(%status, "Worker exited before it was confirmed running"),
            Err(e) => warn!(error = %e, "Could not poll worker after spawn"),
        }

        let pid = child.id();
        // Running must be published before the monitor can publish Stopped.
        self.state.send_replace(LifecycleState::Running);
        info!(pid = ?pid, "Worker started");
        match pid {
            Some(pid) => self.events.system(format!("worker started (pid {})", pid)),
            None => self.events.system("worker started"),
        };

        let readers = [
            spawn_stream_reader(stdout, StreamKind::Stdout, self.events.clone()),
            spawn_stream_reader(stderr, StreamKind::Stderr, self.events.clone()),
        ];
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_worker(
            child,
            stop_rx,
            readers,
            MonitorContext {
                events: self.events.clone(),
                state: self.state.clone(),
                exit_with_worker: self.exit_with_worker,
                shutdown_grace: self.shutdown_grace,
                pid,
            },
        ));

        self.active = Some(ActiveWorker {
            pid,
            input: InputWriter::new(stdin),
            stop_tx: Some(stop_tx),
            monitor,
        });
        StartOutcome::Started { pid }
    }

    fn spawn_failed(&mut self, err: AppError) -> StartOutcome {
        self.events.system(err.to_string());
        self.state.send_replace(LifecycleState::Idle);
        StartOutcome::SpawnFailed
    }

    /// Terminates the worker (if any) and ends the session.
    ///
    /// Returns once the worker has been reaped and both of its stream readers
    /// have drained.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn stop(&mut self) -> StopOutcome {
        let live = matches!(self.state(), LifecycleState::Starting | LifecycleState::Running);

        let (outcome, session_closed) = match self.active.take() {
            Some(mut active) if live => {
                self.state.send_replace(LifecycleState::Stopping);
                info!(pid = ?active.pid, "Stopping worker");
                self.events.system("worker stopped");

                if let Some(stop_tx) = active.stop_tx.take() {
                    if stop_tx.send(()).is_err() {
                        debug!("Worker monitor already finished before stop request");
                    }
                }
                // The monitor sees the request first, so an exit on end of
                // input still counts as requested.
                drop(active.input);

                let report = join_monitor(active.monitor, &self.state).await;
                (StopOutcome::Terminated, report.shutdown_sent)
            }
            Some(active) => {
                debug!("Stop requested after the worker already exited");
                let report = join_monitor(active.monitor, &self.state).await;
                self.state.send_replace(LifecycleState::Stopped);
                (StopOutcome::NotRunning, report.shutdown_sent)
            }
            None => {
                debug!("Stop requested with no live worker");
                self.state.send_replace(LifecycleState::Stopped);
                (StopOutcome::NotRunning, false)
            }
        };

        // The monitor already ended the session if the worker exited on its own.
        if !session_closed {
            self.events.system("supervisor stopped");
            self.events.shutdown();
        }
        outcome
    }

    /// Forwards one line of user input to the worker.
    ///
    /// Blank input, or input while no worker is running, is ignored without a
    /// trace in the log. A failed write is reported as a system entry.
    #[instrument(skip(self, text), fields(session = %self.session_id))]
    pub async fn send(&mut self, text: &str) -> SendOutcome {
        if !self.is_running() || text.trim().is_empty() {
            debug!(state = %self.state(), "Ignoring input");
            return SendOutcome::Ignored;
        }
        let Some(active) = self.active.as_mut() else {
            return SendOutcome::Ignored;
        };

        self.events.user(format!("> {}", text));
        match active.input.write_line(text).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!(error = %e, "Failed to write to worker stdin");
                self.events.system(e.to_string());
                SendOutcome::Failed
            }
        }
    }
}

async fn join_monitor(
    monitor: JoinHandle<MonitorReport>,
    state: &watch::Sender<LifecycleState>,
) -> MonitorReport {
    match monitor.await {
        Ok(report) => {
            debug!(requested = report.requested, "Worker monitor finished");
            report
        }
        Err(e) => {
            error!(error = %e, "Worker monitor task failed");
            state.send_replace(LifecycleState::Stopped);
            MonitorReport { requested: true, shutdown_sent: false }
        }
    }
}

struct MonitorContext {
    events: EventSender,
    state: Arc<watch::Sender<LifecycleState>>,
    exit_with_worker: bool,
    shutdown_grace: Duration,
    pid: Option<u32>,
}

async fn monitor_worker(
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    readers: [JoinHandle<usize>; 2],
    ctx: MonitorContext,
) -> MonitorReport {
    let (status, requested) = tokio::select! {
        biased;
        // A dropped sender means the supervisor itself is gone; treat it as a stop.
        _ = stop_rx => (terminate(&mut child, ctx.pid, ctx.shutdown_grace).await, true),
        status = child.wait() => (status, false),
    };

    // Every worker line is delivered before the exit notice.
    for reader in readers {
        match reader.await {
            Ok(lines) => debug!(pid = ?ctx.pid, lines, "Stream reader drained"),
            Err(e) => warn!(pid = ?ctx.pid, error = %e, "Stream reader task failed"),
        }
    }

    let status_text = describe_exit(&status);
    info!(pid = ?ctx.pid, status = %status_text, requested, "Worker exited");

    // Stopped is published only after the notices so that a stop racing
    // this exit can tell whether the session was already closed.
    let report = if requested {
        ctx.events.system(format!("worker terminated by request ({})", status_text));
        MonitorReport { requested, shutdown_sent: false }
    } else {
        ctx.events.system(format!("worker exited unexpectedly ({})", status_text));
        if ctx.exit_with_worker {
            ctx.events.system("supervisor stopped");
            ctx.events.shutdown();
        }
        MonitorReport { requested, shutdown_sent: ctx.exit_with_worker }
    };
    ctx.state.send_replace(LifecycleState::Stopped);
    report
}

/// SIGTERM, then SIGKILL if the worker is still alive after `grace`.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Err(e) = request_termination(child) {
        warn!(pid = ?pid, error = %e, "Failed to signal worker");
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid = ?pid, grace_secs = grace.as_secs_f64(), "Worker ignored SIGTERM; killing it");
            child.kill().await?;
            child.wait().await
        }
    }
}

fn describe_exit(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("exit status unknown: {}", e),
    }
}

/// Sends SIGTERM on Unix; elsewhere there is no graceful signal, so the child
/// is killed outright.
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            return match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(std::io::Error::other(e)),
            };
        }
    }
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::supervisor::bridge::{event_bridge, BridgeEvent, EventReceiver};
    use crate::supervisor::log_entry::{LogEntry, Origin};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    const ECHO_WORKER: &str = "while read line; do echo \"echo: $line\"; done\n";

    fn sh_worker(body: &str) -> (TempDir, WorkerSpec) {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, body).unwrap();
        let spec = WorkerSpec {
            program: script,
            interpreter: Some(PathBuf::from("/bin/sh")),
        };
        (dir, spec)
    }

    /// Collects entries until one satisfies `done` (inclusive) or shutdown arrives.
    async fn collect_until(
        rx: &mut EventReceiver,
        done: impl Fn(&LogEntry) -> bool,
    ) -> (Vec<LogEntry>, bool) {
        let mut entries = Vec::new();
        let result = tokio::time::timeout(WAIT, async {
            while let Some(event) = rx.recv().await {
                match event {
                    BridgeEvent::Entry(entry) => {
                        let finished = done(&entry);
                        entries.push(entry);
                        if finished {
                            return false;
                        }
                    }
                    BridgeEvent::Shutdown => return true,
                }
            }
            false
        })
        .await;
        let shutdown = result.expect("timed out waiting for bridge events");
        (entries, shutdown)
    }

    async fn collect_to_shutdown(rx: &mut EventReceiver) -> Vec<LogEntry> {
        let (entries, shutdown) = collect_until(rx, |_| false).await;
        assert!(shutdown, "expected a shutdown event");
        entries
    }

    fn texts(entries: &[LogEntry], origin: Origin) -> Vec<&str> {
        entries
            .iter()
            .filter(|e| e.origin() == origin)
            .map(|e| e.text())
            .collect()
    }

    fn is_worker(entry: &LogEntry) -> bool {
        matches!(entry.origin(), Origin::Worker(_))
    }

    #[tokio::test]
    async fn start_send_and_stop_round_trip() {
        let (_dir, spec) = sh_worker(ECHO_WORKER);
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);

        let outcome = supervisor.start();
        assert!(matches!(outcome, StartOutcome::Started { pid: Some(_) }));
        assert_eq!(supervisor.state(), LifecycleState::Running);
        assert!(supervisor.pid().is_some());

        assert_eq!(supervisor.send("hello").await, SendOutcome::Sent);
        let (entries, _) = collect_until(&mut rx, is_worker).await;
        assert!(entries[0].text().starts_with("worker started (pid "));
        assert_eq!(texts(&entries, Origin::User), vec!["> hello"]);
        assert_eq!(
            texts(&entries, Origin::Worker(StreamKind::Stdout)),
            vec!["echo: hello"]
        );

        assert_eq!(supervisor.stop().await, StopOutcome::Terminated);
        assert_eq!(supervisor.state(), LifecycleState::Stopped);
        assert_eq!(supervisor.pid(), None);

        let rest = collect_to_shutdown(&mut rx).await;
        let system = texts(&rest, Origin::System);
        assert_eq!(system.len(), 3, "{system:?}");
        assert_eq!(system[0], "worker stopped");
        assert!(system[1].starts_with("worker terminated by request ("));
        assert_eq!(system[2], "supervisor stopped");
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_first_worker_keeps_working() {
        let (_dir, spec) = sh_worker(ECHO_WORKER);
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);

        let StartOutcome::Started { pid } = supervisor.start() else {
            panic!("first start failed");
        };
        assert_eq!(supervisor.start(), StartOutcome::AlreadyRunning);
        assert_eq!(supervisor.pid(), pid);

        assert_eq!(supervisor.send("still alive?").await, SendOutcome::Sent);
        let (entries, _) = collect_until(&mut rx, is_worker).await;
        let system = texts(&entries, Origin::System);
        assert_eq!(system.iter().filter(|t| t.starts_with("worker started")).count(), 1);
        assert_eq!(system.iter().filter(|t| **t == "worker already running").count(), 1);
        assert_eq!(
            texts(&entries, Origin::Worker(StreamKind::Stdout)),
            vec!["echo: still alive?"]
        );

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_and_session_stays_idle() {
        let (tx, mut rx) = event_bridge();
        let spec = WorkerSpec {
            program: PathBuf::from("/definitely/not/a/worker"),
            interpreter: None,
        };
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);

        assert_eq!(supervisor.start(), StartOutcome::SpawnFailed);
        assert_eq!(supervisor.state(), LifecycleState::Idle);

        match rx.try_recv() {
            Some(BridgeEvent::Entry(entry)) => {
                assert_eq!(entry.origin(), Origin::System);
                assert!(entry.text().starts_with("failed to start worker: "));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn sends_are_ignored_without_a_running_worker() {
        let (_dir, spec) = sh_worker(ECHO_WORKER);
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);

        assert_eq!(supervisor.send("nobody home").await, SendOutcome::Ignored);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn blank_input_is_never_sent() {
        let (_dir, spec) = sh_worker(ECHO_WORKER);
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);
        supervisor.start();
        let (_, _) = collect_until(&mut rx, |e| e.text().starts_with("worker started")).await;

        assert_eq!(supervisor.send("").await, SendOutcome::Ignored);
        assert_eq!(supervisor.send("   \t ").await, SendOutcome::Ignored);
        assert!(rx.try_recv().is_none());

        supervisor.stop().await;
        let rest = collect_to_shutdown(&mut rx).await;
        assert!(texts(&rest, Origin::User).is_empty());
        assert!(rest.iter().all(|e| !is_worker(e)));
    }

    #[tokio::test]
    async fn stop_without_worker_only_announces_shutdown() {
        let (_dir, spec) = sh_worker(ECHO_WORKER);
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);

        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
        let entries = collect_to_shutdown(&mut rx).await;
        assert_eq!(texts(&entries, Origin::System), vec!["supervisor stopped"]);
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn unexpected_exit_ends_the_session_after_all_output() {
        let (_dir, spec) = sh_worker("echo out\necho err >&2\nexit 3\n");
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);
        let mut state = supervisor.subscribe();
        supervisor.start();

        let entries = collect_to_shutdown(&mut rx).await;
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == LifecycleState::Stopped))
            .await
            .expect("worker never reached stopped")
            .unwrap();
        assert_eq!(texts(&entries, Origin::Worker(StreamKind::Stdout)), vec!["out"]);
        assert_eq!(texts(&entries, Origin::Worker(StreamKind::Stderr)), vec!["err"]);

        let exit_at = entries
            .iter()
            .position(|e| e.text().starts_with("worker exited unexpectedly ("))
            .expect("missing exit notice");
        assert!(entries[exit_at].text().contains('3'));
        assert!(entries[..exit_at].iter().filter(|e| is_worker(e)).count() == 2);
        assert_eq!(entries.last().unwrap().text(), "supervisor stopped");
        assert!(!entries.iter().any(|e| e.text().contains("by request")));
    }

    #[tokio::test]
    async fn worker_can_be_restarted_when_session_outlives_it() {
        let (_dir, spec) = sh_worker("echo bye\n");
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, false);
        let mut state = supervisor.subscribe();

        supervisor.start();
        let (entries, shutdown) =
            collect_until(&mut rx, |e| e.text().starts_with("worker exited unexpectedly")).await;
        assert!(!shutdown);
        assert_eq!(texts(&entries, Origin::Worker(StreamKind::Stdout)), vec!["bye"]);
        state
            .wait_for(|s| *s == LifecycleState::Stopped)
            .await
            .unwrap();

        assert_eq!(supervisor.send("too late").await, SendOutcome::Ignored);
        assert!(matches!(supervisor.start(), StartOutcome::Started { .. }));
        let (entries, _) = collect_until(&mut rx, is_worker).await;
        assert_eq!(texts(&entries, Origin::Worker(StreamKind::Stdout)), vec!["bye"]);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn concurrent_streams_deliver_every_line_exactly_once() {
        let (_dir, spec) = sh_worker(
            "i=0\nwhile [ $i -lt 200 ]; do echo \"out $i\"; echo \"err $i\" >&2; i=$((i+1)); done\n",
        );
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);
        supervisor.start();

        let entries = collect_to_shutdown(&mut rx).await;
        let stdout: Vec<&str> = texts(&entries, Origin::Worker(StreamKind::Stdout));
        let stderr: Vec<&str> = texts(&entries, Origin::Worker(StreamKind::Stderr));

        // Per-stream order is kept; cross-stream interleaving is not asserted.
        let expected_out: Vec<String> = (0..200).map(|i| format!("out {i}")).collect();
        let expected_err: Vec<String> = (0..200).map(|i| format!("err {i}")).collect();
        assert_eq!(stdout, expected_out);
        assert_eq!(stderr, expected_err);

        let union: BTreeSet<&str> = stdout.iter().chain(stderr.iter()).copied().collect();
        assert_eq!(union.len(), 400);
    }

    #[tokio::test]
    async fn failed_write_is_reported_and_session_survives() {
        let (_dir, spec) = sh_worker("exec 0<&-\necho closed\nexec sleep 30\n");
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);
        supervisor.start();
        let _ = collect_until(&mut rx, is_worker).await;

        assert_eq!(supervisor.send("anyone?").await, SendOutcome::Failed);
        assert!(supervisor.is_running());
        let (entries, _) = collect_until(&mut rx, |e| e.origin() == Origin::System).await;
        assert_eq!(texts(&entries, Origin::User), vec!["> anyone?"]);
        assert!(entries
            .last()
            .unwrap()
            .text()
            .starts_with("failed to send input: "));

        assert_eq!(supervisor.stop().await, StopOutcome::Terminated);
        let rest = collect_to_shutdown(&mut rx).await;
        assert!(rest.iter().any(|e| e.text().starts_with("worker terminated by request")));
    }

    #[tokio::test]
    async fn worker_ignoring_sigterm_is_killed_after_the_grace_period() {
        let (_dir, spec) = sh_worker("trap '' TERM\necho ready\nwhile true; do sleep 0.1; done\n");
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);
        supervisor.shutdown_grace = Duration::from_millis(300);
        supervisor.start();
        let _ = collect_until(&mut rx, is_worker).await;

        let outcome = tokio::time::timeout(WAIT, supervisor.stop())
            .await
            .expect("stop hung on a worker that ignores SIGTERM");
        assert_eq!(outcome, StopOutcome::Terminated);
        assert_eq!(supervisor.state(), LifecycleState::Stopped);

        let rest = collect_to_shutdown(&mut rx).await;
        let notice = rest
            .iter()
            .find(|e| e.text().starts_with("worker terminated by request ("))
            .expect("missing exit notice");
        assert!(notice.text().contains("signal: 9"), "{}", notice.text());
        assert_eq!(rest.last().unwrap().text(), "supervisor stopped");
    }

    #[tokio::test]
    async fn stop_closes_stdin_so_the_worker_can_finish_on_its_own() {
        let (_dir, spec) = sh_worker("trap '' TERM\necho ready\nwhile read line; do :; done\necho saw eof\n");
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);
        supervisor.start();
        let _ = collect_until(&mut rx, is_worker).await;

        // Well inside the default grace period: no SIGKILL needed.
        let outcome = tokio::time::timeout(SHUTDOWN_GRACE / 2, supervisor.stop())
            .await
            .expect("worker never saw end of input");
        assert_eq!(outcome, StopOutcome::Terminated);

        let rest = collect_to_shutdown(&mut rx).await;
        let eof_at = rest.iter().position(|e| e.text() == "saw eof").expect("no eof line");
        let exit_at = rest
            .iter()
            .position(|e| e.text().starts_with("worker terminated by request (exit status: 0"))
            .expect("missing clean exit notice");
        assert!(eof_at < exit_at);
        assert_eq!(rest.iter().filter(|e| e.text() == "supervisor stopped").count(), 1);
    }

    #[tokio::test]
    async fn stop_after_the_session_closed_itself_does_not_announce_twice() {
        let (_dir, spec) = sh_worker("exit 0\n");
        let (tx, mut rx) = event_bridge();
        let mut supervisor = ProcessSupervisor::new(spec, tx, true);
        let mut state = supervisor.subscribe();
        supervisor.start();

        let entries = collect_to_shutdown(&mut rx).await;
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == LifecycleState::Stopped))
            .await
            .expect("worker never reached stopped")
            .unwrap();
        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);

        let mut late = Vec::new();
        while let Some(event) = rx.try_recv() {
            late.push(event);
        }
        assert!(late.is_empty(), "{late:?}");
        assert_eq!(entries.iter().filter(|e| e.text() == "supervisor stopped").count(), 1);
    }
}
