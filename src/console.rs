//! The interactive controlling loop.
//!
//! Owns the [`ProcessSupervisor`], turns user input into lifecycle calls or
//! worker sends, and runs emotion detection in the background. It never
//! touches the presentation log directly; everything it reports goes through
//! the event bridge.

use crate::config::Config;
use crate::emotion::aggregator::{TemporalAggregator, Verdict};
use crate::emotion::sampler::{command_sampler_factory, SamplerFactory};
use crate::supervisor::bridge::EventSender;
use crate::supervisor::process_supervisor::{LifecycleState, ProcessSupervisor};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

const HELP: &str = "commands: /start, /stop (or /quit), /detect, /auto, /status, /help; \
                    any other line is sent to the worker (start a line with // to send a leading /)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Detect,
    ToggleAuto,
    Status,
    Help,
    Unknown(String),
    Send(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim_start();
        if let Some(escaped) = trimmed.strip_prefix("//") {
            return ConsoleCommand::Send(format!("/{}", escaped));
        }
        if !trimmed.starts_with('/') {
            return ConsoleCommand::Send(line.to_string());
        }
        match trimmed.trim_end().to_ascii_lowercase().as_str() {
            "/start" => ConsoleCommand::Start,
            "/stop" | "/quit" | "/exit" => ConsoleCommand::Stop,
            "/detect" => ConsoleCommand::Detect,
            "/auto" => ConsoleCommand::ToggleAuto,
            "/status" => ConsoleCommand::Status,
            "/help" => ConsoleCommand::Help,
            _ => ConsoleCommand::Unknown(trimmed.trim_end().to_string()),
        }
    }
}

/// What the input side can hand to the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Line(String),
    /// End of the user's input stream.
    Eof,
    /// Ctrl-C.
    Interrupt,
}

#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub emotion_window: Duration,
    pub significance_threshold: f64,
    pub auto_detect: bool,
    pub auto_detect_interval: Duration,
    pub forward_significant_emotion: bool,
    pub exit_with_worker: bool,
}

impl From<&Config> for ConsoleSettings {
    fn from(config: &Config) -> Self {
        Self {
            emotion_window: config.emotion_window,
            significance_threshold: config.significance_threshold,
            auto_detect: config.auto_detect,
            auto_detect_interval: config.auto_detect_interval,
            forward_significant_emotion: config.forward_significant_emotion,
            exit_with_worker: config.exit_with_worker,
        }
    }
}

#[derive(Debug)]
struct Detection {
    verdict: Verdict,
    auto: bool,
}

pub struct Console {
    supervisor: ProcessSupervisor,
    events: EventSender,
    settings: ConsoleSettings,
    aggregator: TemporalAggregator,
    sampler: Option<SamplerFactory>,
    /// Held for the duration of any detection run, manual or automatic.
    detection_lock: Arc<Mutex<()>>,
    detections_tx: mpsc::UnboundedSender<Detection>,
    detections_rx: Option<mpsc::UnboundedReceiver<Detection>>,
    auto_task: Option<JoinHandle<()>>,
}

impl Console {
    pub fn new(
        supervisor: ProcessSupervisor,
        events: EventSender,
        settings: ConsoleSettings,
        sampler: Option<SamplerFactory>,
    ) -> Self {
        let (detections_tx, detections_rx) = mpsc::unbounded_channel();
        let aggregator = TemporalAggregator::new(settings.emotion_window, settings.significance_threshold);
        Self {
            supervisor,
            events,
            settings,
            aggregator,
            sampler,
            detection_lock: Arc::new(Mutex::new(())),
            detections_tx,
            detections_rx: Some(detections_rx),
            auto_task: None,
        }
    }

    pub fn from_config(config: &Config, events: EventSender) -> Self {
        let supervisor = ProcessSupervisor::new(config.worker.clone(), events.clone(), config.exit_with_worker);
        let sampler = config
            .emotion_classifier_cmd
            .clone()
            .and_then(command_sampler_factory);
        Self::new(supervisor, events, ConsoleSettings::from(config), sampler)
    }

    /// Starts the worker and processes input until the session ends.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut input: mpsc::UnboundedReceiver<ConsoleInput>) {
        let Some(mut detections) = self.detections_rx.take() else {
            warn!("Console is already running");
            return;
        };
        let mut lifecycle = self.supervisor.subscribe();

        self.supervisor.start();
        if self.settings.auto_detect {
            self.toggle_auto();
        }

        loop {
            tokio::select! {
                received = input.recv() => {
                    let keep_going = match received {
                        Some(ConsoleInput::Line(line)) => self.handle_line(&line).await,
                        Some(ConsoleInput::Interrupt) => {
                            info!("Interrupted");
                            self.shutdown().await;
                            false
                        }
                        Some(ConsoleInput::Eof) | None => {
                            debug!("Input closed");
                            self.shutdown().await;
                            false
                        }
                    };
                    if !keep_going {
                        break;
                    }
                }
                Some(detection) = detections.recv() => {
                    self.report(detection).await;
                }
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *lifecycle.borrow_and_update();
                    if state == LifecycleState::Stopped && self.settings.exit_with_worker {
                        debug!("Worker gone and session ends with it");
                        self.stop_auto();
                        break;
                    }
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> bool {
        match ConsoleCommand::parse(line) {
            ConsoleCommand::Start => {
                self.supervisor.start();
            }
            ConsoleCommand::Stop => {
                self.shutdown().await;
                return false;
            }
            ConsoleCommand::Detect => self.detect_once(),
            ConsoleCommand::ToggleAuto => self.toggle_auto(),
            ConsoleCommand::Status => {
                self.events.system(self.status());
            }
            ConsoleCommand::Help => {
                self.events.system(HELP);
            }
            ConsoleCommand::Unknown(cmd) => {
                self.events.system(format!("unknown command: {} (try /help)", cmd));
            }
            ConsoleCommand::Send(text) => {
                self.supervisor.send(&text).await;
            }
        }
        true
    }

    async fn shutdown(&mut self) {
        self.stop_auto();
        self.supervisor.stop().await;
    }

    fn status(&self) -> String {
        let worker = match self.supervisor.pid() {
            Some(pid) => format!("worker {} (pid {})", self.supervisor.state(), pid),
            None => format!("worker {}", self.supervisor.state()),
        };
        let auto = if self.auto_task.is_some() { "on" } else { "off" };
        format!("{}; auto-detect {}", worker, auto)
    }

    fn detect_once(&mut self) {
        let Some(factory) = self.sampler.clone() else {
            self.events.system("no emotion classifier configured");
            return;
        };
        let Ok(guard) = self.detection_lock.clone().try_lock_owned() else {
            self.events.system("emotion detection already in progress");
            return;
        };

        self.events.system(format!(
            "detecting emotion for {}s",
            self.aggregator.window().as_secs_f64()
        ));
        let aggregator = self.aggregator;
        let tx = self.detections_tx.clone();
        tokio::spawn(async move {
            let mut sampler = factory();
            let verdict = aggregator.aggregate(&mut *sampler).await;
            drop(guard);
            let _ = tx.send(Detection { verdict, auto: false });
        });
    }

    fn toggle_auto(&mut self) {
        if self.auto_task.is_some() {
            self.stop_auto();
            self.events.system("auto-detect off");
            return;
        }
        let Some(factory) = self.sampler.clone() else {
            self.events.system("no emotion classifier configured");
            return;
        };

        let interval = self.settings.auto_detect_interval;
        self.auto_task = Some(tokio::spawn(auto_detect_loop(
            interval,
            self.aggregator,
            factory,
            self.detection_lock.clone(),
            self.detections_tx.clone(),
        )));
        self.events.system(format!("auto-detect on (every {}s)", interval.as_secs_f64()));
    }

    fn stop_auto(&mut self) {
        if let Some(task) = self.auto_task.take() {
            task.abort();
        }
    }

    async fn report(&mut self, detection: Detection) {
        let Detection { verdict, auto } = detection;
        info!(
            %verdict,
            auto,
            samples = verdict.samples(),
            significant = verdict.is_significant(),
            "Emotion detection finished"
        );

        if auto {
            self.events.system(format!("auto-detect: {}", verdict));
        } else {
            self.events.system(verdict.to_string());
        }

        if let Verdict::Dominant { label, mean, significant: true, .. } = verdict {
            self.events.system(format!("significant emotion: {} ({:.2})", label, mean));
            if self.settings.forward_significant_emotion {
                self.supervisor.send(&format!("emotion: {} {:.2}", label, mean)).await;
            }
        }
    }
}

/// Re-triggers detection on a fixed period. Ticks that fall due while a
/// detection is still running are skipped rather than queued.
async fn auto_detect_loop(
    period: Duration,
    aggregator: TemporalAggregator,
    factory: SamplerFactory,
    lock: Arc<Mutex<()>>,
    tx: mpsc::UnboundedSender<Detection>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Ok(_guard) = lock.clone().try_lock_owned() else {
            debug!("Detection in progress; skipping auto-detect tick");
            continue;
        };
        let mut sampler = factory();
        let verdict = aggregator.aggregate(&mut *sampler).await;
        if tx.send(Detection { verdict, auto: true }).is_err() {
            break;
        }
    }
}

/// Forwards the user's terminal input, line by line, until end of input.
///
/// Runs on a plain OS thread: a blocking read on stdin cannot be cancelled,
/// and a detached thread does not hold up process exit the way a runtime
/// blocking task would.
pub fn spawn_stdin_reader(tx: mpsc::UnboundedSender<ConsoleInput>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || forward_input(std::io::stdin().lock(), &tx))
        .map(|_| ())
}

/// Lines are read as bytes and decoded lossily so a stray non-UTF8 byte
/// costs one garbled line, not the session.
fn forward_input(mut reader: impl BufRead, tx: &mpsc::UnboundedSender<ConsoleInput>) {
    let mut buf: Vec<u8> = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(ConsoleInput::Line(line.to_string())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "Failed to read user input");
                break;
            }
        }
    }
    let _ = tx.send(ConsoleInput::Eof);
}
