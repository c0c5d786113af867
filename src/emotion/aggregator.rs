use super::labels::{EmotionLabel, EmotionScores};
use super::sampler::EmotionSampler;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_SIGNIFICANCE_THRESHOLD: f64 = 0.6;
pub const BASELINE_LABEL: EmotionLabel = EmotionLabel::Neutral;

/// Accumulated probability mass for one bounded sampling window.
#[derive(Debug, Clone)]
pub struct EmotionWindow {
    mass: [f64; 7],
    samples: u64,
    /// `None` when the window reaches past what `Instant` can represent.
    deadline: Option<Instant>,
}

impl EmotionWindow {
    pub fn open(now: Instant, duration: Duration) -> Self {
        Self {
            mass: [0.0; 7],
            samples: 0,
            deadline: now.checked_add(duration),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn record(&mut self, scores: &EmotionScores) {
        self.samples += 1;
        for (label, p) in scores.iter() {
            self.mass[label.index()] += p;
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Reduces to the label with the highest mean probability. Equal means
    /// resolve to the label declared first.
    pub fn reduce(self, window: Duration, threshold: f64, baseline: EmotionLabel) -> Verdict {
        if self.samples == 0 {
            return Verdict::NoData { window };
        }
        let count = self.samples as f64;

        let mut best = EmotionLabel::ALL[0];
        let mut best_mean = self.mass[best.index()] / count;
        for label in EmotionLabel::ALL.into_iter().skip(1) {
            let mean = self.mass[label.index()] / count;
            if mean > best_mean {
                best = label;
                best_mean = mean;
            }
        }

        Verdict::Dominant {
            label: best,
            mean: best_mean,
            samples: self.samples,
            window,
            significant: best != baseline && best_mean > threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    NoData {
        window: Duration,
    },
    Dominant {
        label: EmotionLabel,
        mean: f64,
        samples: u64,
        window: Duration,
        significant: bool,
    },
}

impl Verdict {
    pub fn is_significant(&self) -> bool {
        matches!(self, Verdict::Dominant { significant: true, .. })
    }

    pub fn samples(&self) -> u64 {
        match self {
            Verdict::NoData { .. } => 0,
            Verdict::Dominant { samples, .. } => *samples,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::NoData { window } => {
                write!(f, "no emotion detected within {}s", window.as_secs_f64())
            }
            Verdict::Dominant { label, mean, window, .. } => write!(
                f,
                "dominant emotion over {}s: {} (mean probability {:.2})",
                window.as_secs_f64(),
                label,
                mean
            ),
        }
    }
}

/// Samples a classifier for a fixed window and reduces the result to a verdict.
#[derive(Debug, Clone, Copy)]
pub struct TemporalAggregator {
    window: Duration,
    threshold: f64,
    baseline: EmotionLabel,
}

impl Default for TemporalAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_SIGNIFICANCE_THRESHOLD)
    }
}

impl TemporalAggregator {
    pub fn new(window: Duration, threshold: f64) -> Self {
        Self {
            window,
            threshold,
            baseline: BASELINE_LABEL,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Polls `sampler` back to back until the window closes. Failed samples
    /// are skipped without counting; there is no backoff between attempts.
    #[instrument(skip(self, sampler), fields(window_secs = self.window.as_secs_f64()))]
    pub async fn aggregate<S>(&self, sampler: &mut S) -> Verdict
    where
        S: EmotionSampler + ?Sized,
    {
        let mut window = EmotionWindow::open(Instant::now(), self.window);
        let mut attempts: u64 = 0;

        while !window.is_expired(Instant::now()) {
            attempts += 1;
            if let Some(scores) = sampler.sample().await {
                window.record(&scores);
            }
            // Cheap samplers must not starve the other tasks on this worker.
            tokio::task::yield_now().await;
        }

        debug!(attempts, samples = window.samples(), "Emotion window closed");
        window.reduce(self.window, self.threshold, self.baseline)
    }
}
