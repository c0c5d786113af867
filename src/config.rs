use crate::supervisor::process_supervisor::WorkerSpec;
use crate::utils::path_utils::{expand_tilde_path_buf, resolve_worker_path};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub worker: WorkerSpec,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub emotion_classifier_cmd: Option<Vec<String>>,
    pub emotion_window: Duration,
    pub significance_threshold: f64,
    pub auto_detect: bool,
    pub auto_detect_interval: Duration,
    pub forward_significant_emotion: bool,
    pub exit_with_worker: bool,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|s| !s.trim().is_empty()) {
        Some(raw) => raw.trim().parse::<T>().context(format!("Invalid {}", key)),
        None => Ok(default),
    }
}

/// Longest accepted emotion window or auto-detect period: one day.
const MAX_SECS: f64 = 86_400.0;

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> Result<Duration> {
    let secs: f64 = parse_or(lookup, key, default)?;
    if secs > MAX_SECS {
        anyhow::bail!("Invalid {}: {} exceeds the maximum of {} seconds", key, secs, MAX_SECS);
    }
    Duration::try_from_secs_f64(secs).context(format!("Invalid {}: {} is not a valid duration", key, secs))
}

impl Config {
    pub fn load(worker_path: &str) -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(worker_path, |key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup instead of the
    /// process environment.
    pub fn from_lookup(worker_path: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let program = resolve_worker_path(worker_path)?;

        let interpreter = match lookup("WORKER_INTERPRETER").filter(|s| !s.trim().is_empty()) {
            Some(name) => Some(
                which::which(name.trim())
                    .context(format!("WORKER_INTERPRETER '{}' not found in PATH", name.trim()))?,
            ),
            None => None,
        };

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "warn".to_string());
        let log_file = match lookup("LOG_FILE").filter(|s| !s.trim().is_empty()) {
            Some(raw) => Some(expand_tilde_path_buf(raw.trim())?),
            None => None,
        };

        let emotion_classifier_cmd = lookup("EMOTION_CLASSIFIER_CMD")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty());

        let emotion_window = parse_secs(&lookup, "EMOTION_WINDOW_SECS", 10.0)?;
        if emotion_window.is_zero() {
            warn!("EMOTION_WINDOW_SECS is zero; every detection will report no data");
        }

        let significance_threshold: f64 = parse_or(&lookup, "EMOTION_SIGNIFICANCE_THRESHOLD", 0.6)?;
        if !(0.0..=1.0).contains(&significance_threshold) {
            anyhow::bail!(
                "EMOTION_SIGNIFICANCE_THRESHOLD must be within [0, 1], got {}",
                significance_threshold
            );
        }

        let auto_detect = parse_or(&lookup, "AUTO_DETECT", false)?;
        let auto_detect_interval = parse_secs(&lookup, "AUTO_DETECT_INTERVAL_SECS", 30.0)?;
        if auto_detect_interval.is_zero() {
            anyhow::bail!("AUTO_DETECT_INTERVAL_SECS must be greater than zero");
        }

        let forward_significant_emotion = parse_or(&lookup, "FORWARD_SIGNIFICANT_EMOTION", false)?;
        let exit_with_worker = parse_or(&lookup, "EXIT_WITH_WORKER", true)?;

        Ok(Config {
            worker: WorkerSpec { program, interpreter },
            log_level,
            log_file,
            emotion_classifier_cmd,
            emotion_window,
            significance_threshold,
            auto_detect,
            auto_detect_interval,
            forward_significant_emotion,
            exit_with_worker,
        })
    }
}
