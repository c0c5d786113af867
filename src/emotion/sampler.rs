use super::labels::EmotionScores;
use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, instrument};

/// A source of per-frame classifications.
///
/// `None` means no classification could be made for this attempt (capture
/// failed, no face, classifier error). Callers may invoke `sample` with no
/// pause between calls.
#[async_trait]
pub trait EmotionSampler: Send {
    async fn sample(&mut self) -> Option<EmotionScores>;
}

#[async_trait]
impl<F> EmotionSampler for F
where
    F: FnMut() -> Option<EmotionScores> + Send,
{
    async fn sample(&mut self) -> Option<EmotionScores> {
        (*self)()
    }
}

/// Builds a fresh sampler for each detection run.
pub type SamplerFactory = Arc<dyn Fn() -> Box<dyn EmotionSampler> + Send + Sync>;

/// Output shapes accepted from an external classifier command.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifierOutput {
    /// One analysis per detected face; the first face is used.
    Faces(Vec<FaceAnalysis>),
    Face(FaceAnalysis),
    Scores(HashMap<String, f64>),
}

#[derive(Debug, Deserialize)]
struct FaceAnalysis {
    emotion: HashMap<String, f64>,
}

pub fn parse_classifier_output(raw: &str) -> Result<EmotionScores, AppError> {
    let parsed: ClassifierOutput = serde_json::from_str(raw.trim())
        .map_err(|e| AppError::SamplerError(format!("unrecognized classifier output: {}", e)))?;
    let map = match parsed {
        ClassifierOutput::Faces(faces) => faces
            .into_iter()
            .next()
            .map(|face| face.emotion)
            .ok_or_else(|| AppError::SamplerError("classifier reported no faces".to_string()))?,
        ClassifierOutput::Face(face) => face.emotion,
        ClassifierOutput::Scores(scores) => scores,
    };
    Ok(EmotionScores::from_map(&map))
}

/// Runs an external classifier once per sample. The command is expected to
/// capture a frame, classify it and print the result as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandSampler {
    argv: Vec<String>,
}

impl CommandSampler {
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self { argv })
    }

    #[instrument(skip(self), fields(classifier = %self.argv[0]))]
    async fn try_sample(&self) -> Result<EmotionScores, AppError> {
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(AppError::SamplerError(format!(
                "classifier exited with {}",
                output.status
            )));
        }
        parse_classifier_output(&String::from_utf8_lossy(&output.stdout))
    }
}

pub fn command_sampler_factory(argv: Vec<String>) -> Option<SamplerFactory> {
    let sampler = CommandSampler::new(argv)?;
    Some(Arc::new(move || Box::new(sampler.clone()) as Box<dyn EmotionSampler>))
}

#[async_trait]
impl EmotionSampler for CommandSampler {
    async fn sample(&mut self) -> Option<EmotionScores> {
        match self.try_sample().await {
            Ok(scores) => Some(scores),
            Err(e) => {
                debug!(error = %e, "Emotion sample skipped");
                None
            }
        }
    }
}
