use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The fixed label set, in declaration order. The order is significant:
/// it is the tie-break order when reducing a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Neutral => "neutral",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmotionLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown emotion label: {}", s))
    }
}

/// One frame's classification: a probability in [0, 1] per label.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmotionScores([f64; 7]);

impl EmotionScores {
    pub fn new(pairs: impl IntoIterator<Item = (EmotionLabel, f64)>) -> Self {
        let mut scores = [0.0; 7];
        for (label, p) in pairs {
            scores[label.index()] = clamp_probability(p);
        }
        EmotionScores(scores)
    }

    pub fn get(&self, label: EmotionLabel) -> f64 {
        self.0[label.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f64)> + '_ {
        EmotionLabel::ALL.into_iter().map(|label| (label, self.get(label)))
    }

    /// Builds scores from a classifier's label→value map.
    ///
    /// Unknown labels are ignored and missing ones count as zero. Classifiers
    /// that report percentages (any value above 1) are rescaled to [0, 1].
    pub fn from_map(raw: &HashMap<String, f64>) -> Self {
        let percent = raw.values().any(|v| *v > 1.0);
        let scale = if percent { 100.0 } else { 1.0 };
        EmotionScores::new(raw.iter().filter_map(|(key, value)| {
            key.parse::<EmotionLabel>()
                .ok()
                .map(|label| (label, value / scale))
        }))
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}
