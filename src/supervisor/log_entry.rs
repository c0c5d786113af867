use chrono::{DateTime, Utc};
use std::fmt;

/// Which of the worker's output pipes a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Worker(StreamKind),
    User,
    System,
}

/// One unit of rendered output. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    text: String,
    origin: Origin,
    timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(text: impl Into<String>, origin: Origin) -> Self {
        Self {
            text: text.into(),
            origin,
            timestamp: Utc::now(),
        }
    }

    pub fn worker(kind: StreamKind, text: impl Into<String>) -> Self {
        Self::new(text, Origin::Worker(kind))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, Origin::User)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(text, Origin::System)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A [`LogEntry`] together with its position in the global presentation order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEntry {
    pub position: u64,
    pub entry: LogEntry,
}
