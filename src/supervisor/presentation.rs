//! The presentation surface and the single loop allowed to mutate it.

use super::bridge::{BridgeEvent, EventReceiver};
use super::log_entry::{Origin, RenderedEntry, StreamKind};
use std::io::Write;
use tracing::{debug, warn};

/// An append-only, ordered log that can keep its newest entry in view.
///
/// Implementations need not be thread-safe: only [`run_presentation`] touches them.
pub trait PresentationLog {
    fn append(&mut self, entry: RenderedEntry);
    fn scroll_to_latest(&mut self);
}

/// Renders entries as lines on a terminal (or any writer).
pub struct ConsoleLog<W: Write> {
    out: W,
}

impl<W: Write> ConsoleLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn render(origin: Origin, text: &str) -> String {
        match origin {
            Origin::Worker(StreamKind::Stdout) => text.to_string(),
            Origin::Worker(StreamKind::Stderr) => format!("! {}", text),
            Origin::User => text.to_string(),
            Origin::System => format!("* {}", text),
        }
    }
}

impl<W: Write> PresentationLog for ConsoleLog<W> {
    fn append(&mut self, entry: RenderedEntry) {
        let line = Self::render(entry.entry.origin(), entry.entry.text());
        if let Err(e) = writeln!(self.out, "{}", line) {
            warn!(error = %e, position = entry.position, "Failed to render log entry");
        }
    }

    fn scroll_to_latest(&mut self) {
        let _ = self.out.flush();
    }
}

/// Drains the bridge into `log` until a shutdown event arrives or every
/// producer has gone away. Returns the number of entries rendered.
pub async fn run_presentation<L: PresentationLog + ?Sized>(
    mut receiver: EventReceiver,
    log: &mut L,
) -> u64 {
    let mut position = 0u64;
    while let Some(event) = receiver.recv().await {
        match event {
            BridgeEvent::Entry(entry) => {
                debug!(
                    position,
                    origin = ?entry.origin(),
                    at = %entry.timestamp().to_rfc3339(),
                    "Rendering log entry"
                );
                log.append(RenderedEntry { position, entry });
                log.scroll_to_latest();
                position += 1;
            }
            BridgeEvent::Shutdown => {
                debug!(rendered = position, "Presentation loop received shutdown");
                break;
            }
        }
    }
    position
}
