//! Many-producer, single-consumer hand-off between background tasks and the
//! task that owns the presentation log.
//!
//! Producers only ever hold an [`EventSender`]. The presentation surface is
//! reachable solely through the [`EventReceiver`], which has exactly one owner.

use super::log_entry::{LogEntry, StreamKind};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
pub enum BridgeEvent {
    Entry(LogEntry),
    /// The session is over; the presentation loop should exit.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

pub fn event_bridge() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    /// Hands an entry to the consumer. Never blocks. Returns `false` once the
    /// consumer has gone away.
    pub fn post(&self, entry: LogEntry) -> bool {
        match self.tx.send(BridgeEvent::Entry(entry)) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!(?event, "Presentation log closed; dropping event");
                false
            }
        }
    }

    pub fn system(&self, text: impl Into<String>) -> bool {
        self.post(LogEntry::system(text))
    }

    pub fn user(&self, text: impl Into<String>) -> bool {
        self.post(LogEntry::user(text))
    }

    pub fn worker(&self, kind: StreamKind, text: impl Into<String>) -> bool {
        self.post(LogEntry::worker(kind, text))
    }

    pub fn shutdown(&self) {
        if self.tx.send(BridgeEvent::Shutdown).is_err() {
            debug!("Presentation log already closed at shutdown");
        }
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }
}
