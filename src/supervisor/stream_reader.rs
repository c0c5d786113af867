//! Line readers for the worker's stdout and stderr.
//!
//! Workers can emit non-UTF8 bytes; `BufReader::lines()` would end the loop on
//! the first bad byte, so lines are read as bytes and decoded lossily.

use super::bridge::EventSender;
use super::log_entry::StreamKind;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawns a task that forwards every non-blank line of `stream` to the bridge.
///
/// The task ends at end-of-stream (or on a read error) and resolves to the
/// number of entries it emitted.
pub fn spawn_stream_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    kind: StreamKind,
    sender: EventSender,
) -> JoinHandle<usize> {
    tokio::spawn(read_lines(stream, kind, sender))
}

async fn read_lines(
    stream: impl AsyncRead + Unpin,
    kind: StreamKind,
    sender: EventSender,
) -> usize {
    let mut reader = BufReader::new(stream);
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut emitted = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                debug!(stream = %kind, "{}", text);
                sender.worker(kind, text);
                emitted += 1;
            }
            Err(e) => {
                debug!(stream = %kind, error = %e, "stream reader exiting due to read error");
                break;
            }
        }
    }

    // Dropping the reader closes our end of the pipe.
    debug!(stream = %kind, emitted, "stream reader finished");
    emitted
}
