//! Worker process supervision and the stdio bridge to the presentation log.
//!
//! ```text
//! worker stdout ──► stream_reader ─┐
//! worker stderr ──► stream_reader ─┼─► EventSender ══► EventReceiver ──► run_presentation ──► PresentationLog
//! supervisor / send path ──────────┘
//! user line ──► ProcessSupervisor::send ──► InputWriter ──► worker stdin
//! ```

pub mod bridge;
pub mod input_writer;
pub mod log_entry;
pub mod presentation;
pub mod process_supervisor;
pub mod stream_reader;
