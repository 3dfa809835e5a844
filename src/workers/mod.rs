//! Per-resource reader and per-consumer writer tasks.
//!
//! ```text
//!                 ┌──────────────┐
//!  input/r1 ────▶ │ ReaderWorker │
//!                 └──────────────┘
//!                   │ Bytes (shared)
//!        ┌──────────┼──────────┐
//!        ▼          ▼          ▼
//!   ┌────────┐ ┌────────┐ ┌────────┐
//!   │ Writer │ │ Writer │ │ Writer │
//!   └────────┘ └────────┘ └────────┘
//!        │          │          │
//!        ▼          ▼          ▼
//!  output/r1/c1  .../c2     .../c3
//! ```
//!
//! Each consumer's outgoing queue is an unbounded channel: the reader holds
//! the only sender, the writer the only receiver.

mod reader;
mod writer;

use bytes::Bytes;
use tokio::sync::mpsc;

pub use reader::{ReaderCommand, ReaderHandle, ReaderWorker};
pub use writer::WriterWorker;

/// Sending half of a consumer's outgoing queue.
pub type QueueSender = mpsc::UnboundedSender<Bytes>;
/// Receiving half of a consumer's outgoing queue.
pub type QueueReceiver = mpsc::UnboundedReceiver<Bytes>;

/// Create an empty outgoing queue.
pub fn outgoing_queue() -> (QueueSender, QueueReceiver) {
    mpsc::unbounded_channel()
}
