//! Reader worker: drains one producer pipe and fans chunks out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::QueueSender;
use crate::error::{BroadcastError, Result};
use crate::pipe::{self, Producer};
use crate::registry::EntryId;

/// Target-set changes sent by the coordinator.
#[derive(Debug)]
pub enum ReaderCommand {
    /// Start copying chunks into this consumer's queue.
    Attach { consumer: String, queue: QueueSender },
    /// Stop copying chunks to this consumer.
    Detach { consumer: String },
}

/// Coordinator-side handle to a running reader.
#[derive(Debug, Clone)]
pub struct ReaderHandle {
    commands: mpsc::UnboundedSender<ReaderCommand>,
    cancel: CancellationToken,
}

impl ReaderHandle {
    pub fn attach(&self, consumer: &str, queue: QueueSender) {
        // A stopped reader has nothing left to deliver.
        let _ = self.commands.send(ReaderCommand::Attach {
            consumer: consumer.to_string(),
            queue,
        });
    }

    pub fn detach(&self, consumer: &str) {
        let _ = self.commands.send(ReaderCommand::Detach {
            consumer: consumer.to_string(),
        });
    }

    /// Kill signal for this resource. Writer tokens are children of it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Owns a producer pipe for the lifetime of its resource.
pub struct ReaderWorker {
    resource: String,
    path: PathBuf,
    id: EntryId,
    chunk_size: usize,
    interval: Duration,
    commands: mpsc::UnboundedReceiver<ReaderCommand>,
    targets: BTreeMap<String, QueueSender>,
    cancel: CancellationToken,
}

impl ReaderWorker {
    /// Create a reader and the handle used to steer it.
    pub fn new(
        resource: impl Into<String>,
        path: impl Into<PathBuf>,
        id: EntryId,
        chunk_size: usize,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, ReaderHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ReaderHandle {
            commands: tx,
            cancel: cancel.clone(),
        };
        let worker = Self {
            resource: resource.into(),
            path: path.into(),
            id,
            chunk_size,
            interval,
            commands: rx,
            targets: BTreeMap::new(),
            cancel,
        };
        (worker, handle)
    }

    /// Poll the producer pipe until cancelled.
    ///
    /// Each iteration suspends for one interval, applies pending attach and
    /// detach commands, drains whatever the pipe holds and hands the result,
    /// as one shared chunk, to every attached consumer.
    pub async fn run(mut self) -> Result<()> {
        let receiver = match pipe::open_producer(&self.path, self.id) {
            Ok(Producer::Open(receiver)) => receiver,
            Ok(Producer::Gone) => {
                warn!(
                    resource = %self.resource,
                    path = %self.path.display(),
                    "Producer pipe vanished before it could be opened"
                );
                self.cancel.cancelled().await;
                return Ok(());
            }
            Err(source) => {
                return Err(BroadcastError::OpenProducer {
                    path: self.path,
                    source,
                })
            }
        };

        info!(resource = %self.resource, path = %self.path.display(), "Reader started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            self.apply_commands();

            let chunk = pipe::drain(&receiver, self.chunk_size).map_err(|source| {
                BroadcastError::Read {
                    path: self.path.clone(),
                    source,
                }
            })?;

            if !chunk.is_empty() {
                self.fan_out(chunk.freeze());
            }
        }

        info!(resource = %self.resource, "Reader stopped");
        Ok(())
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ReaderCommand::Attach { consumer, queue } => {
                    debug!(resource = %self.resource, consumer = %consumer, "Consumer attached");
                    self.targets.insert(consumer, queue);
                }
                ReaderCommand::Detach { consumer } => {
                    if self.targets.remove(&consumer).is_some() {
                        debug!(resource = %self.resource, consumer = %consumer, "Consumer detached");
                    }
                }
            }
        }
    }

    fn fan_out(&mut self, chunk: Bytes) {
        trace!(
            resource = %self.resource,
            bytes = chunk.len(),
            consumers = self.targets.len(),
            "Fanning out chunk"
        );

        let resource = &self.resource;
        self.targets.retain(|consumer, queue| {
            if queue.send(chunk.clone()).is_ok() {
                return true;
            }
            // Writer has stopped and closed its queue.
            debug!(resource = %resource, consumer = %consumer, "Pruning closed consumer queue");
            false
        });
    }
}
