//! Writer worker: delivers one consumer's queue to its pipe.
//!
//! The pipe is closed and reopened after every non-empty drain, so each
//! delivery goes to whichever process is reading the path at that moment.
//! A reader that goes away mid-chunk costs only what it was handed: the
//! next reader resumes at the first byte not accepted by the pipe.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::QueueReceiver;
use crate::error::{BroadcastError, Result};
use crate::pipe::{self, Connection};
use crate::registry::EntryId;

/// Owns a consumer pipe and drains its outgoing queue into it.
pub struct WriterWorker {
    resource: String,
    consumer: String,
    path: PathBuf,
    id: EntryId,
    interval: Duration,
    queue: QueueReceiver,
    pending: VecDeque<Bytes>,
    /// Bytes of the front pending chunk already accepted by the pipe.
    offset: usize,
    cancel: CancellationToken,
}

impl WriterWorker {
    pub fn new(
        resource: impl Into<String>,
        consumer: impl Into<String>,
        path: impl Into<PathBuf>,
        id: EntryId,
        interval: Duration,
        queue: QueueReceiver,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resource: resource.into(),
            consumer: consumer.into(),
            path: path.into(),
            id,
            interval,
            queue,
            pending: VecDeque::new(),
            offset: 0,
            cancel,
        }
    }

    /// Connect, drain, reconnect until cancelled.
    pub async fn run(mut self) -> Result<()> {
        info!(
            resource = %self.resource,
            consumer = %self.consumer,
            path = %self.path.display(),
            "Writer started"
        );

        loop {
            let Some(mut sender) = self.connect().await? else {
                self.final_flush(None);
                return Ok(());
            };

            loop {
                if self.cancel.is_cancelled() {
                    self.final_flush(Some(&sender));
                    return Ok(());
                }

                self.collect();
                if !self.pending.is_empty() {
                    self.write_pending(&mut sender).await?;
                    // Dropping the sender closes the pipe before reconnecting.
                    break;
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    chunk = self.queue.recv() => match chunk {
                        Some(chunk) => self.pending.push_back(chunk),
                        // Reader is gone; the coordinator cancels us next.
                        None => self.cancel.cancelled().await,
                    },
                }
            }
        }
    }

    /// Open the pipe, retrying while nobody reads it.
    ///
    /// Returns `None` once cancelled.
    async fn connect(&self) -> Result<Option<Sender>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            match pipe::connect_consumer(&self.path, self.id) {
                Ok(Connection::Open(sender)) => {
                    trace!(resource = %self.resource, consumer = %self.consumer, "Consumer pipe connected");
                    return Ok(Some(sender));
                }
                Ok(Connection::NoReader) => {
                    trace!(resource = %self.resource, consumer = %self.consumer, "No reader attached, retrying");
                }
                Ok(Connection::Gone) => {
                    debug!(resource = %self.resource, consumer = %self.consumer, "Consumer pipe gone or replaced, retrying");
                }
                Err(source) => {
                    return Err(BroadcastError::OpenConsumer {
                        path: self.path.clone(),
                        source,
                    })
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Move everything queued so far into `pending`, without suspending.
    fn collect(&mut self) {
        while let Ok(chunk) = self.queue.try_recv() {
            self.pending.push_back(chunk);
        }
    }

    /// Write pending chunks in order.
    ///
    /// A reader that detaches mid-drain leaves the unwritten tail of the
    /// current chunk and every later chunk pending for the next connection.
    async fn write_pending(&mut self, sender: &mut Sender) -> Result<()> {
        let mut written = 0usize;

        while let Some(chunk) = self.pending.front() {
            match sender.write(&chunk[self.offset..]).await {
                Ok(n) => {
                    written += n;
                    self.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(
                        resource = %self.resource,
                        consumer = %self.consumer,
                        pending = self.pending.len(),
                        "Reader detached mid-drain, keeping remaining chunks"
                    );
                    break;
                }
                Err(source) => {
                    return Err(BroadcastError::Write {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }

        trace!(resource = %self.resource, consumer = %self.consumer, bytes = written, "Drained queue");
        Ok(())
    }

    /// Mark `n` more bytes of the front chunk as delivered.
    fn advance(&mut self, n: usize) {
        self.offset += n;
        if self
            .pending
            .front()
            .is_some_and(|chunk| self.offset >= chunk.len())
        {
            self.pending.pop_front();
            self.offset = 0;
        }
    }

    /// Best-effort delivery of what is still queued, then discard the rest.
    ///
    /// Only non-blocking writes to an already open pipe are attempted.
    fn final_flush(&mut self, sender: Option<&Sender>) {
        self.queue.close();
        self.collect();

        let mut delivered = 0usize;
        if let Some(sender) = sender {
            while let Some(chunk) = self.pending.front() {
                match sender.try_write(&chunk[self.offset..]) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let remaining = chunk.len() - self.offset;
                        self.advance(n);
                        if n == remaining {
                            delivered += 1;
                        }
                    }
                }
            }
        }

        let discarded = self.pending.len();
        self.pending.clear();
        self.offset = 0;

        info!(
            resource = %self.resource,
            consumer = %self.consumer,
            delivered,
            discarded,
            "Writer stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::outgoing_queue;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::unix::pipe::OpenOptions;

    const TICK: Duration = Duration::from_millis(5);

    fn consumer(dir: &TempDir, name: &str) -> (PathBuf, EntryId) {
        let path = dir.path().join(name);
        pipe::create_fifo(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        (path, EntryId::new(meta.dev(), meta.ino()))
    }

    async fn read_exactly(path: &std::path::Path, len: usize) -> Vec<u8> {
        let mut rx = OpenOptions::new().open_receiver(path).unwrap();
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(2), rx.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_writer_delivers_when_reader_attaches_late() {
        let dir = TempDir::new().unwrap();
        let (path, id) = consumer(&dir, "c1");
        let (tx, rx) = outgoing_queue();
        let cancel = CancellationToken::new();
        let worker = WriterWorker::new("r1", "c1", &path, id, TICK, rx, cancel.clone());

        tx.send(Bytes::from_static(b"hello")).unwrap();
        let task = tokio::spawn(worker.run());

        // No reader yet: the writer keeps retrying instead of failing.
        tokio::time::sleep(TICK * 6).await;
        assert!(!task.is_finished());

        let got = read_exactly(&path, 5).await;
        assert_eq!(got, b"hello");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_writer_preserves_chunk_order() {
        let dir = TempDir::new().unwrap();
        let (path, id) = consumer(&dir, "c1");
        let (tx, rx) = outgoing_queue();
        let cancel = CancellationToken::new();
        let worker = WriterWorker::new("r1", "c1", &path, id, TICK, rx, cancel.clone());

        tx.send(Bytes::from_static(b"one,")).unwrap();
        tx.send(Bytes::from_static(b"two,")).unwrap();
        tx.send(Bytes::from_static(b"three")).unwrap();

        let reader = tokio::spawn({
            let path = path.clone();
            async move { read_exactly(&path, 13).await }
        });
        tokio::time::sleep(TICK).await;
        let task = tokio::spawn(worker.run());

        assert_eq!(reader.await.unwrap(), b"one,two,three");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_next_reader_resumes_after_partial_chunk() {
        let dir = TempDir::new().unwrap();
        let (path, id) = consumer(&dir, "c1");
        let (tx, rx) = outgoing_queue();
        let cancel = CancellationToken::new();
        let worker = WriterWorker::new("r1", "c1", &path, id, TICK, rx, cancel.clone());

        // Larger than the pipe buffer, so the first reader sees only a prefix.
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        tx.send(Bytes::from(data.clone())).unwrap();

        let mut first = OpenOptions::new().open_receiver(&path).unwrap();
        let task = tokio::spawn(worker.run());
        let mut head = vec![0u8; 1000];
        tokio::time::timeout(Duration::from_secs(2), first.read_exact(&mut head))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.as_slice(), &data[..1000]);
        drop(first);
        tokio::time::sleep(TICK * 4).await;

        let second = tokio::spawn({
            let path = path.clone();
            async move {
                let mut rx = OpenOptions::new().open_receiver(&path).unwrap();
                let mut rest = Vec::new();
                rx.read_to_end(&mut rest).await.unwrap();
                rest
            }
        });
        let rest = tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .unwrap()
            .unwrap();

        // Whatever the first reader left in the pipe buffer is lost, but
        // nothing it already read comes around again.
        let skipped = data.len() - rest.len();
        assert!(skipped >= 1000, "resent {} bytes", 1000usize.saturating_sub(skipped));
        assert_eq!(rest.as_slice(), &data[skipped..]);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_without_reader_discards_queue() {
        let dir = TempDir::new().unwrap();
        let (path, id) = consumer(&dir, "c1");
        let (tx, rx) = outgoing_queue();
        let cancel = CancellationToken::new();
        let worker = WriterWorker::new("r1", "c1", &path, id, TICK, rx, cancel.clone());

        tx.send(Bytes::from_static(b"undelivered")).unwrap();
        let task = tokio::spawn(worker.run());
        tokio::time::sleep(TICK * 3).await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.unwrap().unwrap().is_ok());

        // Queue was closed on the way out.
        assert!(tx.send(Bytes::from_static(b"late")).is_err());
    }

    #[tokio::test]
    async fn test_writer_never_delivers_to_replacement_pipe() {
        let dir = TempDir::new().unwrap();
        let (path, _) = consumer(&dir, "c1");
        let old = pipe::pin(&path).unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();
        pipe::create_fifo(&path).unwrap();

        let (tx, rx) = outgoing_queue();
        let cancel = CancellationToken::new();
        let worker = WriterWorker::new("r1", "c1", &path, old.id(), TICK, rx, cancel.clone());
        tx.send(Bytes::from_static(b"x")).unwrap();

        let mut reader = OpenOptions::new().open_receiver(&path).unwrap();
        let task = tokio::spawn(worker.run());
        tokio::time::sleep(TICK * 6).await;

        let mut buf = [0u8; 1];
        match reader.try_read(&mut buf) {
            Ok(n) => assert_eq!(n, 0, "replacement pipe must not receive old data"),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
        }

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
