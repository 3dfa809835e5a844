//! Top-level control loop.
//!
//! Every poll interval the coordinator rescans both directory trees, stops
//! the workers of whatever vanished and starts workers for whatever
//! appeared. Workers run as tasks on the same runtime; the coordinator owns
//! their cancellation tokens and join handles.

use std::collections::{BTreeMap, HashMap};

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BroadcastError, Result};
use crate::registry::Registry;
use crate::scanner::Scanner;
use crate::workers::{outgoing_queue, ReaderHandle, ReaderWorker, WriterWorker};

/// How many poll intervals workers get to wind down on shutdown.
const SHUTDOWN_GRACE_TICKS: u32 = 20;

/// Resource name -> consumer names, as currently registered.
pub type Snapshot = BTreeMap<String, Vec<String>>;

/// Reconciles the filesystem against running workers.
pub struct Coordinator {
    config: Config,
    scanner: Scanner,
    registry: Registry,
    readers: HashMap<String, ReaderHandle>,
    writers: HashMap<(String, String), CancellationToken>,
    workers: JoinSet<Result<()>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        let scanner = Scanner::new(&config.input_dir, &config.output_dir);
        Self {
            config,
            scanner,
            registry: Registry::new(),
            readers: HashMap::new(),
            writers: HashMap::new(),
            workers: JoinSet::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops [`Coordinator::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Current resources and their consumers.
    pub fn snapshot(&self) -> Snapshot {
        self.registry
            .resource_names()
            .map(|name| {
                let consumers = self
                    .registry
                    .resource(name)
                    .map(|r| r.consumer_names().map(str::to_string).collect())
                    .unwrap_or_default();
                (name.to_string(), consumers)
            })
            .collect()
    }

    /// Number of worker tasks that have not been reaped yet.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Create the directory roots. Called by [`Coordinator::run`].
    pub async fn prepare(&self) -> Result<()> {
        self.scanner.prepare().await
    }

    /// Run one reconciliation step.
    ///
    /// Finished workers are reaped first; a worker that failed makes this
    /// step fail with its error.
    pub async fn reconcile(&mut self) -> Result<()> {
        self.reap()?;

        let diff = self.scanner.scan_resources(&mut self.registry).await?;
        for resource in &diff.removed {
            self.stop_resource(resource);
        }
        for resource in &diff.added {
            self.start_reader(resource);
        }

        let resources: Vec<String> = self
            .registry
            .resource_names()
            .map(str::to_string)
            .collect();

        for resource in resources {
            let diff = self
                .scanner
                .scan_consumers(&mut self.registry, &resource)
                .await?;
            for consumer in &diff.removed {
                self.stop_writer(&resource, consumer);
            }
            for consumer in &diff.added {
                self.start_writer(&resource, consumer);
            }
        }

        Ok(())
    }

    /// Reconcile every poll interval until shutdown or a fatal error.
    pub async fn run(mut self) -> Result<()> {
        self.prepare().await?;

        info!(
            input = %self.scanner.input_dir().display(),
            output = %self.scanner.output_dir().display(),
            poll_interval_ms = self.config.poll_interval_ms,
            "Coordinator started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        break Err(e);
                    }
                }
            }
        };

        match &result {
            Ok(()) => self.stop_all().await,
            Err(e) => {
                error!(error = %e, "Coordinator failed, aborting workers");
                self.workers.shutdown().await;
            }
        }
        result
    }

    /// Cancel every worker and wait briefly for them to finish.
    async fn stop_all(&mut self) {
        info!(
            resources = self.readers.len(),
            consumers = self.writers.len(),
            "Stopping all workers"
        );

        for reader in self.readers.values() {
            reader.stop();
        }
        self.readers.clear();
        self.writers.clear();

        let grace = self.config.poll_interval() * SHUTDOWN_GRACE_TICKS;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.workers.join_next().await {
                if let Err(e) = flatten(joined) {
                    warn!(error = %e, "Worker failed during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.workers.len(),
                "Workers did not stop in time, aborting"
            );
            self.workers.shutdown().await;
        }
    }

    fn reap(&mut self) -> Result<()> {
        while let Some(joined) = self.workers.try_join_next() {
            flatten(joined)?;
        }
        Ok(())
    }

    fn start_reader(&mut self, resource: &str) {
        let Some(id) = self.registry.resource(resource).map(|r| r.id()) else {
            return;
        };

        let (worker, handle) = ReaderWorker::new(
            resource,
            self.scanner.producer_path(resource),
            id,
            self.config.read_chunk_size,
            self.config.poll_interval(),
            self.shutdown.child_token(),
        );
        self.readers.insert(resource.to_string(), handle);
        self.workers.spawn(worker.run());

        info!(resource = %resource, "Resource added");
    }

    /// Stop a resource's reader and, through the token hierarchy, all of
    /// its writers.
    fn stop_resource(&mut self, resource: &str) {
        if let Some(reader) = self.readers.remove(resource) {
            reader.stop();
        }
        self.writers.retain(|(r, _), _| r != resource);

        info!(resource = %resource, "Resource removed");
    }

    fn start_writer(&mut self, resource: &str, consumer: &str) {
        let Some(reader) = self.readers.get(resource) else {
            warn!(resource = %resource, consumer = %consumer, "No reader for resource, skipping consumer");
            return;
        };
        let Some(id) = self
            .registry
            .resource(resource)
            .and_then(|r| r.consumer(consumer))
        else {
            return;
        };

        let (tx, rx) = outgoing_queue();
        let cancel = reader.cancel_token().child_token();
        reader.attach(consumer, tx);

        let worker = WriterWorker::new(
            resource,
            consumer,
            self.scanner.consumer_path(resource, consumer),
            id,
            self.config.poll_interval(),
            rx,
            cancel.clone(),
        );
        self.writers
            .insert((resource.to_string(), consumer.to_string()), cancel);
        self.workers.spawn(worker.run());

        info!(resource = %resource, consumer = %consumer, "Consumer added");
    }

    fn stop_writer(&mut self, resource: &str, consumer: &str) {
        if let Some(cancel) = self
            .writers
            .remove(&(resource.to_string(), consumer.to_string()))
        {
            cancel.cancel();
        }
        if let Some(reader) = self.readers.get(resource) {
            reader.detach(consumer);
        }

        info!(resource = %resource, consumer = %consumer, "Consumer removed");
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(BroadcastError::Join(e)),
    }
}

#[cfg(test)]
mod tests;
