//! Tile indexing: a listing producer feeds metadata keys through a queue to a
//! single worker that builds dataset documents and submits them to the index.

use crate::core::dataset_doc::{build_dataset_doc, CatalogDocument};
use crate::core::products::product_for_bucket;
use crate::io::index::{resolve_dataset, DatasetIndex};
use crate::io::metadata::TileMetadataParser;
use crate::io::storage::{list_metadata_keys, ObjectStore};
use crate::types::{CfsiError, CfsiResult};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Key(String),
    /// No more keys will follow
    Shutdown,
}

/// Result of indexing one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Added,
    /// The index held a different document under the same id; it was replaced
    Updated,
    Skipped { reason: String },
}

/// What the batch does when a tile fails with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop and return the error
    #[default]
    Abort,
    /// Log, count and move on to the next key
    Continue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl IndexReport {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Added => self.added += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.added + self.updated + self.skipped + self.failed
    }
}

/// Resolve `doc` and insert it, overriding a mismatching indexed record.
///
/// Every failure here is reported as [`ItemOutcome::Skipped`].
pub fn add_dataset(index: &mut dyn DatasetIndex, doc: CatalogDocument, uri: &str) -> ItemOutcome {
    log::info!("Indexing {}", uri);

    let dataset = match resolve_dataset(doc, uri) {
        Ok(dataset) => dataset,
        Err(reason) => {
            log::error!("{}", reason);
            return ItemOutcome::Skipped { reason };
        }
    };

    let result = match index.add(&dataset) {
        Err(CfsiError::DocumentMismatch { id }) => {
            log::info!("Dataset {} changed, updating indexed record", id);
            index.update(&dataset).map(|_| ItemOutcome::Updated)
        }
        other => other.map(|_| ItemOutcome::Added),
    };

    result.unwrap_or_else(|e| {
        log::error!("Unhandled index error for {}: {}", uri, e);
        ItemOutcome::Skipped { reason: e.to_string() }
    })
}

/// Push `keys` onto the queue, then the shutdown sentinel.
///
/// Fails if the consumer has gone away before every key was handed over.
pub fn enqueue_keys(keys: Vec<String>, queue: &Sender<WorkItem>) -> CfsiResult<usize> {
    let total = keys.len();
    let mut sent = 0;

    for key in keys {
        if queue.send(WorkItem::Key(key)).is_err() {
            return Err(CfsiError::Processing(format!(
                "Indexing worker stopped with {} of {} keys undelivered",
                total - sent,
                total
            )));
        }
        sent += 1;
    }

    let _ = queue.send(WorkItem::Shutdown);
    Ok(sent)
}

/// List every metadata key under `prefix` and queue it, followed by the
/// shutdown sentinel
pub fn enqueue_metadata_keys(
    store: &dyn ObjectStore,
    prefix: &str,
    queue: &Sender<WorkItem>,
) -> CfsiResult<usize> {
    let keys = list_metadata_keys(store, prefix)?;
    let sent = enqueue_keys(keys, queue)?;
    log::info!("Queued {} metadata keys under {}", sent, prefix);
    Ok(sent)
}

/// Single consumer of the metadata key queue
pub struct IndexingWorker<'a> {
    store: &'a dyn ObjectStore,
    index: &'a mut dyn DatasetIndex,
    policy: FailurePolicy,
    timeout: Duration,
}

impl<'a> IndexingWorker<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        index: &'a mut dyn DatasetIndex,
        policy: FailurePolicy,
        timeout: Duration,
    ) -> Self {
        Self { store, index, policy, timeout }
    }

    /// Fetch, parse, map and submit one metadata object.
    ///
    /// Storage and parsing failures are returned as errors; index-side
    /// problems come back as [`ItemOutcome::Skipped`].
    pub fn process_key(&mut self, key: &str) -> CfsiResult<ItemOutcome> {
        log::info!("Processing {}", key);

        let bucket = self.store.bucket();
        let content = self.store.get_string(key)?;
        let metadata = TileMetadataParser::parse(&content)?;
        let product = product_for_bucket(bucket);
        let doc = build_dataset_doc(bucket, key, &metadata, product)?;
        let uri = doc.location.clone();

        Ok(add_dataset(self.index, doc, &uri))
    }

    /// Drain the queue until the shutdown sentinel, a closed channel or the
    /// empty-queue timeout
    pub fn run(&mut self, queue: &Receiver<WorkItem>) -> CfsiResult<IndexReport> {
        let mut report = IndexReport::default();

        loop {
            match queue.recv_timeout(self.timeout) {
                Ok(WorkItem::Shutdown) => break,
                Ok(WorkItem::Key(key)) => match self.process_key(&key) {
                    Ok(outcome) => report.record(&outcome),
                    Err(e) => match self.policy {
                        FailurePolicy::Abort => {
                            log::error!("Failed to index {}: {}", key, e);
                            return Err(e);
                        }
                        FailurePolicy::Continue => {
                            log::error!("Failed to index {}, continuing: {}", key, e);
                            report.failed += 1;
                        }
                    },
                },
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("Queue empty for {:?}, stopping worker", self.timeout);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(report)
    }
}

/// Index every metadata key under `prefix`.
///
/// The listing completes before the worker starts, so the idle timeout only
/// covers the queue itself. Keys are fed from a producer thread and drained
/// on the calling thread.
pub fn index_prefix(
    store: &dyn ObjectStore,
    index: &mut dyn DatasetIndex,
    prefix: &str,
    policy: FailurePolicy,
    timeout: Duration,
) -> CfsiResult<IndexReport> {
    let keys = list_metadata_keys(store, prefix)?;
    let listed = keys.len();
    log::info!("Listed {} metadata keys under {}", listed, prefix);

    let (tx, rx) = mpsc::channel();

    let report = std::thread::scope(|scope| {
        let producer = scope.spawn(move || enqueue_keys(keys, &tx));

        let mut worker = IndexingWorker::new(store, index, policy, timeout);
        let report = worker.run(&rx);

        let sent = producer
            .join()
            .map_err(|_| CfsiError::Processing("Queue producer panicked".to_string()))?;

        let report = report?;
        sent?;
        Ok::<_, CfsiError>(report)
    })?;

    let undelivered = rx
        .try_iter()
        .filter(|item| matches!(item, WorkItem::Key(_)))
        .count();
    if undelivered > 0 {
        return Err(CfsiError::Processing(format!(
            "Indexing worker stopped with {} of {} keys unprocessed",
            undelivered, listed
        )));
    }

    log::info!(
        "Indexed {} tiles: {} added, {} updated, {} skipped, {} failed",
        report.processed(),
        report.added,
        report.updated,
        report.skipped,
        report.failed
    );
    Ok(report)
}
