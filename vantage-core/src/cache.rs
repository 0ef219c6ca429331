//! The virtual network cache: a process-wide topology graph mirrored to a
//! single snapshot file.
//!
//! All mutation goes through the write half of one [`RwLock`]; readers share
//! the read half and never observe a half-applied merge. Snapshots are
//! captured while the lock is held and handed to a single background writer
//! task, so the file on disk always trails the in-memory graph in order and
//! request latency never includes disk IO. Call [`NetworkCache::flush`] before
//! shutting down to make sure the last snapshot has landed.

use crate::graph::{CollapseStats, MergeStats, TopologyGraph};
use crate::model::{Element, ElementRef, GraphNode, NodeType};
use crate::snapshot::{Freshness, Snapshot, SnapshotFile, classify_age};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// What `load()` found on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// No snapshot; the cache starts empty.
    Empty,
    /// Snapshot within the TTL, now in memory.
    Fresh { nodes: usize, edges: usize },
    /// Snapshot older than the TTL; deleted, the cache starts empty.
    Stale { age: Duration },
    /// Snapshot could not be read or decoded; deleted, the cache starts empty.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub exists: bool,
    pub age_hours: Option<f64>,
    pub is_stale: bool,
    pub node_count: usize,
    pub edge_count: usize,
}

enum StorageOp {
    Write(Box<Snapshot>),
    Remove,
}

enum WriterCommand {
    Store(StorageOp),
    Flush(oneshot::Sender<()>),
}

pub struct NetworkCache {
    graph: RwLock<TopologyGraph>,
    file: SnapshotFile,
    ttl: Duration,
    writer: mpsc::UnboundedSender<WriterCommand>,
}

impl NetworkCache {
    /// Create an empty cache persisting to `path`. Spawns the snapshot writer,
    /// so this must run inside a tokio runtime.
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let file = SnapshotFile::new(path);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(file.clone(), rx));

        Self {
            graph: RwLock::new(TopologyGraph::new()),
            file,
            ttl,
            writer: tx,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Bring the on-disk snapshot into memory according to the freshness policy.
    pub async fn load(&self) -> LoadOutcome {
        let age = match self.file.age() {
            Ok(Some(age)) => age,
            Ok(None) => {
                info!("No cache snapshot at {}", self.file.path().display());
                return LoadOutcome::Empty;
            }
            Err(e) => {
                warn!("Could not stat cache snapshot: {}", e);
                self.discard_snapshot().await;
                return LoadOutcome::Unreadable;
            }
        };

        if classify_age(age, self.ttl) == Freshness::Stale {
            info!(
                "Cache snapshot is {:.1}h old (ttl {:.1}h), discarding",
                age.as_secs_f64() / 3600.0,
                self.ttl.as_secs_f64() / 3600.0
            );
            self.discard_snapshot().await;
            return LoadOutcome::Stale { age };
        }

        let file = self.file.clone();
        let read = tokio::task::spawn_blocking(move || file.read()).await;
        let snapshot = match read {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                error!("Failed to read cache snapshot, starting empty: {}", e);
                self.discard_snapshot().await;
                return LoadOutcome::Unreadable;
            }
            Err(e) => {
                error!("Snapshot reader task failed, starting empty: {}", e);
                return LoadOutcome::Unreadable;
            }
        };

        let restored = snapshot.restore();
        let (nodes, edges) = (restored.node_count(), restored.edge_count());
        *self.graph.write().await = restored;

        info!("Loaded cache snapshot: {} nodes, {} edges", nodes, edges);
        LoadOutcome::Fresh { nodes, edges }
    }

    /// Upsert a batch of elements. Does not persist.
    pub async fn merge(&self, elements: &[Element]) -> MergeStats {
        let mut graph = self.graph.write().await;
        let stats = graph.merge(elements);
        debug!(
            "Merged {} elements: {:?} (now {} nodes, {} edges)",
            elements.len(),
            stats,
            graph.node_count(),
            graph.edge_count()
        );
        stats
    }

    /// Remove the referenced nodes and edges. Does not persist.
    pub async fn collapse(&self, targets: &[ElementRef]) -> CollapseStats {
        let mut graph = self.graph.write().await;
        let stats = graph.collapse(targets);
        debug!(
            "Collapsed {} targets: {:?} (now {} nodes, {} edges)",
            targets.len(),
            stats,
            graph.node_count(),
            graph.edge_count()
        );
        stats
    }

    /// Queue a snapshot of the current graph for writing.
    pub async fn persist(&self) {
        let graph = self.graph.read().await;
        let snapshot = Snapshot::capture(&graph);
        // Enqueue before releasing the lock so queued snapshots follow mutation order
        self.send(WriterCommand::Store(StorageOp::Write(Box::new(snapshot))));
        drop(graph);
    }

    /// Empty the in-memory graph and queue removal of the snapshot file.
    pub async fn clear(&self) {
        let mut graph = self.graph.write().await;
        graph.clear();
        self.send(WriterCommand::Store(StorageOp::Remove));
    }

    pub async fn read_all(&self) -> Vec<Element> {
        self.graph.read().await.elements()
    }

    pub async fn node(&self, id: &str) -> Option<GraphNode> {
        self.graph.read().await.node(id).cloned()
    }

    pub async fn nodes_of_type(&self, node_type: NodeType) -> Vec<GraphNode> {
        self.graph
            .read()
            .await
            .nodes()
            .filter(|n| n.node_type == node_type)
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> (usize, usize) {
        let graph = self.graph.read().await;
        (graph.node_count(), graph.edge_count())
    }

    /// Current snapshot and graph state. Waits for queued writes first.
    pub async fn status(&self) -> CacheStatus {
        self.flush().await;

        let age = match self.file.age() {
            Ok(age) => age,
            Err(e) => {
                warn!("Could not stat cache snapshot: {}", e);
                None
            }
        };
        let (node_count, edge_count) = self.counts().await;

        CacheStatus {
            exists: age.is_some(),
            age_hours: age.map(|a| a.as_secs_f64() / 3600.0),
            is_stale: age.is_some_and(|a| classify_age(a, self.ttl) == Freshness::Stale),
            node_count,
            edge_count,
        }
    }

    /// Wait until every storage operation queued so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(WriterCommand::Flush(tx));
        if rx.await.is_err() {
            warn!("Snapshot writer is gone; flush skipped");
        }
    }

    async fn discard_snapshot(&self) {
        self.send(WriterCommand::Store(StorageOp::Remove));
        self.flush().await;
    }

    fn send(&self, command: WriterCommand) {
        if self.writer.send(command).is_err() {
            error!("Snapshot writer is gone; cache changes will not be persisted");
        }
    }
}

/// Applies storage operations in arrival order. Operations that arrive in a
/// burst collapse to the last one, since each write replaces the whole file.
async fn run_writer(file: SnapshotFile, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        let mut pending: Option<StorageOp> = None;
        for command in batch {
            match command {
                WriterCommand::Store(op) => pending = Some(op),
                WriterCommand::Flush(done) => {
                    if let Some(op) = pending.take() {
                        apply(&file, op).await;
                    }
                    let _ = done.send(());
                }
            }
        }

        if let Some(op) = pending.take() {
            apply(&file, op).await;
        }
    }
    debug!("Snapshot writer stopped");
}

async fn apply(file: &SnapshotFile, op: StorageOp) {
    let file = file.clone();
    let outcome = tokio::task::spawn_blocking(move || match op {
        StorageOp::Write(snapshot) => file
            .write(&snapshot)
            .map(|_| format!("{} nodes, {} edges", snapshot.nodes.len(), snapshot.edges.len())),
        StorageOp::Remove => file.remove().map(|_| "removed".to_string()),
    })
    .await;

    match outcome {
        Ok(Ok(summary)) => debug!("Cache snapshot updated ({})", summary),
        Ok(Err(e)) => error!("Failed to update cache snapshot: {}", e),
        Err(e) => error!("Snapshot writer task failed: {}", e),
    }
}
