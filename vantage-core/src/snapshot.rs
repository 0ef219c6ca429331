// On-disk snapshot of the virtual network cache

use crate::error::PersistenceError;
use crate::graph::TopologyGraph;
use crate::model::{GraphEdge, GraphNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshots older than this are discarded on load.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Snapshot {
    pub fn capture(graph: &TopologyGraph) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            nodes: graph.nodes().cloned().collect(),
            edges: graph.edges().cloned().collect(),
        }
    }

    pub fn restore(self) -> TopologyGraph {
        let mut graph = TopologyGraph::new();
        for node in self.nodes {
            graph.upsert_node(node);
        }
        let mut skipped = 0;
        for edge in self.edges {
            if !graph.contains_node(&edge.source) || !graph.contains_node(&edge.target) {
                warn!(
                    "Dropping snapshot edge {} ({} - {}): endpoint not in snapshot",
                    edge.id, edge.source, edge.target
                );
                skipped += 1;
                continue;
            }
            graph.upsert_edge(edge);
        }
        if skipped > 0 {
            warn!("Restored snapshot with {} dangling edge(s) dropped", skipped);
        }
        graph
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// A snapshot is stale only once its age strictly exceeds the TTL.
pub fn classify_age(age: Duration, ttl: Duration) -> Freshness {
    if age > ttl {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// The single file a cache persists to. Its mtime is the freshness signal.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn modified(&self) -> std::io::Result<SystemTime> {
        fs::metadata(&self.path)?.modified()
    }

    /// Age relative to `now`, or None when there is no snapshot.
    /// An mtime in the future counts as age zero.
    pub fn age_at(&self, now: SystemTime) -> std::io::Result<Option<Duration>> {
        if !self.exists() {
            return Ok(None);
        }
        let modified = self.modified()?;
        Ok(Some(now.duration_since(modified).unwrap_or(Duration::ZERO)))
    }

    pub fn age(&self) -> std::io::Result<Option<Duration>> {
        self.age_at(SystemTime::now())
    }

    pub fn read(&self) -> Result<Snapshot, PersistenceError> {
        let bytes = fs::read(&self.path)?;
        Snapshot::from_bytes(&bytes)
    }

    /// Write through a sibling temp file and rename over the target, so readers
    /// see either the previous snapshot or the new one.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let bytes = snapshot.to_bytes()?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.temp_path();
        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        Ok(result?)
    }

    /// Remove the snapshot. A missing file is not an error.
    pub fn remove(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
