// Tests for the virtual network cache and its snapshot file

use filetime::FileTime;
use futures::future::join_all;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use vantage_core::snapshot::{DEFAULT_TTL, Freshness, SnapshotFile, classify_age};
use vantage_core::{Element, ElementRef, GraphEdge, GraphNode, LoadOutcome, NetworkCache, NodeType};

fn create_test_cache() -> (TempDir, NetworkCache) {
    let temp_dir = TempDir::new().unwrap();
    let cache = NetworkCache::new(temp_dir.path().join("network-cache.json"), DEFAULT_TTL);
    (temp_dir, cache)
}

fn subnet(id: &str, range: &str) -> Element {
    GraphNode::new(id, NodeType::Subnet, range).into()
}

fn edge(id: &str, source: &str, target: &str) -> Element {
    GraphEdge::new(id, source, target, "PART_OF").into()
}

fn org_batch() -> Vec<Element> {
    vec![
        GraphNode::new("1", NodeType::Organization, "Acme").into(),
        subnet("10", "10.0.1.0/24"),
        subnet("11", "10.0.2.0/24"),
        edge("20", "1", "10"),
        edge("21", "11", "1"),
    ]
}

fn set_age(path: &std::path::Path, age: Duration) {
    let mtime = FileTime::from_system_time(SystemTime::now() - age);
    filetime::set_file_mtime(path, mtime).unwrap();
}

// ============================================================================
// Load lifecycle
// ============================================================================

#[tokio::test]
async fn test_load_without_snapshot_is_empty() {
    let (_temp_dir, cache) = create_test_cache();

    assert_eq!(cache.load().await, LoadOutcome::Empty);
    assert_eq!(cache.counts().await, (0, 0));
}

#[tokio::test]
async fn test_snapshot_round_trip_through_disk() {
    let (temp_dir, cache) = create_test_cache();
    cache.merge(&org_batch()).await;
    cache.persist().await;
    cache.flush().await;
    assert!(cache.path().exists());

    let reopened = NetworkCache::new(temp_dir.path().join("network-cache.json"), DEFAULT_TTL);
    assert_eq!(reopened.load().await, LoadOutcome::Fresh { nodes: 3, edges: 2 });
    assert_eq!(
        reopened.node("10").await.map(|n| n.label),
        Some("10.0.1.0/24".to_string())
    );
}

#[tokio::test]
async fn test_stale_snapshot_is_deleted() {
    let (temp_dir, cache) = create_test_cache();
    cache.merge(&org_batch()).await;
    cache.persist().await;
    cache.flush().await;
    set_age(cache.path(), DEFAULT_TTL + Duration::from_secs(3600));

    let reopened = NetworkCache::new(temp_dir.path().join("network-cache.json"), DEFAULT_TTL);
    assert!(matches!(reopened.load().await, LoadOutcome::Stale { .. }));
    assert_eq!(reopened.counts().await, (0, 0));
    assert!(!reopened.path().exists());
}

#[tokio::test]
async fn test_snapshot_just_inside_ttl_is_fresh() {
    let (temp_dir, cache) = create_test_cache();
    cache.merge(&org_batch()).await;
    cache.persist().await;
    cache.flush().await;
    set_age(cache.path(), DEFAULT_TTL - Duration::from_secs(60));

    let reopened = NetworkCache::new(temp_dir.path().join("network-cache.json"), DEFAULT_TTL);
    assert_eq!(reopened.load().await, LoadOutcome::Fresh { nodes: 3, edges: 2 });
}

#[test]
fn test_freshness_boundary_from_file_mtime() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("snap.json");
    fs::write(&path, "{}").unwrap();
    set_age(&path, DEFAULT_TTL);

    let file = SnapshotFile::new(&path);
    let modified = file.modified().unwrap();

    let at_ttl = file.age_at(modified + DEFAULT_TTL).unwrap().unwrap();
    assert_eq!(classify_age(at_ttl, DEFAULT_TTL), Freshness::Fresh);

    let past_ttl = file
        .age_at(modified + DEFAULT_TTL + Duration::from_micros(1))
        .unwrap()
        .unwrap();
    assert_eq!(classify_age(past_ttl, DEFAULT_TTL), Freshness::Stale);

    let future = file.age_at(modified - Duration::from_secs(10)).unwrap();
    assert_eq!(future, Some(Duration::ZERO));
}

#[tokio::test]
async fn test_corrupt_snapshot_loads_empty() {
    let (_temp_dir, cache) = create_test_cache();
    fs::write(cache.path(), b"{\"version\": 1, \"nodes\": [tru").unwrap();

    assert_eq!(cache.load().await, LoadOutcome::Unreadable);
    assert_eq!(cache.counts().await, (0, 0));
    assert!(!cache.path().exists());
}

#[tokio::test]
async fn test_unknown_snapshot_version_loads_empty() {
    let (_temp_dir, cache) = create_test_cache();
    fs::write(
        cache.path(),
        r#"{"version":7,"savedAt":"2024-05-01T10:00:00Z","nodes":[],"edges":[]}"#,
    )
    .unwrap();

    assert_eq!(cache.load().await, LoadOutcome::Unreadable);
}

#[tokio::test]
async fn test_write_failure_keeps_serving() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let cache = NetworkCache::new(blocker.join("network-cache.json"), DEFAULT_TTL);

    cache.merge(&org_batch()).await;
    cache.persist().await;
    cache.flush().await;

    assert!(!cache.path().exists());
    assert_eq!(cache.counts().await, (3, 2));

    cache.merge(&[subnet("12", "10.0.3.0/24")]).await;
    assert_eq!(cache.read_all().await.len(), 6);
}

#[tokio::test]
async fn test_failed_write_keeps_previous_snapshot() {
    let (temp_dir, cache) = create_test_cache();
    cache.merge(&org_batch()).await;
    cache.persist().await;
    cache.flush().await;

    // A directory where the temp file goes makes the next write fail
    let tmp_path = temp_dir.path().join("network-cache.json.tmp");
    fs::create_dir(&tmp_path).unwrap();

    cache.merge(&[subnet("12", "10.0.3.0/24"), edge("22", "1", "12")]).await;
    cache.persist().await;
    cache.flush().await;

    let on_disk = SnapshotFile::new(cache.path()).read().unwrap();
    assert_eq!(on_disk.nodes.len(), 3);
    assert_eq!(on_disk.edges.len(), 2);
    assert!(on_disk.nodes.iter().all(|n| n.id != "12"));
    assert_eq!(cache.counts().await, (4, 3));

    // The next successful persist writes the whole current graph
    fs::remove_dir(&tmp_path).unwrap();
    cache.merge(&[subnet("13", "10.0.4.0/24")]).await;
    cache.persist().await;
    cache.flush().await;

    let on_disk = SnapshotFile::new(cache.path()).read().unwrap();
    assert_eq!(on_disk.nodes.len(), 5);
    assert_eq!(on_disk.edges.len(), 3);
    assert!(on_disk.nodes.iter().any(|n| n.id == "12"));
}

// ============================================================================
// Merge and collapse
// ============================================================================

#[tokio::test]
async fn test_merge_is_idempotent() {
    let (_temp_dir, cache) = create_test_cache();

    cache.merge(&org_batch()).await;
    let first = cache.counts().await;
    let stats = cache.merge(&org_batch()).await;

    assert_eq!(cache.counts().await, first);
    assert_eq!(stats.nodes_inserted, 0);
    assert_eq!(stats.edges_inserted, 0);
    assert_eq!(stats.nodes_replaced, 3);
}

#[tokio::test]
async fn test_collapse_inverts_merge() {
    let (_temp_dir, cache) = create_test_cache();
    cache.merge(&[GraphNode::new("1", NodeType::Organization, "Acme").into()]).await;
    let before = cache.read_all().await;

    let expansion = vec![
        subnet("10", "10.0.1.0/24"),
        subnet("11", "10.0.2.0/24"),
        edge("20", "1", "10"),
        edge("21", "1", "11"),
    ];
    cache.merge(&expansion).await;
    let refs: Vec<ElementRef> = expansion.iter().map(ElementRef::from).collect();

    let stats = cache.collapse(&refs).await;
    assert_eq!(stats.nodes_removed, 2);
    assert_eq!(cache.read_all().await, before);

    let again = cache.collapse(&refs).await;
    assert_eq!(again.nodes_removed + again.edges_removed, 0);
    assert_eq!(cache.read_all().await, before);
}

#[tokio::test]
async fn test_read_all_lists_nodes_before_edges() {
    let (_temp_dir, cache) = create_test_cache();
    cache.merge(&org_batch()).await;

    let elements = cache.read_all().await;
    let first_edge = elements.iter().position(|e| e.as_edge().is_some()).unwrap();
    assert!(elements[first_edge..].iter().all(|e| e.as_edge().is_some()));
}

#[tokio::test]
async fn test_concurrent_merges_all_land() {
    let (_temp_dir, cache) = create_test_cache();
    let cache = Arc::new(cache);

    let merges = (0..32).map(|i| {
        let cache = cache.clone();
        async move {
            let id = format!("{}", 100 + i);
            cache
                .merge(&[subnet(&id, &format!("10.0.{}.0/24", i)), subnet("1", "shared")])
                .await;
            cache.persist().await;
        }
    });
    join_all(merges).await;
    cache.flush().await;

    assert_eq!(cache.counts().await, (33, 0));

    let reopened = NetworkCache::new(cache.path().to_path_buf(), DEFAULT_TTL);
    assert_eq!(reopened.load().await, LoadOutcome::Fresh { nodes: 33, edges: 0 });
}

// ============================================================================
// Status and clear
// ============================================================================

#[tokio::test]
async fn test_status_reports_snapshot_and_graph() {
    let (_temp_dir, cache) = create_test_cache();

    let empty = cache.status().await;
    assert!(!empty.exists);
    assert_eq!(empty.age_hours, None);
    assert!(!empty.is_stale);

    cache.merge(&org_batch()).await;
    cache.persist().await;
    let status = cache.status().await;

    assert!(status.exists);
    assert!(status.age_hours.unwrap() < 1.0);
    assert!(!status.is_stale);
    assert_eq!((status.node_count, status.edge_count), (3, 2));
}

#[tokio::test]
async fn test_clear_removes_snapshot() {
    let (_temp_dir, cache) = create_test_cache();
    cache.merge(&org_batch()).await;
    cache.persist().await;
    cache.flush().await;
    assert!(cache.path().exists());

    cache.clear().await;
    cache.flush().await;

    assert_eq!(cache.counts().await, (0, 0));
    assert!(!cache.path().exists());
}

#[tokio::test]
async fn test_persist_after_clear_follows_mutation_order() {
    let (_temp_dir, cache) = create_test_cache();
    cache.merge(&org_batch()).await;
    cache.persist().await;
    cache.clear().await;
    cache.merge(&[subnet("12", "10.0.3.0/24")]).await;
    cache.persist().await;
    cache.flush().await;

    let snapshot = SnapshotFile::new(cache.path()).read().unwrap();
    assert_eq!(snapshot.nodes.len(), 1);
    assert_eq!(snapshot.nodes[0].id, "12");
}
