use repograph_graph::{EdgeKind, NodeKind, RepoGraph};
use repograph_indexer::{Daemon, DaemonConfig, IndexerError};
use repograph_store::paths::{graph_path_for_root, store_path_for_root};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const OPERATIONS: &str = r#"import math


def add(a, b):
    return a + b


def area(r):
    return math.pi * r * r


def total(items):
    return sum(add(0, i) for i in items)
"#;

async fn project() -> TempDir {
    let temp = TempDir::new().expect("tempdir");
    let src = temp.path().join("src");
    tokio::fs::create_dir_all(&src).await.expect("create src");
    tokio::fs::write(src.join("operations.py"), OPERATIONS)
        .await
        .expect("write operations.py");
    tokio::fs::write(temp.path().join("README.md"), "# demo\n")
        .await
        .expect("write readme");
    temp
}

#[tokio::test]
async fn update_builds_persists_and_skips_when_current() {
    let temp = project().await;
    let daemon = Daemon::open(temp.path(), DaemonConfig::default(), None)
        .await
        .expect("open");
    assert_eq!(daemon.annotator_names(), vec!["hierarchy", "chunks", "calls"]);

    let report = daemon.update(false).await.expect("first update");
    assert_eq!(report.ran, vec!["hierarchy", "chunks", "calls"]);
    assert!(graph_path_for_root(temp.path()).exists());
    assert!(store_path_for_root(temp.path()).exists());

    let graph = daemon.snapshot().await;
    assert!(graph.has_edge("src", "src/operations.py", EdgeKind::Hierarchy));
    assert!(graph.contains("src/operations.py:add"));
    assert!(graph.has_edge("src/operations.py:total", "src/operations.py:add", EdgeKind::Call));
    let file = graph.node("src/operations.py").expect("file node");
    assert_eq!(file.chunks.len(), 4);
    assert!(graph.nodes().all(|node| !node.active));

    let report = daemon.update(false).await.expect("second update");
    assert!(report.ran.is_empty());
    assert_eq!(report.skipped.len(), 3);

    let reopened = Daemon::open(temp.path(), DaemonConfig::default(), None)
        .await
        .expect("reopen");
    let loaded = reopened.snapshot().await;
    assert_eq!(loaded.node_count(), graph.node_count());
    assert_eq!(loaded.edge_count(), graph.edge_count());
    assert_eq!(reopened.store().len().await, daemon.store().len().await);
}

#[tokio::test]
async fn refresh_runs_every_annotator() {
    let temp = project().await;
    let daemon = Daemon::open(temp.path(), DaemonConfig::default(), None)
        .await
        .expect("open");
    daemon.update(false).await.expect("update");
    let before = daemon.snapshot().await;

    let report = daemon.update(true).await.expect("refresh");
    assert_eq!(report.ran.len(), 3);
    let after = daemon.snapshot().await;
    assert_eq!(after.node_count(), before.node_count());
    assert_eq!(after.edge_count(), before.edge_count());
}

#[tokio::test]
async fn failed_pass_keeps_previous_graph_on_disk() {
    let temp = project().await;
    let daemon = Daemon::open(temp.path(), DaemonConfig::default(), None)
        .await
        .expect("open");
    daemon.update(false).await.expect("update");

    tokio::fs::write(temp.path().join("src/extra.py"), "def extra():\n    pass\n")
        .await
        .expect("write extra");
    let config = DaemonConfig {
        diff_ref: Some("definitely-not-a-ref".to_string()),
        ..DaemonConfig::default()
    };
    let broken = Daemon::open(temp.path(), config, None).await.expect("open");
    assert!(broken.update(false).await.is_err());

    let on_disk = RepoGraph::load(graph_path_for_root(temp.path()))
        .await
        .expect("load");
    assert!(!on_disk.contains("src/extra.py"));
    assert!(!broken.snapshot().await.contains("src/extra.py"));
}

#[tokio::test]
async fn cancelled_update_writes_nothing() {
    let temp = project().await;
    let daemon = Daemon::open(temp.path(), DaemonConfig::default(), None)
        .await
        .expect("open");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = daemon
        .update_with_cancel(false, &cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, IndexerError::Cancelled));
    assert!(!graph_path_for_root(temp.path()).exists());
    assert_eq!(daemon.snapshot().await.nodes_of_kind(NodeKind::File).count(), 0);
}
