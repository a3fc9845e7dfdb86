use repograph_indexer::{Daemon, DaemonConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_picks_up_new_files() {
    let temp = TempDir::new().expect("tempdir");
    tokio::fs::write(temp.path().join("lib.py"), "def noop():\n    pass\n")
        .await
        .expect("write initial file");

    let daemon = Arc::new(
        Daemon::open(temp.path(), DaemonConfig::default(), None)
            .await
            .expect("open"),
    );
    let shutdown = CancellationToken::new();
    let watcher = tokio::spawn(Arc::clone(&daemon).watch(
        Duration::from_millis(50),
        Duration::from_millis(100),
        shutdown.clone(),
    ));

    let indexed = wait_for(Duration::from_secs(10), || {
        let daemon = Arc::clone(&daemon);
        async move { daemon.snapshot().await.contains("lib.py:noop") }
    })
    .await;
    assert!(indexed, "initial update never landed");

    tokio::fs::write(temp.path().join("added.py"), "def fresh():\n    return 1\n")
        .await
        .expect("write new file");
    let updated = wait_for(Duration::from_secs(10), || {
        let daemon = Arc::clone(&daemon);
        async move { daemon.snapshot().await.contains("added.py:fresh") }
    })
    .await;
    assert!(updated, "watch never picked up added.py");

    shutdown.cancel();
    watcher
        .await
        .expect("watch task")
        .expect("watch result");
}
