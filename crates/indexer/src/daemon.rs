use crate::annotator::{check_cancelled, Annotator};
use crate::calls::CallAnnotator;
use crate::chunks::ChunkAnnotator;
use crate::diff::DiffAnnotator;
use crate::error::{IndexerError, Result};
use crate::hierarchy::HierarchyAnnotator;
use crate::scanner::FileScanner;
use crate::summary::SummaryAnnotator;
use repograph_chunker::{Chunker, ChunkerConfig, ModelClient};
use repograph_graph::RepoGraph;
use repograph_store::paths::{graph_path_for_root, store_path_for_root};
use repograph_store::{DocumentStore, LexicalStore, SharedStore, VectorStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which ranking backend the document store uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Lexical,
    Vector,
}

/// Open the persisted store of `root` with `backend`, or start an empty one
pub async fn open_store(root: &Path, backend: StoreBackend) -> Result<SharedStore> {
    let path = store_path_for_root(root);
    let store: SharedStore = match backend {
        StoreBackend::Lexical => Arc::new(LexicalStore::open(&path).await?),
        StoreBackend::Vector => Arc::new(VectorStore::open(&path, Arc::new(repograph_store::HashedEmbedder::from_env())).await?),
    };
    Ok(store)
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub chunker: ChunkerConfig,
    /// Map `git diff <ref>` onto the graph when set
    pub diff_ref: Option<String>,
    /// Summarize nodes when a model client is available
    pub summarize: bool,
    pub store: StoreBackend,
    /// Watch poll interval in milliseconds
    pub interval_ms: u64,
    /// Quiet period after the newest change before an update starts
    pub debounce_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            diff_ref: None,
            summarize: true,
            store: StoreBackend::Lexical,
            interval_ms: 2_000,
            debounce_ms: 1_000,
        }
    }
}

/// Outcome of one update pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub ran: Vec<String>,
    pub skipped: Vec<String>,
    pub nodes: usize,
    pub edges: usize,
    pub store_records: usize,
    pub duration_ms: u64,
}

/// Owns the live graph and store of one working tree and keeps them current.
pub struct Daemon {
    root: PathBuf,
    graph: RwLock<RepoGraph>,
    store: SharedStore,
    annotators: Vec<Box<dyn Annotator>>,
    update_lock: Mutex<()>,
}

impl Daemon {
    /// Load persisted state under `root` and assemble the annotator pipeline
    pub async fn open(
        root: impl Into<PathBuf>,
        config: DaemonConfig,
        model: Option<Arc<dyn ModelClient>>,
    ) -> Result<Self> {
        let root: PathBuf = root.into();
        if !root.is_dir() {
            return Err(IndexerError::InvalidPath(root.display().to_string()));
        }
        let cwd = root.display().to_string();
        let graph = RepoGraph::load_or_new(graph_path_for_root(&root), &cwd).await?;
        let store = open_store(&root, config.store).await?;
        Self::with_parts(root, config, model, graph, store)
    }

    /// Assemble a daemon around an existing graph and store
    pub fn with_parts(
        root: PathBuf,
        config: DaemonConfig,
        model: Option<Arc<dyn ModelClient>>,
        graph: RepoGraph,
        store: SharedStore,
    ) -> Result<Self> {
        let mut chunker = Chunker::new(config.chunker.clone())?;
        if let Some(client) = &model {
            chunker = chunker.with_model(Arc::clone(client));
        }

        let mut annotators: Vec<Box<dyn Annotator>> = vec![
            Box::new(HierarchyAnnotator::new(&root)),
            Box::new(ChunkAnnotator::new(Arc::new(chunker))),
            Box::new(CallAnnotator::new()),
        ];
        if let Some(git_ref) = &config.diff_ref {
            annotators.push(Box::new(DiffAnnotator::new(&root, git_ref.clone())));
        }
        match model {
            Some(client) if config.summarize => annotators.push(Box::new(SummaryAnnotator::new(client))),
            _ => log::debug!("Summaries disabled: no model configured"),
        }

        Ok(Self {
            root,
            graph: RwLock::new(graph),
            store,
            annotators,
            update_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Copy of the live graph
    pub async fn snapshot(&self) -> RepoGraph {
        self.graph.read().await.clone()
    }

    #[must_use]
    pub fn annotator_names(&self) -> Vec<&'static str> {
        self.annotators.iter().map(|a| a.name()).collect()
    }

    pub async fn update(&self, refresh: bool) -> Result<UpdateReport> {
        self.update_with_cancel(refresh, &CancellationToken::new()).await
    }

    /// Run the pipeline over a working copy; the live graph and the files
    /// on disk only change when every annotator succeeds.
    pub async fn update_with_cancel(&self, refresh: bool, cancel: &CancellationToken) -> Result<UpdateReport> {
        let _guard = self.update_lock.lock().await;
        let started = Instant::now();
        let mut working = self.graph.read().await.clone();
        let mut report = UpdateReport::default();

        for annotator in &self.annotators {
            check_cancelled(cancel)?;
            if !refresh && annotator.is_complete(&working, &self.store).await? {
                log::debug!("{}: up to date", annotator.name());
                report.skipped.push(annotator.name().to_string());
                continue;
            }
            working = annotator
                .annotate(working, &self.store, refresh, cancel)
                .await
                .map_err(|err| {
                    if !err.is_cancelled() {
                        log::error!("{} failed: {err}", annotator.name());
                    }
                    err
                })?;
            report.ran.push(annotator.name().to_string());
        }
        check_cancelled(cancel)?;

        working.clear_active();
        self.store.save(&store_path_for_root(&self.root)).await?;
        working.save(graph_path_for_root(&self.root)).await?;

        report.nodes = working.node_count();
        report.edges = working.edge_count();
        report.store_records = self.store.len().await;
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        *self.graph.write().await = working;

        log::info!(
            "Update done in {}ms: ran [{}], skipped [{}], {} nodes, {} edges, {} records",
            report.duration_ms,
            report.ran.join(", "),
            report.skipped.join(", "),
            report.nodes,
            report.edges,
            report.store_records
        );
        Ok(report)
    }

    /// Poll mtimes every `interval`; once the newest change is older than
    /// `debounce` and newer than the last update, cancel any running update
    /// and start a fresh one. Returns when `shutdown` fires.
    pub async fn watch(self: Arc<Self>, interval: Duration, debounce: Duration, shutdown: CancellationToken) -> Result<()> {
        let scanner = Arc::new(FileScanner::new(&self.root));
        let mut state = WatchState::new(debounce);
        let mut running: Option<(CancellationToken, JoinHandle<Result<UpdateReport>>)> = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        log::info!(
            "Watching {} (interval {}ms, debounce {}ms)",
            self.root.display(),
            interval.as_millis(),
            debounce.as_millis()
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if running.as_ref().is_some_and(|(_, handle)| handle.is_finished()) {
                if let Some((_, handle)) = running.take() {
                    log_update_outcome(handle.await);
                }
            }

            let walker = Arc::clone(&scanner);
            let newest = match tokio::task::spawn_blocking(move || walker.newest_mtime_ms()).await {
                Ok(newest) => newest,
                Err(e) => {
                    log::warn!("Mtime scan failed: {}", e);
                    continue;
                }
            };
            if !state.poll(newest, now_ms()) {
                continue;
            }
            if let Some((token, handle)) = running.take() {
                log::info!("Changes detected during update, restarting");
                token.cancel();
                log_update_outcome(handle.await);
            }
            let token = CancellationToken::new();
            let daemon = Arc::clone(&self);
            let task_token = token.clone();
            let handle = tokio::spawn(async move { daemon.update_with_cancel(false, &task_token).await });
            running = Some((token, handle));
        }

        if let Some((token, handle)) = running.take() {
            token.cancel();
            log_update_outcome(handle.await);
        }
        log::info!("Watch stopped");
        Ok(())
    }
}

fn log_update_outcome(joined: std::result::Result<Result<UpdateReport>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(err)) if err.is_cancelled() => log::info!("Update cancelled"),
        Ok(Err(err)) => log::error!("Update failed: {err}"),
        Err(err) => log::error!("Update task panicked: {err}"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Debounce bookkeeping of the watch loop
#[derive(Debug, Clone)]
pub struct WatchState {
    debounce_ms: u64,
    last_update_mtime: Option<u64>,
    started_once: bool,
}

impl WatchState {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce_ms: u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX),
            last_update_mtime: None,
            started_once: false,
        }
    }

    /// Whether an update should start now; records the trigger when it does.
    ///
    /// The first poll always triggers so the graph catches up with changes
    /// made while nothing was watching.
    pub fn poll(&mut self, newest_mtime: Option<u64>, now_ms: u64) -> bool {
        if !self.started_once {
            self.started_once = true;
            self.last_update_mtime = newest_mtime;
            return true;
        }
        let Some(newest) = newest_mtime else {
            return false;
        };
        let settled = now_ms.saturating_sub(newest) >= self.debounce_ms;
        let changed = self.last_update_mtime.map_or(true, |last| newest > last);
        if settled && changed {
            self.last_update_mtime = Some(newest);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn watch_state_debounces() {
        let mut state = WatchState::new(Duration::from_millis(500));
        assert!(state.poll(Some(1_000), 1_100));
        assert!(!state.poll(Some(1_000), 5_000));

        // fresh change, still inside the debounce window
        assert!(!state.poll(Some(6_000), 6_200));
        assert!(state.poll(Some(6_000), 6_600));
        assert!(!state.poll(Some(6_000), 7_000));
        assert!(!state.poll(None, 9_000));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: DaemonConfig = serde_json::from_str(r#"{"diff_ref":"HEAD","store":"vector"}"#).unwrap();
        assert_eq!(config.diff_ref.as_deref(), Some("HEAD"));
        assert_eq!(config.store, StoreBackend::Vector);
        assert_eq!(config.chunker, ChunkerConfig::default());
        assert_eq!(config.debounce_ms, 1_000);
    }
}
