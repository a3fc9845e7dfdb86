use anyhow::{bail, Context as AnyhowContext, Result};
use repograph_chunker::{ChunkingStrategy, ModelClient};
use repograph_graph::RepoGraph;
use repograph_indexer::{open_store, Daemon, DaemonConfig, HttpModelClient, StoreBackend, UpdateReport};
use repograph_search::{assemble_node_context, search, ContextBuilder, CHARS_PER_TOKEN};
use repograph_store::paths::graph_path_for_root;
use repograph_store::SharedStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn model_from_env() -> Result<Option<Arc<dyn ModelClient>>> {
    let client = HttpModelClient::from_env().context("Invalid model endpoint configuration")?;
    Ok(client.map(|client| Arc::new(client) as Arc<dyn ModelClient>))
}

async fn open_daemon(root: &Path, config: DaemonConfig) -> Result<Daemon> {
    let model = model_from_env()?;
    if model.is_none() && config.chunker.strategy == ChunkingStrategy::Generated {
        bail!("The generated chunking strategy needs REPOGRAPH_MODEL_URL and REPOGRAPH_MODEL");
    }
    Daemon::open(root, config, model)
        .await
        .with_context(|| format!("Failed to open {}", root.display()))
}

/// Persisted graph and store; fails when the project was never updated
async fn open_index(root: &Path, backend: StoreBackend) -> Result<(RepoGraph, SharedStore)> {
    let graph_path = graph_path_for_root(root);
    if !graph_path.exists() {
        bail!(
            "No graph at {}; run `repograph update` first",
            graph_path.display()
        );
    }
    let graph = RepoGraph::load(&graph_path)
        .await
        .with_context(|| format!("Failed to load {}", graph_path.display()))?;
    let store = open_store(root, backend).await?;
    Ok((graph, store))
}

fn print_report(report: &UpdateReport) {
    println!(
        "ran [{}], skipped [{}]: {} nodes, {} edges, {} store records in {} ms",
        report.ran.join(", "),
        report.skipped.join(", "),
        report.nodes,
        report.edges,
        report.store_records,
        report.duration_ms
    );
}

pub async fn run_update(root: &Path, config: DaemonConfig, refresh: bool, json: bool) -> Result<()> {
    let daemon = open_daemon(root, config).await?;
    let report = daemon.update(refresh).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

pub async fn run_watch(root: &Path, config: DaemonConfig) -> Result<()> {
    let interval = Duration::from_millis(config.interval_ms.max(1));
    let debounce = Duration::from_millis(config.debounce_ms);
    let daemon = Arc::new(open_daemon(root, config).await?);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Interrupted, stopping watch"),
            Err(e) => log::warn!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    log::info!(
        "Watching {} (interval {:?}, debounce {:?})",
        root.display(),
        interval,
        debounce
    );
    daemon.watch(interval, debounce, shutdown).await?;
    Ok(())
}

pub async fn run_search(root: &Path, backend: StoreBackend, query: &str, limit: usize, json: bool) -> Result<()> {
    let (graph, store) = open_index(root, backend).await?;
    let hits = search(query, &graph, &store, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {} ({}, distance: {:.3})", i + 1, hit.id, hit.kind, hit.distance);
        if hit.reference != hit.id {
            println!("   Ref: {}", hit.reference);
        }
    }
    Ok(())
}

/// Node ids get a full node context each; other refs are quoted together
/// and cut to the same budget.
pub async fn run_context(
    root: &Path,
    backend: StoreBackend,
    refs: &[String],
    budget: usize,
    json: bool,
) -> Result<()> {
    let (graph, store) = open_index(root, backend).await?;

    let mut nodes = Vec::new();
    let mut builder = ContextBuilder::new(&graph, &store);
    for reference in refs {
        if graph.contains(reference) {
            nodes.push(assemble_node_context(&graph, &store, reference, budget).await?);
        } else {
            builder.add(reference, ["requested"]).await?;
        }
    }

    let mut quoted = builder.render();
    let max_chars = budget.saturating_mul(CHARS_PER_TOKEN);
    if quoted.len() > max_chars {
        let mut cut = max_chars;
        while !quoted.is_char_boundary(cut) {
            cut -= 1;
        }
        quoted.truncate(cut);
    }

    if json {
        let body = serde_json::json!({ "nodes": nodes, "quoted": quoted });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    for node in &nodes {
        println!("{}", node.render());
    }
    if !quoted.is_empty() {
        print!("{quoted}");
    }
    Ok(())
}
