use crate::context::{fetch_document, ContextBuilder};
use crate::error::Result;
use repograph_chunker::estimate_tokens;
use repograph_graph::{EdgeKind, GraphError, Node, NodeKind, RepoGraph};
use repograph_store::SharedStore;
use serde::Serialize;
use std::fmt::Write as _;

/// Characters per token of the budget, the same ratio `estimate_tokens` uses
pub const CHARS_PER_TOKEN: usize = 4;

/// A node's own text plus the surrounding context, cut to a token budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeContext {
    pub id: String,
    pub kind: NodeKind,
    pub document: String,
    pub context: String,
    /// Whether either part was cut to fit the budget
    pub truncated: bool,
}

impl NodeContext {
    #[must_use]
    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.document) + estimate_tokens(&self.context)
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("## {} ({})\n", self.id, self.kind);
        if !self.document.is_empty() {
            out.push_str(&self.document);
            if !self.document.ends_with('\n') {
                out.push('\n');
            }
        }
        if !self.context.is_empty() {
            out.push_str("\n## context\n");
            out.push_str(&self.context);
        }
        out
    }
}

/// Build the context of one node within `budget_tokens`.
///
/// * chunk: enclosing chunks up to the file, callees, callers and the diff
///   hunks touching it, quoted from their sources
/// * file / directory: the tree below it and its children's summaries
/// * diff: its hunks and what they touch
///
/// The node's document is cut first and keeps as much of the budget as it
/// needs; the context gets whatever is left.
pub async fn assemble_node_context(
    graph: &RepoGraph,
    store: &SharedStore,
    node_id: &str,
    budget_tokens: usize,
) -> Result<NodeContext> {
    let node = graph
        .node(node_id)
        .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;

    let (mut document, mut context) = match node.kind {
        NodeKind::Chunk => (
            fetch_document(store, node).await?,
            chunk_context(graph, store, node).await?,
        ),
        NodeKind::File if node.is_errored() => (String::new(), outline(graph, node)),
        NodeKind::File => (fetch_document(store, node).await?, outline(graph, node)),
        NodeKind::Directory => (String::new(), outline(graph, node)),
        NodeKind::Diff => (fetch_document(store, node).await?, hunk_listing(graph, node)),
    };

    let budget = budget_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut truncated = truncate_lines(&mut document, budget);
    truncated |= truncate_lines(&mut context, budget.saturating_sub(document.len()));
    if truncated {
        log::debug!("Context for {} cut to {} tokens", node_id, budget_tokens);
    }

    Ok(NodeContext {
        id: node.id.clone(),
        kind: node.kind,
        document,
        context,
        truncated,
    })
}

async fn chunk_context(graph: &RepoGraph, store: &SharedStore, node: &Node) -> Result<String> {
    let mut builder = ContextBuilder::new(graph, store);

    let parents = graph
        .ancestors(&node.id)
        .into_iter()
        .take_while(|ancestor| ancestor.kind == NodeKind::Chunk);
    for parent in parents {
        quote(&mut builder, &parent.id, "parent").await;
    }
    for callee in graph.successors(&node.id, Some(EdgeKind::Call)) {
        quote(&mut builder, &callee.id, "calls").await;
    }
    for caller in graph.predecessors(&node.id, Some(EdgeKind::Call)) {
        quote(&mut builder, &caller.id, "called by").await;
    }
    for target in graph.successors(&node.id, Some(EdgeKind::Diff)) {
        if target.kind == NodeKind::Chunk {
            quote(&mut builder, &target.id, "changed").await;
        }
    }
    for hunk in graph.predecessors(&node.id, Some(EdgeKind::Diff)) {
        quote(&mut builder, &hunk.id, "diff").await;
    }

    // The node's own lines are already the document
    builder.remove(&node.id).await?;
    Ok(builder.render())
}

async fn quote(builder: &mut ContextBuilder<'_>, reference: &str, tag: &str) {
    if let Err(e) = builder.add(reference, [tag]).await {
        log::warn!("Skipping {} in context: {}", reference, e);
    }
}

/// Indented tree under `node` followed by its children's summaries.
/// Directories list directories and files; files list their chunks.
fn outline(graph: &RepoGraph, node: &Node) -> String {
    let wanted = |kind: NodeKind| match node.kind {
        NodeKind::File => kind == NodeKind::Chunk,
        _ => matches!(kind, NodeKind::Directory | NodeKind::File),
    };

    let mut out = String::new();
    let mut stack = vec![(node, 0usize)];
    while let Some((current, depth)) = stack.pop() {
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), current.id);
        let mut children: Vec<&Node> = graph
            .successors(&current.id, Some(EdgeKind::Hierarchy))
            .into_iter()
            .filter(|child| wanted(child.kind))
            .collect();
        children.sort_by(|a, b| b.id.cmp(&a.id));
        stack.extend(children.into_iter().map(|child| (child, depth + 1)));
    }

    let mut children = graph.successors(&node.id, Some(EdgeKind::Hierarchy));
    children.sort_by(|a, b| a.id.cmp(&b.id));
    let summaries: Vec<String> = children
        .into_iter()
        .filter_map(|child| {
            child
                .summary
                .as_ref()
                .map(|summary| format!("- {}: {}", child.id, summary.text))
        })
        .collect();
    if !summaries.is_empty() {
        out.push_str("\nsummaries:\n");
        for line in summaries {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

fn hunk_listing(graph: &RepoGraph, node: &Node) -> String {
    let mut out = String::new();
    for link in &node.chunks {
        let targets: Vec<&str> = graph
            .successors(&link.id, Some(EdgeKind::Diff))
            .into_iter()
            .map(|target| target.id.as_str())
            .collect();
        let _ = writeln!(out, "- {} -> {}", link.id, targets.join(", "));
    }
    out
}

/// Cut `text` to at most `max` bytes, on a line boundary when one exists
fn truncate_lines(text: &mut String, max: usize) -> bool {
    if text.len() <= max {
        return false;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    if let Some(newline) = text[..cut].rfind('\n') {
        cut = newline + 1;
    }
    text.truncate(cut);
    true
}
