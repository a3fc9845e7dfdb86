//! Model-generated chunk boundaries.
//!
//! ```text
//! file ──> batches of `batch_lines`
//!            │
//!            ├─> prompt (numbered lines + carry of previous batch)
//!            ├─> ModelClient::complete
//!            └─> validate ──> Accepted          next batch
//!                         ├─> RetryCurrent      same batch   (retry budget)
//!                         └─> RollbackPrevious  previous one (rollback budget)
//! ```
//!
//! A rollback with nothing to roll back to, or with its budget spent, is
//! retried instead. Once no budget applies the response is accepted as-is;
//! orphaned ids are later re-parented by [`crate::resolver::parent_of`].

use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::model::ModelClient;
use crate::ranges::count_lines;
use crate::resolver::parent_id;
use crate::types::ChunkProposal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You split source files into a hierarchy of named chunks. \
Reply with a JSON array only. Each element is an object with exactly the keys \
\"id\", \"start_line\" and \"end_line\". Ids are \"<path>:<dotted.name>\" where each \
dot descends one level (Class.method). Lines are 1-indexed and inclusive.";

/// Verdict on one model response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    /// The response is unusable; ask again for the same batch
    RetryCurrent,
    /// Several chunks point at a parent the previous batch failed to produce
    RollbackPrevious,
}

/// What the validator needs to know about the batch being generated
#[derive(Debug, Clone)]
pub struct BatchContext<'a> {
    pub path: &'a str,
    pub batch_start: usize,
    pub batch_end: usize,
    /// Last accepted chunk of the previous batch, resubmitted for continuation
    pub carry: Option<&'a ChunkProposal>,
    /// Ids accepted in earlier batches
    pub known_ids: &'a HashSet<String>,
}

/// Validate a raw response. Returns the outcome plus every item that passed
/// the per-item checks, so exhausted budgets can still accept what parsed.
#[must_use]
pub fn validate_batch(ctx: &BatchContext<'_>, response: &str) -> (ValidationOutcome, Vec<ChunkProposal>) {
    let Some(items) = extract_array(response) else {
        log::debug!("{}: response holds no JSON array", ctx.path);
        return (ValidationOutcome::RetryCurrent, Vec::new());
    };

    let prefix = format!("{}:", ctx.path);
    let mut proposals = Vec::with_capacity(items.len());
    let mut malformed = 0usize;

    for item in &items {
        match parse_item(item, &prefix) {
            Some(p) if p.start_line >= 1 && p.start_line <= p.end_line && p.end_line <= ctx.batch_end => {
                proposals.push(p);
            }
            _ => malformed += 1,
        }
    }

    if malformed > 0 {
        log::debug!("{}: {malformed} malformed chunk item(s)", ctx.path);
        return (ValidationOutcome::RetryCurrent, proposals);
    }

    if let Some(carry) = ctx.carry {
        if !proposals.iter().any(|p| p.id == carry.id) {
            log::debug!("{}: response does not continue {}", ctx.path, carry.id);
            return (ValidationOutcome::RetryCurrent, proposals);
        }
    }

    let mut ordered: Vec<&ChunkProposal> = proposals.iter().collect();
    ordered.sort_by_key(|p| p.id.len());
    let mut running: HashSet<&str> = ctx.known_ids.iter().map(String::as_str).collect();
    let mut missing: HashMap<String, usize> = HashMap::new();
    for proposal in ordered {
        if let Some(parent) = parent_id(&proposal.id) {
            if !running.contains(parent.as_str()) {
                *missing.entry(parent).or_insert(0) += 1;
            }
        }
        running.insert(proposal.id.as_str());
    }

    if missing.values().any(|&count| count >= 2) {
        (ValidationOutcome::RollbackPrevious, proposals)
    } else if !missing.is_empty() {
        (ValidationOutcome::RetryCurrent, proposals)
    } else {
        (ValidationOutcome::Accepted, proposals)
    }
}

fn extract_array(response: &str) -> Option<Vec<Value>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Vec<Value>>(&response[start..=end]).ok()
}

fn parse_item(item: &Value, prefix: &str) -> Option<ChunkProposal> {
    let object = item.as_object()?;
    if object.len() != 3 {
        return None;
    }
    let id = object.get("id")?.as_str()?;
    let name = id.strip_prefix(prefix)?;
    if name.is_empty() || name.split('.').any(str::is_empty) {
        return None;
    }
    let start = line_number(object.get("start_line")?)?;
    let end = line_number(object.get("end_line")?)?;
    Some(ChunkProposal::new(id, start, end))
}

fn line_number(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct BatchRecord {
    accepted: Vec<ChunkProposal>,
    /// Carry popped from an earlier record when this batch was accepted
    popped: Option<(usize, ChunkProposal)>,
}

/// Batched, validated, retried chunk generation through a [`ModelClient`].
pub struct GeneratedProducer {
    client: Arc<dyn ModelClient>,
    batch_lines: usize,
    retry_budget: usize,
    rollback_budget: usize,
}

impl GeneratedProducer {
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, config: &ChunkerConfig) -> Self {
        Self {
            client,
            batch_lines: config.batch_lines.max(1),
            retry_budget: config.retry_budget,
            rollback_budget: config.rollback_budget,
        }
    }

    /// Propose chunks for `text`. A model failure is returned as an error so
    /// the caller can fall back to another strategy.
    pub async fn propose(&self, path: &str, text: &str) -> Result<Vec<ChunkProposal>> {
        let lines: Vec<&str> = text.lines().collect();
        let line_count = count_lines(text);
        if line_count == 0 {
            return Ok(Vec::new());
        }

        let batch_count = line_count.div_ceil(self.batch_lines);
        let mut records: Vec<BatchRecord> = (0..batch_count).map(|_| BatchRecord::default()).collect();
        let mut idx = 0;
        let mut retries = 0;
        let mut rollbacks = 0;

        while idx < batch_count {
            let batch_start = idx * self.batch_lines + 1;
            let batch_end = ((idx + 1) * self.batch_lines).min(line_count);
            let carry = idx
                .checked_sub(1)
                .and_then(|prev| records[prev].accepted.last().cloned());
            let known_ids: HashSet<String> = records[..idx]
                .iter()
                .flat_map(|record| record.accepted.iter().map(|p| p.id.clone()))
                .collect();

            let prompt = build_prompt(path, &lines, batch_start, batch_end, carry.as_ref());
            let response = self.client.complete(SYSTEM_PROMPT, &prompt).await?;

            let ctx = BatchContext {
                path,
                batch_start,
                batch_end,
                carry: carry.as_ref(),
                known_ids: &known_ids,
            };
            let (outcome, proposals) = validate_batch(&ctx, &response);

            match outcome {
                ValidationOutcome::RollbackPrevious if idx > 0 && rollbacks < self.rollback_budget => {
                    rollbacks += 1;
                    idx -= 1;
                    retries = 0;
                    let record = &mut records[idx];
                    record.accepted.clear();
                    if let Some((owner, restored)) = record.popped.take() {
                        records[owner].accepted.push(restored);
                    }
                    log::debug!("{path}: rolling back to batch {} ({rollbacks}/{})", idx + 1, self.rollback_budget);
                    continue;
                }
                // A rollback that cannot happen is retried like any other bad response
                ValidationOutcome::RetryCurrent | ValidationOutcome::RollbackPrevious
                    if retries < self.retry_budget =>
                {
                    retries += 1;
                    log::debug!("{path}: retrying batch {batch_start}-{batch_end} ({retries}/{})", self.retry_budget);
                    continue;
                }
                ValidationOutcome::Accepted => {}
                exhausted => {
                    log::warn!("{path}: accepting batch {batch_start}-{batch_end} as-is after {exhausted:?} with no budget left");
                }
            }

            let mut accepted = proposals;
            if let Some(carry) = carry {
                if let Some(pos) = accepted.iter().position(|p| p.id == carry.id) {
                    let owner = idx - 1;
                    records[owner].accepted.pop();
                    let continuation = &mut accepted[pos];
                    continuation.start_line = continuation.start_line.min(carry.start_line);
                    continuation.end_line = continuation.end_line.max(carry.end_line);
                    records[idx].popped = Some((owner, carry));
                }
            }
            records[idx].accepted = accepted;
            idx += 1;
            retries = 0;
        }

        Ok(records.into_iter().flat_map(|record| record.accepted).collect())
    }
}

fn build_prompt(
    path: &str,
    lines: &[&str],
    batch_start: usize,
    batch_end: usize,
    carry: Option<&ChunkProposal>,
) -> String {
    let mut prompt = format!("File: {path}\n");
    if let Some(carry) = carry {
        prompt.push_str(&format!(
            "The last chunk of the previous batch was {} (lines {}-{}). \
             Include it again with the same id, extending end_line if it continues below.\n",
            carry.id, carry.start_line, carry.end_line
        ));
    }
    prompt.push_str(&format!("Lines {batch_start}-{batch_end}:\n"));
    for (offset, line) in lines[batch_start - 1..batch_end].iter().enumerate() {
        prompt.push_str(&format!("{}: {line}\n", batch_start + offset));
    }
    prompt
}
