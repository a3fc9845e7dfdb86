use crate::error::{IndexerError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_MODEL_CONCURRENCY: usize = 20;
const MAX_MODEL_CONCURRENCY: usize = 64;
const MODEL_CONCURRENCY_ENV: &str = "REPOGRAPH_MODEL_CONCURRENCY";

static MODEL_CONCURRENCY_LIMIT: OnceLock<usize> = OnceLock::new();
static MODEL_CONCURRENCY_WAITERS: AtomicUsize = AtomicUsize::new(0);
static MODEL_CONCURRENCY_IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Point-in-time view of the process-wide model call limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConcurrencySnapshot {
    pub limit: usize,
    pub in_flight: usize,
    pub waiters: usize,
}

fn parse_model_concurrency(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_MODEL_CONCURRENCY)
}

fn model_concurrency_from_env() -> usize {
    let raw = std::env::var(MODEL_CONCURRENCY_ENV).ok();
    parse_model_concurrency(raw.as_deref(), DEFAULT_MODEL_CONCURRENCY)
}

fn semaphore() -> Arc<Semaphore> {
    static SEM: OnceLock<Arc<Semaphore>> = OnceLock::new();
    SEM.get_or_init(|| {
        let limit = *MODEL_CONCURRENCY_LIMIT.get_or_init(model_concurrency_from_env);
        log::debug!("Model concurrency limit: {limit}");
        Arc::new(Semaphore::new(limit))
    })
    .clone()
}

#[must_use]
pub fn model_concurrency_snapshot() -> ModelConcurrencySnapshot {
    let limit = *MODEL_CONCURRENCY_LIMIT.get_or_init(model_concurrency_from_env);
    ModelConcurrencySnapshot {
        limit,
        in_flight: MODEL_CONCURRENCY_IN_FLIGHT.load(Ordering::Relaxed),
        waiters: MODEL_CONCURRENCY_WAITERS.load(Ordering::Relaxed),
    }
}

/// Held for the duration of one model call
pub struct ModelPermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for ModelPermit {
    fn drop(&mut self) {
        MODEL_CONCURRENCY_IN_FLIGHT.fetch_sub(1, Ordering::Relaxed);
    }
}

struct WaiterGuard;

impl WaiterGuard {
    fn new() -> Self {
        MODEL_CONCURRENCY_WAITERS.fetch_add(1, Ordering::Relaxed);
        Self
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        MODEL_CONCURRENCY_WAITERS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Wait for a slot on the process-wide model semaphore
pub async fn acquire_model_permit() -> Result<ModelPermit> {
    let waiter = WaiterGuard::new();
    let permit = semaphore()
        .acquire_owned()
        .await
        .map_err(|_| IndexerError::Model("model concurrency semaphore closed".to_string()))?;
    drop(waiter);
    MODEL_CONCURRENCY_IN_FLIGHT.fetch_add(1, Ordering::Relaxed);
    Ok(ModelPermit { _permit: permit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_model_concurrency_defaults_and_clamps() {
        let default_value = DEFAULT_MODEL_CONCURRENCY;
        assert_eq!(parse_model_concurrency(None, default_value), 20);
        assert_eq!(parse_model_concurrency(Some(""), default_value), 20);
        assert_eq!(parse_model_concurrency(Some("   "), default_value), 20);
        assert_eq!(parse_model_concurrency(Some("2"), default_value), 2);
        assert_eq!(parse_model_concurrency(Some("0"), default_value), 1);
        assert_eq!(
            parse_model_concurrency(Some("999"), default_value),
            MAX_MODEL_CONCURRENCY
        );
        assert_eq!(parse_model_concurrency(Some("abc"), default_value), 20);
        assert_eq!(parse_model_concurrency(Some(" 5 "), default_value), 5);
    }

    #[tokio::test]
    async fn permit_is_counted_while_held() {
        let permit = acquire_model_permit().await.unwrap();
        let snapshot = model_concurrency_snapshot();
        assert!(snapshot.in_flight >= 1);
        assert!(snapshot.limit >= 1);
        drop(permit);
    }
}
