//! Bounded, retrying access to the embedding and generation services.
//!
//! Every outbound call goes through a [`GatewayPool`]:
//!
//! - a semaphore caps in-flight calls at `gateway.max_concurrency`,
//! - each attempt runs under `gateway.timeout_ms`,
//! - transient failures (429, 5xx, network, timeout) are retried up to
//!   `gateway.max_retries` times with exponential backoff,
//! - malformed-input failures ([`RagError::InvalidInput`],
//!   [`RagError::DimensionMismatch`]) fail on the first attempt.
//!
//! The permit is held only while an attempt is in flight, never across a
//! backoff sleep.
//!
//! [`PooledEmbedder`] and [`PooledGenerator`] wrap a raw gateway so the rest
//! of the crate only ever sees pooled ones.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use travel_rag_core::assemble::GenerationRequest;
use travel_rag_core::embedding::EmbeddingGateway;
use travel_rag_core::generation::GenerationGateway;
use travel_rag_core::{RagError, Result};

use crate::config::GatewayConfig;

/// Longest backoff exponent; delays stop growing after `base * 32`.
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl From<&GatewayConfig> for RetryPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            base_backoff: config.base_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff * (1u32 << exponent)
    }
}

/// Counts one in-flight attempt until dropped, including when the
/// attempt is abandoned mid-await.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (Self(counter), now)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct GatewayPool {
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GatewayPool {
    pub fn new(max_concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            policy,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.max_concurrency, RetryPolicy::from(config))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Highest number of simultaneous in-flight attempts observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Run `op` with the pool's concurrency, timeout and retry policy.
    ///
    /// `op` is invoked once per attempt.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| RagError::Cancelled)?;
                let (_in_flight, now) = InFlight::enter(&self.in_flight);
                self.peak.fetch_max(now, Ordering::SeqCst);

                match tokio::time::timeout(self.policy.timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(RagError::GatewayTimeout {
                        timeout_ms: self.policy.timeout.as_millis() as u64,
                    }),
                }
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(gateway = label, attempt, "gateway call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        gateway = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient gateway failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Embedding gateway behind a [`GatewayPool`], split into batches of at
/// most `batch_size` texts per call.
pub struct PooledEmbedder {
    inner: Arc<dyn EmbeddingGateway>,
    pool: Arc<GatewayPool>,
    batch_size: usize,
}

impl PooledEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingGateway>, pool: Arc<GatewayPool>, batch_size: usize) -> Self {
        Self {
            inner,
            pool,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for PooledEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let inner = &self.inner;
            let out = self.pool.call("embedding", || inner.embed(batch)).await?;
            if out.len() != batch.len() {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "expected {} vectors, gateway returned {}",
                    batch.len(),
                    out.len()
                )));
            }
            for v in &out {
                if v.len() != self.inner.dims() {
                    return Err(RagError::DimensionMismatch {
                        model_id: self.inner.model_id().to_string(),
                        expected: self.inner.dims(),
                        actual: v.len(),
                    });
                }
            }
            vectors.extend(out);
        }
        Ok(vectors)
    }
}

pub struct PooledGenerator {
    inner: Arc<dyn GenerationGateway>,
    pool: Arc<GatewayPool>,
}

impl PooledGenerator {
    pub fn new(inner: Arc<dyn GenerationGateway>, pool: Arc<GatewayPool>) -> Self {
        Self { inner, pool }
    }
}

#[async_trait]
impl GenerationGateway for PooledGenerator {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let inner = &self.inner;
        self.pool.call("generation", || inner.generate(request)).await
    }
}

/// Send a JSON request and classify the outcome.
///
/// 429 and 5xx responses and connection failures map to `unavailable`;
/// any other non-success status is [`RagError::InvalidInput`].
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    service: &str,
    unavailable: fn(String) -> RagError,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| unavailable(format!("{} connection error: {}", service, e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| unavailable(format!("{} returned invalid JSON: {}", service, e)));
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(unavailable(message))
    } else {
        Err(RagError::InvalidInput(message))
    }
}
