use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use protoscan_types::GovernorStats;

/// Cap on concurrent connections regardless of thread count.
pub const MAX_CONNECTIONS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("connection admission denied: {0}")]
    AdmissionDenied(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
}

/// Counting semaphore over live TCP connections.
///
/// Permits are RAII: dropping the guard releases the slot, so every exit path
/// of a task releases exactly once.
pub struct ConnectionLimiter {
    permits: Arc<Semaphore>,
    max: usize,
    current: Arc<AtomicUsize>,
    total: Arc<AtomicU64>,
    started: Instant,
}

pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
    current: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConnectionLimiter {
    /// Capacity for a scan with `threads` workers: `min(2 × threads, 500)`.
    pub fn for_threads(threads: usize) -> Self {
        Self::new((threads * 2).min(MAX_CONNECTIONS))
    }

    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
            current: Arc::new(AtomicUsize::new(0)),
            total: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    /// Wait up to `deadline` for a connection slot.
    pub async fn acquire(&self, deadline: Duration) -> Result<ConnectionPermit, GovernorError> {
        let permit = tokio::time::timeout(deadline, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                GovernorError::AdmissionDenied("timed out waiting for a connection slot".into())
            })?
            .map_err(|_| GovernorError::AdmissionDenied("limiter closed".into()))?;

        self.current.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionPermit {
            _permit: permit,
            current: self.current.clone(),
        })
    }

    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            max_connections: self.max,
            current_connections: self.current.load(Ordering::Relaxed),
            total_acquired: self.total.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
        }
    }
}

/// Token bucket limiting probe starts per second.
///
/// The bucket starts full at `rate` tokens; a background task replenishes one
/// token every `1/rate` seconds, discarding when full. `stop` halts the
/// replenisher and closes the bucket so no further acquisition can succeed.
pub struct RateLimiter {
    tokens: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl RateLimiter {
    pub fn new(rate_per_second: usize) -> Self {
        let rate = rate_per_second.max(1);
        let tokens = Arc::new(Semaphore::new(rate));
        let shutdown = CancellationToken::new();

        let bucket = tokens.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs_f64(1.0 / rate as f64);
            // First replenish lands one period out; the bucket starts full.
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("rate limiter replenisher stopped");
                        break;
                    }
                    _ = tick.tick() => {
                        if bucket.available_permits() < rate {
                            bucket.add_permits(1);
                        }
                    }
                }
            }
        });

        Self { tokens, shutdown }
    }

    /// Consume one token, waiting up to `deadline` for one to appear.
    pub async fn wait(&self, deadline: Duration) -> Result<(), GovernorError> {
        let permit = tokio::time::timeout(deadline, self.tokens.acquire())
            .await
            .map_err(|_| GovernorError::RateLimited("timed out waiting for a token".into()))?
            .map_err(|_| GovernorError::RateLimited("limiter stopped".into()))?;
        // Consuming a token means the permit never goes back.
        permit.forget();
        Ok(())
    }

    /// Stop the replenisher and close the bucket.
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.tokens.close();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
