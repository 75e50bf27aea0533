use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

use protoscan_types::CheckResult;

/// Bounded executor for probe tasks.
///
/// At most `threads` tasks run at once; `submit` blocks the caller while the
/// pool is full. Every submitted task emits exactly one [`CheckResult`] on
/// the result channel, even when the task body panics: the panic is caught,
/// logged, and replaced by the caller-provided fallback result.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(threads.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Enqueue one probe task. Blocks until a worker slot frees up.
    pub async fn submit<F>(
        &mut self,
        task: F,
        fallback: CheckResult,
        results: mpsc::Sender<CheckResult>,
    ) where
        F: Future<Output = CheckResult> + Send + 'static,
    {
        // The pool semaphore is never closed while the pool lives.
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore closed");

        self.tasks.spawn(async move {
            let _slot = slot;
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(
                        host = %fallback.host,
                        port = fallback.port,
                        "scan task panicked: {message}"
                    );
                    let mut failed = fallback;
                    failed.error_message = Some(format!("task panicked: {message}"));
                    failed
                }
            };
            if results.send(result).await.is_err() {
                warn!("result channel closed before task completion");
            }
        });
    }

    /// Wait for every in-flight task. Join errors are logged, never
    /// propagated; a panicking task has already produced its fallback result.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!("worker task join error: {e}");
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use protoscan_types::ProtocolKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fallback(host: &str, port: u16) -> CheckResult {
        CheckResult {
            protocol: ProtocolKind::Common,
            host: host.to_string(),
            port,
            success: false,
            timestamp: Utc::now(),
            response_time: Duration::ZERO,
            error_message: None,
        }
    }

    fn ok_result(host: &str, port: u16) -> CheckResult {
        CheckResult {
            success: true,
            ..fallback(host, port)
        }
    }

    #[tokio::test]
    async fn every_task_completes_exactly_once() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut pool = WorkerPool::new(4);

        for port in 0..20u16 {
            let result = ok_result("10.0.0.1", port);
            pool.submit(async move { result }, fallback("10.0.0.1", port), tx.clone())
                .await;
        }
        drop(tx);
        pool.drain().await;

        let mut received = Vec::new();
        while let Some(result) = rx.recv().await {
            received.push(result.port);
        }
        received.sort_unstable();
        assert_eq!(received, (0..20).collect::<Vec<u16>>());
    }

    #[tokio::test]
    async fn panicking_task_emits_fallback_failure() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut pool = WorkerPool::new(2);

        pool.submit(
            async { panic!("probe exploded") },
            fallback("10.0.0.9", 99),
            tx.clone(),
        )
        .await;
        pool.submit(async { ok_result("10.0.0.9", 100) }, fallback("10.0.0.9", 100), tx)
            .await;
        pool.drain().await;

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        assert_eq!(results.len(), 2);

        let panicked = results.iter().find(|r| r.port == 99).unwrap();
        assert!(!panicked.success);
        assert!(panicked
            .error_message
            .as_deref()
            .unwrap()
            .contains("probe exploded"));

        // The pool survived the panic and ran the second task.
        assert!(results.iter().any(|r| r.port == 100 && r.success));
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_pool_size() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut pool = WorkerPool::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for port in 0..12u16 {
            let active = active.clone();
            let peak = peak.clone();
            let result = ok_result("127.0.0.1", port);
            pool.submit(
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    result
                },
                fallback("127.0.0.1", port),
                tx.clone(),
            )
            .await;
        }
        drop(tx);
        pool.drain().await;
        while rx.recv().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
