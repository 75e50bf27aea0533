use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use protoscan_detect::Detector;
use protoscan_output::{BatchConfig, BatchWriter, CsvWriter, OutputError};
use protoscan_state::{ResumeManager, StateError};
use protoscan_types::{CheckResult, ProtocolKind, ScanInput, ScanReport, ScanStats};

use crate::context::ScanContext;
use crate::limits::{ConnectionLimiter, RateLimiter};
use crate::pool::WorkerPool;
use crate::target::{enumerate_targets, parse_hosts, parse_ports, Target, TargetParseError};

/// Upper bound on the worker pool size.
pub const MAX_THREADS: usize = 1000;
/// How often the scan state is checkpointed while a CSV sink is active.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);
/// Progress log cadence when `show_progress` is on.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] TargetParseError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Log per-target results and periodic progress summaries.
    pub show_progress: bool,
    /// Streaming CSV sink; also enables checkpointing and the interrupt
    /// handler so the scan becomes resumable.
    pub csv_output: Option<PathBuf>,
    /// Where scan state files live.
    pub state_dir: PathBuf,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            show_progress: false,
            csv_output: None,
            state_dir: PathBuf::from(protoscan_state::DEFAULT_STATE_DIR),
        }
    }
}

/// What a finished (or interrupted) scan hands back to the caller.
#[derive(Debug)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub report: ScanReport,
    pub stats: ScanStats,
    /// True when the run stopped on cancellation; collected results are
    /// still present and the state file has been checkpointed.
    pub interrupted: bool,
}

/// The scan engine: expands targets, submits one probe task per `(host,
/// port)` through admission control, and aggregates results.
pub struct ScanEngine {
    threads: usize,
    timeout: Duration,
    strict_ports: bool,
}

impl ScanEngine {
    /// Build an engine with a clamped worker count and a defaulted timeout.
    /// Thread counts above [`MAX_THREADS`] are capped with a warning; zero
    /// and negative fall back to one. A zero timeout becomes two seconds.
    pub fn new(threads: i64, timeout: Duration) -> Self {
        let threads = if threads <= 0 {
            1
        } else if threads as usize > MAX_THREADS {
            warn!("thread count clamped to {MAX_THREADS}");
            MAX_THREADS
        } else {
            threads as usize
        };
        let timeout = if timeout.is_zero() {
            Duration::from_secs(2)
        } else {
            timeout
        };
        Self {
            threads,
            timeout,
            strict_ports: false,
        }
    }

    /// Reject port 0 in port expressions.
    pub fn with_strict_ports(mut self, strict: bool) -> Self {
        self.strict_ports = strict;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a full scan over the Cartesian product of the input expressions.
    pub async fn scan(
        &self,
        protocol: ProtocolKind,
        input: &ScanInput,
        options: &ScanOptions,
    ) -> Result<ScanOutcome, EngineError> {
        let host_specs = parse_hosts(&input.host)?;
        let ports = parse_ports(&input.port, self.strict_ports)?;
        let targets = enumerate_targets(&host_specs, &ports);

        let ctx = Arc::new(ScanContext::new(
            protocol,
            &input.host,
            &input.port,
            self.threads,
            self.timeout.as_millis() as u64,
        ));
        ctx.set_targets(targets.iter().map(Target::key));

        self.run_targets(protocol, input, options, ctx, targets).await
    }

    /// Re-run exactly the pending set of an interrupted scan, under the same
    /// scan id. Already-completed and failed targets are not re-probed.
    pub async fn resume(
        &self,
        scan_id: &str,
        options: &ScanOptions,
    ) -> Result<ScanOutcome, EngineError> {
        let manager = ResumeManager::new(&options.state_dir);
        let state = manager.load_scan_state(scan_id)?;

        let protocol = state.protocol;
        let input = state.to_input();
        let snapshot = state.to_snapshot();
        let targets: Vec<Target> = snapshot
            .pending_targets
            .iter()
            .filter_map(|key| Target::from_key(key))
            .collect();
        let ctx = Arc::new(ScanContext::from_snapshot(&snapshot));

        info!(
            scan_id = %ctx.scan_id,
            pending = targets.len(),
            scanned = snapshot.scanned_count,
            "resuming scan"
        );

        let mut options = options.clone();
        if options.csv_output.is_none() && !state.csv_file_path.is_empty() {
            options.csv_output = Some(PathBuf::from(&state.csv_file_path));
        }

        self.run_targets(protocol, &input, &options, ctx, targets).await
    }

    async fn run_targets(
        &self,
        protocol: ProtocolKind,
        input: &ScanInput,
        options: &ScanOptions,
        ctx: Arc<ScanContext>,
        targets: Vec<Target>,
    ) -> Result<ScanOutcome, EngineError> {
        let scan_id = ctx.scan_id.clone();
        info!(
            scan_id = %scan_id,
            targets = targets.len(),
            threads = self.threads,
            timeout_ms = self.timeout.as_millis() as u64,
            "starting scan"
        );

        let detector = Arc::new(Detector::new(self.timeout));
        let connections = Arc::new(ConnectionLimiter::for_threads(self.threads));
        let rate = Arc::new(RateLimiter::new(connections.stats().max_connections));
        let input = Arc::new(input.clone());

        let (tx, mut rx) = mpsc::channel::<CheckResult>(self.threads);
        let report = Arc::new(RwLock::new(ScanReport::new(protocol)));

        // `cancel` aborts submission; `done` winds down the helper tasks.
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();

        let csv_path = options
            .csv_output
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        // CSV sink plus the resume machinery it enables.
        let mut batch = None;
        let mut manager = None;
        let mut helper_tasks = Vec::new();
        if let Some(path) = &options.csv_output {
            let writer = CsvWriter::new(path, &scan_id)?;
            batch = Some(BatchWriter::start(writer, BatchConfig::default()));

            let resume = Arc::new(ResumeManager::new(&options.state_dir));
            // First checkpoint up front: an interrupt during submission must
            // already find a resumable state on disk. State IO is
            // best-effort; the periodic task retries.
            if let Err(e) = resume.save_scan_state(&ctx.snapshot(), &input, &csv_path) {
                warn!("initial checkpoint failed: {e}");
            }

            {
                let resume = resume.clone();
                let ctx = ctx.clone();
                let input = input.clone();
                let csv_path = csv_path.clone();
                let done = done.clone();
                helper_tasks.push(tokio::spawn(async move {
                    let mut tick = tokio::time::interval(CHECKPOINT_INTERVAL);
                    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    tick.tick().await; // first tick fires immediately
                    loop {
                        tokio::select! {
                            _ = done.cancelled() => break,
                            _ = tick.tick() => {
                                if let Err(e) = resume.save_scan_state(&ctx.snapshot(), &input, &csv_path) {
                                    warn!("periodic checkpoint failed: {e}");
                                }
                            }
                        }
                    }
                }));
            }
            {
                let resume = resume.clone();
                let ctx = ctx.clone();
                let input = input.clone();
                let csv_path = csv_path.clone();
                let done = done.clone();
                let cancel = cancel.clone();
                helper_tasks.push(tokio::spawn(async move {
                    tokio::select! {
                        _ = done.cancelled() => {}
                        _ = shutdown_signal() => {
                            info!("interrupt received, saving scan state");
                            match resume.save_scan_state(&ctx.snapshot(), &input, &csv_path) {
                                Ok(_) => info!("scan state saved; use --resume={} to continue", ctx.scan_id),
                                Err(e) => warn!("failed to save scan state: {e}"),
                            }
                            cancel.cancel();
                        }
                    }
                }));
            }
            manager = Some(resume);
        }

        if options.show_progress {
            let ctx = ctx.clone();
            let done = done.clone();
            helper_tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(PROGRESS_INTERVAL);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = done.cancelled() => break,
                        _ = tick.tick() => {
                            let stats = ctx.stats();
                            info!(
                                scan_id = %stats.scan_id,
                                "progress: {:.1}% ({}/{}) success: {} failed: {} elapsed: {:.1}s",
                                stats.progress_percent,
                                stats.scanned_targets,
                                stats.total_targets,
                                stats.success_count,
                                stats.failure_count,
                                stats.elapsed.as_secs_f64()
                            );
                        }
                    }
                }
            }));
        }

        // Single consumer of the result channel: updates the host maps and
        // the context, mirrors rows into the CSV sink, and drains the
        // channel before exiting. A result always becomes visible in the
        // report before the context counts it.
        let aggregator = {
            let ctx = ctx.clone();
            let report = report.clone();
            tokio::spawn(async move {
                while let Some(result) = rx.recv().await {
                    {
                        let mut map = report.write().await;
                        map.record(&result);
                    }
                    if result.success {
                        ctx.mark_completed(&result.host, result.port, result.response_time);
                    } else {
                        ctx.mark_failed(&result.host, result.port);
                    }
                    if let Some(batch) = &batch {
                        batch.write(result).await;
                    }
                }
                if let Some(batch) = batch {
                    batch.stop().await;
                }
            })
        };

        // Submit one task per target; the pool blocks when full, and
        // cancellation stops new submissions while in-flight work finishes.
        let mut pool = WorkerPool::new(self.threads);
        let mut interrupted = false;
        for target in targets {
            if cancel.is_cancelled() {
                interrupted = true;
                info!("cancellation observed, halting submission");
                break;
            }
            let fallback = CheckResult {
                protocol,
                host: target.host.clone(),
                port: target.port,
                success: false,
                timestamp: Utc::now(),
                response_time: Duration::ZERO,
                error_message: None,
            };
            let task = probe_target(
                detector.clone(),
                connections.clone(),
                rate.clone(),
                input.clone(),
                protocol,
                target,
                self.timeout,
                options.show_progress,
            );
            pool.submit(task, fallback, tx.clone()).await;
        }

        drop(tx);
        pool.drain().await;
        if cancel.is_cancelled() {
            interrupted = true;
        }

        // All senders are gone, so the aggregator drains and exits; only
        // then is the rate limiter closed and the channel provably idle.
        if let Err(e) = aggregator.await {
            warn!("aggregator task failed: {e}");
        }
        rate.stop();
        info!("scan governors: {}", connections.stats());

        if let Some(resume) = &manager {
            // Final checkpoint; a complete scan leaves the incomplete index.
            if let Err(e) = resume.save_scan_state(&ctx.snapshot(), &input, &csv_path) {
                warn!("final checkpoint failed: {e}");
            }
        }

        done.cancel();
        for task in helper_tasks {
            let _ = task.await;
        }

        let stats = ctx.stats();
        info!(
            scan_id = %stats.scan_id,
            "scan finished: {:.1}% ({}/{}) success: {} failed: {} duration: {:.1}s",
            stats.progress_percent,
            stats.scanned_targets,
            stats.total_targets,
            stats.success_count,
            stats.failure_count,
            stats.elapsed.as_secs_f64()
        );

        let report = report.read().await.clone();
        Ok(ScanOutcome {
            scan_id,
            report,
            stats,
            interrupted,
        })
    }
}

/// Completes on SIGINT, and on SIGTERM where that exists.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// One probe task: admission (connection slot, then rate token), the probe
/// itself, and the single `CheckResult` it resolves to. The connection
/// permit is RAII so it is released on every exit path.
#[allow(clippy::too_many_arguments)]
async fn probe_target(
    detector: Arc<Detector>,
    connections: Arc<ConnectionLimiter>,
    rate: Arc<RateLimiter>,
    input: Arc<ScanInput>,
    protocol: ProtocolKind,
    target: Target,
    timeout: Duration,
    show_progress: bool,
) -> CheckResult {
    let started = Instant::now();
    let mut result = CheckResult {
        protocol,
        host: target.host,
        port: target.port,
        success: false,
        timestamp: Utc::now(),
        response_time: Duration::ZERO,
        error_message: None,
    };

    let _permit = match connections.acquire(timeout).await {
        Ok(permit) => permit,
        Err(e) => {
            warn!("failed to acquire connection for {}:{}: {e}", result.host, result.port);
            result.error_message = Some(e.to_string());
            result.response_time = started.elapsed();
            return result;
        }
    };

    if let Err(e) = rate.wait(timeout).await {
        warn!("rate limit hit for {}:{}: {e}", result.host, result.port);
        result.error_message = Some(e.to_string());
        result.response_time = started.elapsed();
        return result;
    }

    match detector.check(protocol, &result.host, result.port).await {
        Ok(()) => {
            result.success = true;
            // Caller-supplied credentials turn a detected SFTP endpoint into
            // a full login test against their own environment. The outcome
            // is logged, not folded into the detection result.
            if protocol == ProtocolKind::Sftp && !input.user.is_empty() {
                match detector
                    .check_sftp_auth(
                        &result.host,
                        result.port,
                        &input.user,
                        &input.password,
                        &input.private_key_path,
                    )
                    .await
                {
                    Ok(()) => info!("authenticated sftp session verified on {}:{}", result.host, result.port),
                    Err(e) => info!("authenticated sftp test on {}:{} failed: {e}", result.host, result.port),
                }
            }
        }
        Err(e) => result.error_message = Some(e.to_string()),
    }
    result.response_time = started.elapsed();

    if show_progress {
        debug!(
            "{} {}:{} {} ({:?})",
            protocol, result.host, result.port, result.success, result.response_time
        );
    }
    result
}
