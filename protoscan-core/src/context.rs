use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use protoscan_types::{ProtocolKind, ScanSnapshot, ScanStats};

/// Thread-safe progress tracker for one scan.
///
/// Shared by reference between the engine, the result aggregator, and the
/// checkpointing task. A single reader-writer lock guards all mutable state;
/// snapshot accessors copy out under the read lock so checkpoints observe a
/// consistent view.
pub struct ScanContext {
    pub scan_id: String,
    pub protocol: ProtocolKind,
    pub host_range: String,
    pub port_range: String,
    pub threads: usize,
    pub timeout_ms: u64,
    pub start_time: DateTime<Utc>,
    inner: RwLock<Inner>,
}

struct Inner {
    update_time: DateTime<Utc>,
    total: usize,
    scanned: usize,
    success: usize,
    failure: usize,
    completed: HashSet<String>,
    failed: HashSet<String>,
    /// Ordered pending list with tombstones. `pending_index` maps a target
    /// key to its slot, making removal O(1) while preserving order; the Go
    /// original's linear scan does not survive 10k+ targets.
    pending: Vec<Option<String>>,
    pending_index: HashMap<String, usize>,
    pending_live: usize,
    response_sum: Duration,
    response_min: Option<Duration>,
    response_max: Duration,
}

impl ScanContext {
    pub fn new(
        protocol: ProtocolKind,
        host_range: &str,
        port_range: &str,
        threads: usize,
        timeout_ms: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            scan_id: format!("scan_{}", now.timestamp()),
            protocol,
            host_range: host_range.to_string(),
            port_range: port_range.to_string(),
            threads,
            timeout_ms,
            start_time: now,
            inner: RwLock::new(Inner {
                update_time: now,
                total: 0,
                scanned: 0,
                success: 0,
                failure: 0,
                completed: HashSet::new(),
                failed: HashSet::new(),
                pending: Vec::new(),
                pending_index: HashMap::new(),
                pending_live: 0,
                response_sum: Duration::ZERO,
                response_min: None,
                response_max: Duration::ZERO,
            }),
        }
    }

    /// Rebuild a context from a persisted snapshot, keeping its scan id,
    /// counters and target bookkeeping so a resumed run continues where the
    /// interrupted one stopped.
    pub fn from_snapshot(snapshot: &ScanSnapshot) -> Self {
        let ctx = Self {
            scan_id: snapshot.scan_id.clone(),
            protocol: snapshot.protocol,
            host_range: snapshot.host_range.clone(),
            port_range: snapshot.port_range.clone(),
            threads: snapshot.threads,
            timeout_ms: snapshot.timeout_ms,
            start_time: snapshot.start_time,
            inner: RwLock::new(Inner {
                update_time: snapshot.update_time,
                total: snapshot.total_targets,
                scanned: snapshot.scanned_count,
                success: snapshot.success_count,
                failure: snapshot.failure_count,
                completed: snapshot.completed_targets.iter().cloned().collect(),
                failed: snapshot.failed_targets.iter().cloned().collect(),
                pending: Vec::new(),
                pending_index: HashMap::new(),
                pending_live: 0,
                response_sum: Duration::ZERO,
                response_min: None,
                response_max: Duration::ZERO,
            }),
        };
        {
            let mut inner = ctx.inner.write().unwrap();
            for key in &snapshot.pending_targets {
                let slot = inner.pending.len();
                inner.pending.push(Some(key.clone()));
                inner.pending_index.insert(key.clone(), slot);
            }
            inner.pending_live = snapshot.pending_targets.len();
        }
        ctx
    }

    /// Install the full target list. Resets pending bookkeeping.
    pub fn set_targets<I, S>(&self, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.write().unwrap();
        inner.pending.clear();
        inner.pending_index.clear();
        for key in targets {
            let key = key.into();
            let slot = inner.pending.len();
            inner.pending.push(Some(key.clone()));
            inner.pending_index.insert(key, slot);
        }
        inner.pending_live = inner.pending.len();
        inner.total = inner.pending.len();
        inner.update_time = Utc::now();
    }

    pub fn mark_completed(&self, host: &str, port: u16, response_time: Duration) {
        let key = format!("{host}:{port}");
        let mut inner = self.inner.write().unwrap();
        Self::remove_pending(&mut inner, &key);
        inner.completed.insert(key);
        inner.scanned += 1;
        inner.success += 1;
        inner.response_sum += response_time;
        inner.response_min = Some(match inner.response_min {
            Some(min) => min.min(response_time),
            None => response_time,
        });
        inner.response_max = inner.response_max.max(response_time);
        inner.update_time = Utc::now();
    }

    pub fn mark_failed(&self, host: &str, port: u16) {
        let key = format!("{host}:{port}");
        let mut inner = self.inner.write().unwrap();
        Self::remove_pending(&mut inner, &key);
        inner.failed.insert(key);
        inner.scanned += 1;
        inner.failure += 1;
        inner.update_time = Utc::now();
    }

    fn remove_pending(inner: &mut Inner, key: &str) {
        if let Some(slot) = inner.pending_index.remove(key) {
            inner.pending[slot] = None;
            inner.pending_live -= 1;
        }
    }

    pub fn is_completed(&self, host: &str, port: u16) -> bool {
        let key = format!("{host}:{port}");
        let inner = self.inner.read().unwrap();
        inner.completed.contains(&key) || inner.failed.contains(&key)
    }

    pub fn is_complete(&self) -> bool {
        let inner = self.inner.read().unwrap();
        inner.scanned >= inner.total && inner.pending_live == 0
    }

    /// Remaining targets in submission order (defensive copy).
    pub fn pending_targets(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner.pending.iter().flatten().cloned().collect()
    }

    pub fn stats(&self) -> ScanStats {
        let inner = self.inner.read().unwrap();
        let progress = if inner.total == 0 {
            0.0
        } else {
            inner.scanned as f64 / inner.total as f64 * 100.0
        };
        let avg = if inner.success > 0 {
            inner.response_sum / inner.success as u32
        } else {
            Duration::ZERO
        };
        let elapsed = (Utc::now() - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let estimated_remaining = if inner.scanned > 0 {
            elapsed / inner.scanned as u32 * (inner.total - inner.scanned) as u32
        } else {
            Duration::ZERO
        };

        ScanStats {
            scan_id: self.scan_id.clone(),
            protocol: self.protocol,
            start_time: self.start_time,
            update_time: inner.update_time,
            total_targets: inner.total,
            scanned_targets: inner.scanned,
            success_count: inner.success,
            failure_count: inner.failure,
            pending_count: inner.pending_live,
            progress_percent: progress,
            avg_response_time: avg,
            min_response_time: inner.response_min.unwrap_or(Duration::ZERO),
            max_response_time: inner.response_max,
            elapsed,
            estimated_remaining,
        }
    }

    /// Consistent copy for persistence, taken under one read lock. Completed
    /// and failed sets come out sorted for deterministic state files.
    pub fn snapshot(&self) -> ScanSnapshot {
        let inner = self.inner.read().unwrap();
        let mut completed: Vec<String> = inner.completed.iter().cloned().collect();
        completed.sort();
        let mut failed: Vec<String> = inner.failed.iter().cloned().collect();
        failed.sort();
        let mut pending: Vec<String> = inner.pending.iter().flatten().cloned().collect();
        pending.sort();

        ScanSnapshot {
            scan_id: self.scan_id.clone(),
            protocol: self.protocol,
            host_range: self.host_range.clone(),
            port_range: self.port_range.clone(),
            threads: self.threads,
            timeout_ms: self.timeout_ms,
            start_time: self.start_time,
            update_time: inner.update_time,
            total_targets: inner.total,
            scanned_count: inner.scanned,
            success_count: inner.success,
            failure_count: inner.failure,
            completed_targets: completed,
            failed_targets: failed,
            pending_targets: pending,
        }
    }
}
