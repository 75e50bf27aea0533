use chrono::{DateTime, Utc};

use crate::protocol::ProtocolKind;

/// A consistent copy of a scan context, taken under its read lock.
///
/// This is the hand-off shape between the live context and the resume
/// manager: target lists are fully materialized so persistence never has to
/// reach back into shared state.
#[derive(Debug, Clone)]
pub struct ScanSnapshot {
    pub scan_id: String,
    pub protocol: ProtocolKind,
    pub host_range: String,
    pub port_range: String,
    pub threads: usize,
    pub timeout_ms: u64,
    pub start_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub total_targets: usize,
    pub scanned_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub completed_targets: Vec<String>,
    pub failed_targets: Vec<String>,
    pub pending_targets: Vec<String>,
}

impl ScanSnapshot {
    pub fn is_complete(&self) -> bool {
        self.pending_targets.is_empty()
    }
}
