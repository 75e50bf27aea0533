use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolKind;

/// User-supplied scan parameters, kept as the raw expression strings so they
/// can be persisted and replayed verbatim on resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanInput {
    /// Host expression, e.g. `192.168.1.1,10.0.0.0/24,172.20.65.1-254`.
    pub host: String,
    /// Port expression, e.g. `22,80,443,3380-3390`.
    pub port: String,
    pub user: String,
    pub password: String,
    pub private_key_path: String,
}

/// Outcome of probing one `(host, port)` target. Produced exactly once per
/// submitted task, including panics and admission failures.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub protocol: ProtocolKind,
    pub host: String,
    pub port: u16,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub response_time: Duration,
    pub error_message: Option<String>,
}

impl CheckResult {
    pub fn target_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Aggregated per-host results for one scan run.
///
/// Port lists keep aggregator arrival order, which matches submission order
/// per host.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub protocol: Option<ProtocolKind>,
    pub success_ports: HashMap<String, Vec<String>>,
    pub failed_ports: HashMap<String, Vec<String>>,
}

impl ScanReport {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            protocol: Some(protocol),
            success_ports: HashMap::new(),
            failed_ports: HashMap::new(),
        }
    }

    pub fn record(&mut self, result: &CheckResult) {
        let map = if result.success {
            &mut self.success_ports
        } else {
            &mut self.failed_ports
        };
        map.entry(result.host.clone())
            .or_default()
            .push(result.port.to_string());
    }

    pub fn success_count(&self) -> usize {
        self.success_ports.values().map(Vec::len).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.failed_ports.values().map(Vec::len).sum()
    }
}

/// Point-in-time statistics for a running or finished scan.
#[derive(Debug, Clone)]
pub struct ScanStats {
    pub scan_id: String,
    pub protocol: ProtocolKind,
    pub start_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub total_targets: usize,
    pub scanned_targets: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub pending_count: usize,
    pub progress_percent: f64,
    pub avg_response_time: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
    pub elapsed: Duration,
    pub estimated_remaining: Duration,
}

/// Connection-governor usage counters, logged once per scan.
#[derive(Debug, Clone, Copy)]
pub struct GovernorStats {
    pub max_connections: usize,
    pub current_connections: usize,
    pub total_acquired: u64,
    pub uptime: Duration,
}

impl fmt::Display for GovernorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connections: {}/{} (total: {}), uptime: {:.1}s",
            self.current_connections,
            self.max_connections,
            self.total_acquired,
            self.uptime.as_secs_f64()
        )
    }
}
