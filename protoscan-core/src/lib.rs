//! Scan orchestration: expression parsing, resource governors, the bounded
//! worker pool, the live scan context, and the engine tying them together.

pub mod context;
pub mod engine;
pub mod limits;
pub mod pool;
pub mod target;

pub use context::ScanContext;
pub use engine::{EngineError, ScanEngine, ScanOptions, ScanOutcome};
pub use limits::{ConnectionLimiter, GovernorError, RateLimiter};
pub use pool::WorkerPool;
pub use target::{
    enumerate_targets, parse_hosts, parse_ports, HostSpec, Target, TargetParseError,
    MAX_HOST_RANGE, MAX_TOTAL_PORTS,
};
