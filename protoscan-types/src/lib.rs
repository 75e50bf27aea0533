pub mod protocol;
pub mod result;
pub mod snapshot;

pub use protocol::ProtocolKind;
pub use result::{CheckResult, GovernorStats, ScanInput, ScanReport, ScanStats};
pub use snapshot::ScanSnapshot;
