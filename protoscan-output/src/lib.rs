//! Result sinks for scan output: an append-only CSV writer, a time/size
//! batched wrapper around it, and the human-readable stdout report.

mod batch;
mod csv;
mod stdout;

pub use batch::{BatchConfig, BatchWriter};
pub use csv::CsvWriter;
pub use stdout::{format_report, print_report};

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("output io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv writer is closed")]
    Closed,
}
