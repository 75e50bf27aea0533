use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use protoscan_types::CheckResult;

use crate::CsvWriter;

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// How often buffered rows are flushed to disk.
    pub flush_interval: Duration,
    /// Row count that forces an early flush.
    pub max_buffer: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            max_buffer: 1000,
        }
    }
}

/// Time- and size-batched front end for [`CsvWriter`].
///
/// Results are queued onto a channel and written by a dedicated task, so the
/// aggregator never blocks on disk. Stopping flushes whatever is buffered.
pub struct BatchWriter {
    tx: mpsc::Sender<CheckResult>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl BatchWriter {
    pub fn start(writer: CsvWriter, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.max_buffer.max(1));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_flush_loop(writer, rx, config, shutdown.clone()));
        Self { tx, shutdown, task }
    }

    /// Queue one result for writing. Applies backpressure when the queue is
    /// full rather than dropping rows.
    pub async fn write(&self, result: CheckResult) {
        if self.tx.send(result).await.is_err() {
            warn!("batch writer task stopped; dropping csv row");
        }
    }

    /// Flush remaining rows and stop the writer task.
    pub async fn stop(self) {
        self.shutdown.cancel();
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!("batch writer task join error: {e}");
        }
    }
}

async fn run_flush_loop(
    mut writer: CsvWriter,
    mut rx: mpsc::Receiver<CheckResult>,
    config: BatchConfig,
    shutdown: CancellationToken,
) {
    let mut buffer: Vec<CheckResult> = Vec::with_capacity(config.max_buffer);
    let mut tick = tokio::time::interval(config.flush_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut total_written = 0usize;
    let mut batches = 0usize;

    loop {
        tokio::select! {
            maybe_row = rx.recv() => {
                match maybe_row {
                    Some(row) => {
                        buffer.push(row);
                        if buffer.len() >= config.max_buffer {
                            flush(&mut writer, &mut buffer, &mut total_written, &mut batches);
                        }
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                if !buffer.is_empty() {
                    flush(&mut writer, &mut buffer, &mut total_written, &mut batches);
                }
            }
            _ = shutdown.cancelled() => {
                // Drain whatever producers managed to queue before stop.
                while let Ok(row) = rx.try_recv() {
                    buffer.push(row);
                }
                break;
            }
        }
    }

    while let Ok(row) = rx.try_recv() {
        buffer.push(row);
    }
    flush(&mut writer, &mut buffer, &mut total_written, &mut batches);
    if let Err(e) = writer.close() {
        warn!("failed to close csv writer: {e}");
    }
    debug!("batch writer stopped: {total_written} rows in {batches} batches");
}

fn flush(
    writer: &mut CsvWriter,
    buffer: &mut Vec<CheckResult>,
    total_written: &mut usize,
    batches: &mut usize,
) {
    if buffer.is_empty() {
        return;
    }
    for row in buffer.iter() {
        if let Err(e) = writer.write_result(row) {
            warn!("failed to write csv row for {}:{}: {e}", row.host, row.port);
        }
    }
    if let Err(e) = writer.flush() {
        warn!("csv flush failed: {e}");
    }
    *total_written += buffer.len();
    *batches += 1;
    buffer.clear();
}
