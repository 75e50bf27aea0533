use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use protoscan_types::CheckResult;

use crate::OutputError;

const HEADERS: &str = "timestamp,scan_id,protocol,host,port,status,response_time,error_message";

/// Append-only CSV sink for scan results.
///
/// Opens the file in append mode so an interrupted scan's output survives a
/// resume; the header row is written only when the file is new or empty.
pub struct CsvWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    scan_id: String,
    closed: bool,
}

impl CsvWriter {
    pub fn new(path: impl AsRef<Path>, scan_id: &str) -> Result<Self, OutputError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = Self {
            writer: BufWriter::new(file),
            path,
            scan_id: scan_id.to_string(),
            closed: false,
        };
        if needs_header {
            writeln!(writer.writer, "{HEADERS}")?;
            writer.writer.flush()?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_result(&mut self, result: &CheckResult) -> Result<(), OutputError> {
        if self.closed {
            return Err(OutputError::Closed);
        }
        let status = if result.success { "success" } else { "failed" };
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{}ms,{}",
            result.timestamp.format("%Y-%m-%d %H:%M:%S"),
            escape(&self.scan_id),
            result.protocol,
            escape(&result.host),
            result.port,
            status,
            result.response_time.as_millis(),
            escape(result.error_message.as_deref().unwrap_or("")),
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        if self.closed {
            return Err(OutputError::Closed);
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), OutputError> {
        if self.closed {
            return Ok(());
        }
        self.writer.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// Quote fields containing separators or quotes; neutralize leading
/// formula characters so exported files open safely in spreadsheets.
fn escape(s: &str) -> String {
    let needs_quoting = s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r');
    let has_formula_prefix = matches!(s.as_bytes().first(), Some(b'=' | b'+' | b'-' | b'@'));

    if has_formula_prefix {
        format!("\"'{}\"", s.replace('"', "\"\""))
    } else if needs_quoting {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use protoscan_types::ProtocolKind;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    static FILE_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_csv() -> PathBuf {
        std::env::temp_dir().join(format!(
            "protoscan_csv_test_{}_{}.csv",
            std::process::id(),
            FILE_SEQ.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn result(success: bool, error: Option<&str>) -> CheckResult {
        CheckResult {
            protocol: ProtocolKind::Rdp,
            host: "10.0.0.1".to_string(),
            port: 3389,
            success,
            timestamp: Utc::now(),
            response_time: Duration::from_millis(42),
            error_message: error.map(|s| s.to_string()),
        }
    }

    #[test]
    fn header_written_once_for_new_file() {
        let path = temp_csv();
        {
            let mut writer = CsvWriter::new(&path, "scan_1").unwrap();
            writer.write_result(&result(true, None)).unwrap();
            writer.close().unwrap();
        }
        {
            // Reopen in append mode: no second header.
            let mut writer = CsvWriter::new(&path, "scan_1").unwrap();
            writer.write_result(&result(false, Some("rdp not found"))).unwrap();
            writer.close().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADERS);
        assert!(lines[1].contains(",rdp,10.0.0.1,3389,success,42ms,"));
        assert!(lines[2].contains(",failed,42ms,rdp not found"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn closed_writer_rejects_writes() {
        let path = temp_csv();
        let mut writer = CsvWriter::new(&path, "scan_2").unwrap();
        writer.close().unwrap();
        assert!(matches!(
            writer.write_result(&result(true, None)),
            Err(OutputError::Closed)
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn escape_quotes_and_commas() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn escape_neutralizes_formula_prefixes() {
        assert_eq!(escape("=SUM(A1)"), "\"'=SUM(A1)\"");
        assert_eq!(escape("+1"), "\"'+1\"");
    }

    #[test]
    fn error_message_with_comma_is_quoted() {
        let path = temp_csv();
        let mut writer = CsvWriter::new(&path, "scan_3").unwrap();
        writer
            .write_result(&result(false, Some("dial failed, address unreachable")))
            .unwrap();
        writer.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"dial failed, address unreachable\""));
        let _ = std::fs::remove_file(&path);
    }
}
