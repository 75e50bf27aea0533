use std::fmt::Write;

use protoscan_types::ScanReport;

const SEPARATOR: &str = "==========================================================";

/// Render the success map as the classic CLI summary block. Hosts are sorted
/// so repeated runs print identically.
pub fn format_report(report: &ScanReport) -> String {
    let mut out = String::new();
    let protocol = report
        .protocol
        .map(|p| p.to_string())
        .unwrap_or_else(|| "scan".to_string());

    writeln!(out, "{SEPARATOR}").unwrap();
    writeln!(out, "{protocol} Scan Result:").unwrap();

    let mut hosts: Vec<&String> = report.success_ports.keys().collect();
    hosts.sort();
    for host in hosts {
        writeln!(out, "{host}:{}", report.success_ports[host].join(",")).unwrap();
    }
    writeln!(out, "{SEPARATOR}").unwrap();
    out
}

pub fn print_report(report: &ScanReport) {
    print!("{}", format_report(report));
}
