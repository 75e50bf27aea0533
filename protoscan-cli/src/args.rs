use std::path::PathBuf;

use clap::Parser;

/// protoscan: multi-protocol network probe
#[derive(Parser, Debug)]
#[command(
    name = "protoscan",
    version,
    about = "Concurrent application-protocol scanner",
    long_about = "Probes host/port ranges for RDP, SSH, FTP, SFTP, Telnet, VNC or plain \
                  TCP reachability.\nExample: protoscan --protocol=rdp --host=172.20.65.89-101 --port=3389"
)]
pub struct Args {
    /// Protocol to probe: rdp | ssh | ftp | sftp | telnet | vnc | common
    #[arg(long, default_value = "common", value_name = "PROTO")]
    pub protocol: String,

    /// Host expression: single IPs, last-octet ranges, CIDR blocks
    /// (e.g. "192.168.1.1,192.168.1.100-254,192.168.1.0/24")
    #[arg(long, value_name = "EXPR")]
    pub host: Option<String>,

    /// Port expression (e.g. "22,80,443,3380-3390")
    #[arg(long, value_name = "EXPR")]
    pub port: Option<String>,

    /// Number of concurrent workers
    #[arg(long = "thread", default_value = "10", value_name = "N")]
    pub threads: i64,

    /// Per-connection timeout in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub timeout: u64,

    /// User name for the authenticated SFTP test (SFTP only)
    #[arg(long, default_value = "", value_name = "NAME")]
    pub user: String,

    /// Password or private-key passphrase (SFTP only)
    #[arg(long, default_value = "", value_name = "SECRET")]
    pub password: String,

    /// Private key path for the authenticated SFTP test (SFTP only)
    #[arg(long = "prikey", default_value = "", value_name = "PATH")]
    pub private_key: String,

    /// Stream results to a CSV file; also enables checkpointing and resume
    #[arg(long, value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Directory for scan state files
    #[arg(long = "state-dir", default_value = protoscan_state::DEFAULT_STATE_DIR, value_name = "DIR")]
    pub state_dir: PathBuf,

    /// Resume an interrupted scan by id (e.g. scan_1700000000)
    #[arg(long, value_name = "SCAN_ID", conflicts_with_all = ["host", "port"])]
    pub resume: Option<String>,

    /// List resumable scans and exit
    #[arg(long = "list-incomplete")]
    pub list_incomplete: bool,

    /// Remove scan state files older than N hours and exit
    #[arg(long = "cleanup-states", value_name = "HOURS")]
    pub cleanup_states: Option<u64>,

    /// Reject port 0 (restrict port expressions to 1-65535)
    #[arg(long = "strict-ports")]
    pub strict_ports: bool,

    /// Log per-target results and periodic progress
    #[arg(long)]
    pub progress: bool,

    /// Increase verbosity (-v info is default; -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
