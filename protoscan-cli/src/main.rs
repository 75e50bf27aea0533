mod args;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::Args;
use protoscan_core::{ScanEngine, ScanOptions, ScanOutcome};
use protoscan_output::print_report;
use protoscan_state::ResumeManager;
use protoscan_types::{ProtocolKind, ScanInput};

/// Conventional exit code for "terminated by SIGINT".
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(args).await {
        Ok(Some(outcome)) if outcome.interrupted => {
            eprintln!("scan interrupted; state checkpointed as {}", outcome.scan_id);
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<Option<ScanOutcome>> {
    if args.list_incomplete {
        list_incomplete(&args)?;
        return Ok(None);
    }
    if let Some(hours) = args.cleanup_states {
        let manager = ResumeManager::new(&args.state_dir);
        let removed = manager
            .cleanup_old_states(Duration::from_secs(hours * 3600))
            .context("failed to clean up scan states")?;
        println!("removed {removed} scan state file(s) older than {hours}h");
        return Ok(None);
    }

    let engine = ScanEngine::new(args.threads, Duration::from_millis(args.timeout))
        .with_strict_ports(args.strict_ports);
    let options = ScanOptions {
        show_progress: args.progress,
        csv_output: args.csv.clone(),
        state_dir: args.state_dir.clone(),
    };

    let outcome = if let Some(scan_id) = &args.resume {
        engine
            .resume(scan_id, &options)
            .await
            .with_context(|| format!("failed to resume {scan_id}"))?
    } else {
        let host = match &args.host {
            Some(host) => host.clone(),
            None => bail!("--host is required (or use --resume / --list-incomplete)"),
        };
        let port = match &args.port {
            Some(port) => port.clone(),
            None => bail!("--port is required (or use --resume / --list-incomplete)"),
        };
        let input = ScanInput {
            host,
            port,
            user: args.user.clone(),
            password: args.password.clone(),
            private_key_path: args.private_key.clone(),
        };
        let protocol = ProtocolKind::from_name(&args.protocol);
        engine
            .scan(protocol, &input, &options)
            .await
            .context("scan failed")?
    };

    print_report(&outcome.report);
    Ok(Some(outcome))
}

fn list_incomplete(args: &Args) -> Result<()> {
    let manager = ResumeManager::new(&args.state_dir);
    let scans = manager
        .list_incomplete_scans()
        .context("failed to list incomplete scans")?;

    if scans.is_empty() {
        println!("no incomplete scans in {}", args.state_dir.display());
        return Ok(());
    }

    println!("{:<22} {:<8} {:>9} {:>9} {:>8}  target range", "scan id", "proto", "scanned", "total", "done%");
    for scan in scans {
        println!(
            "{:<22} {:<8} {:>9} {:>9} {:>7.1}%  {} : {}",
            scan.scan_id,
            scan.protocol.to_string(),
            scan.scanned_count,
            scan.total_targets,
            scan.progress_percent(),
            scan.host_range,
            scan.port_range,
        );
    }
    println!("\nresume with: protoscan --resume=<scan id>");
    Ok(())
}
