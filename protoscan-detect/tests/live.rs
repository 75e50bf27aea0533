//! Live-network probe tests, gated on environment variables so CI without
//! lab hosts skips them silently. Example:
//!
//! ```sh
//! TEST_SSH_HOST=192.168.1.10 TEST_SSH_PORT=22 cargo test -p protoscan-detect --test live
//! ```

use std::time::Duration;

use protoscan_detect::Detector;
use protoscan_types::ProtocolKind;

fn env_target(proto: &str) -> Option<(String, u16)> {
    let host = std::env::var(format!("TEST_{proto}_HOST")).ok()?;
    let port = std::env::var(format!("TEST_{proto}_PORT"))
        .ok()?
        .parse()
        .ok()?;
    Some((host, port))
}

async fn run_live(kind: ProtocolKind, env_name: &str) {
    let Some((host, port)) = env_target(env_name) else {
        return;
    };
    let detector = Detector::new(Duration::from_secs(3));
    detector
        .check(kind, &host, port)
        .await
        .unwrap_or_else(|e| panic!("{kind} check against {host}:{port} failed: {e}"));
}

#[tokio::test]
async fn live_rdp() {
    run_live(ProtocolKind::Rdp, "RDP").await;
}

#[tokio::test]
async fn live_ssh() {
    run_live(ProtocolKind::Ssh, "SSH").await;
}

#[tokio::test]
async fn live_ftp() {
    run_live(ProtocolKind::Ftp, "FTP").await;
}

#[tokio::test]
async fn live_telnet() {
    run_live(ProtocolKind::Telnet, "TELNET").await;
}

#[tokio::test]
async fn live_vnc() {
    run_live(ProtocolKind::Vnc, "VNC").await;
}

#[tokio::test]
async fn live_sftp_detection() {
    run_live(ProtocolKind::Sftp, "SFTP").await;
}

#[tokio::test]
async fn live_sftp_authenticated() {
    let Some((host, port)) = env_target("SFTP") else {
        return;
    };
    let Ok(user) = std::env::var("TEST_SFTP_USER") else {
        return;
    };
    let password = std::env::var("TEST_SFTP_PASSWORD").unwrap_or_default();
    let keyfile = std::env::var("TEST_SFTP_KEYFILE").unwrap_or_default();
    let key_password = std::env::var("TEST_SFTP_KEY_PASSWORD").unwrap_or_default();

    let detector = Detector::new(Duration::from_secs(5));
    let password = if keyfile.is_empty() { password } else { key_password };
    detector
        .check_sftp_auth(&host, port, &user, &password, &keyfile)
        .await
        .unwrap_or_else(|e| panic!("authenticated sftp check against {host}:{port} failed: {e}"));
}
