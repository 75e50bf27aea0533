use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use tracing::debug;

use protoscan_types::ProtocolKind;

use crate::common::connect;
use crate::keypath::validate_private_key_path;
use crate::ProbeError;

/// Client identification used for the detection handshake. Deliberately
/// distinctive so server operators can recognize probe traffic.
const CLIENT_BANNER: &str = "SSH-2.0-ProtocolDetector";
/// Sentinel user for the unauthenticated handshake.
const DETECTION_USER: &str = "protocol-detector";

/// Layer-by-layer record of an SFTP detection attempt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SftpDiagnostics {
    pub tcp_connected: bool,
    pub ssh_banner: String,
    pub ssh_version: String,
    pub sftp_supported: bool,
    pub subsystem_response: String,
    #[serde(rename = "elapsed_time_ms")]
    pub elapsed_ms: u64,
    #[serde(rename = "error_msg")]
    pub error: String,
}

/// Detection-only SFTP probe.
///
/// Three layers: TCP reachability, SSH banner, and a separate transport
/// handshake that asks for the `sftp` subsystem without ever authenticating.
/// A server that requires authentication before a session channel can be
/// opened is reported as "SFTP not detected", not as an error.
pub struct SftpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SftpProbe {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
        }
    }

    pub async fn detect(&self) -> Result<SftpDiagnostics, ProbeError> {
        let (diagnostics, result) = self.diagnose().await;
        result.map(|()| diagnostics)
    }

    /// Run detection and always hand back the diagnostics record, even on
    /// failure.
    pub async fn diagnose(&self) -> (SftpDiagnostics, Result<(), ProbeError>) {
        let start = Instant::now();
        let mut diag = SftpDiagnostics::default();

        // Layer 1: TCP reachability.
        let stream = match connect(&self.host, self.port, self.timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                diag.error = format!("tcp connect failed: {e}");
                diag.elapsed_ms = start.elapsed().as_millis() as u64;
                return (diag, Err(ProbeError::NotFound(ProtocolKind::Sftp)));
            }
        };
        diag.tcp_connected = true;

        // Layer 2: the server's identification line must be SSH.
        let mut reader = BufReader::new(stream);
        let mut banner = String::new();
        match timeout(self.timeout, reader.read_line(&mut banner)).await {
            Ok(Ok(n)) if n > 0 => {}
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                diag.error = "failed to read ssh banner".to_string();
                diag.elapsed_ms = start.elapsed().as_millis() as u64;
                return (diag, Err(ProbeError::NotFound(ProtocolKind::Sftp)));
            }
        }
        diag.ssh_banner = banner.trim().to_string();
        if !diag.ssh_banner.starts_with("SSH-") {
            diag.error = "service is not ssh".to_string();
            diag.elapsed_ms = start.elapsed().as_millis() as u64;
            return (diag, Err(ProbeError::NotFound(ProtocolKind::Sftp)));
        }
        if let Some(version) = diag.ssh_banner.split('-').nth(1) {
            diag.ssh_version = version.to_string();
        }
        drop(reader);

        // Layer 3: fresh connection for the transport handshake; reusing the
        // banner connection would leave the server's key exchange half-read.
        let (supported, response) = self.subsystem_check().await;
        diag.sftp_supported = supported;
        diag.subsystem_response = response;
        diag.elapsed_ms = start.elapsed().as_millis() as u64;

        if supported {
            (diag, Ok(()))
        } else {
            (diag, Err(ProbeError::NotFound(ProtocolKind::Sftp)))
        }
    }

    /// Handshake with an empty authentication method list and request the
    /// `sftp` subsystem on a session channel.
    async fn subsystem_check(&self) -> (bool, String) {
        let host = self.host.clone();
        let port = self.port;
        let deadline = self.timeout / 2;

        let outcome = tokio::task::spawn_blocking(move || -> Result<(bool, String), String> {
            let addr = (host.as_str(), port)
                .to_socket_addrs()
                .map_err(|e| e.to_string())?
                .next()
                .ok_or_else(|| "no address".to_string())?;
            let tcp = std::net::TcpStream::connect_timeout(&addr, deadline)
                .map_err(|e| e.to_string())?;

            let mut session = ssh2::Session::new().map_err(|e| e.to_string())?;
            session.set_timeout(deadline.as_millis() as u32);
            let _ = session.set_banner(CLIENT_BANNER);
            session.set_tcp_stream(tcp);
            if let Err(e) = session.handshake() {
                return Err(e.to_string());
            }

            // "none" authentication: the server answers with its method list,
            // or accepts outright on open servers.
            let _ = session.auth_methods(DETECTION_USER);
            if !session.authenticated() {
                return Ok((false, "authentication required".to_string()));
            }

            let mut channel = session.channel_session().map_err(|e| e.to_string())?;
            let accepted = channel.subsystem("sftp").is_ok();
            let _ = channel.close();
            if accepted {
                Ok((true, "sftp subsystem accepted".to_string()))
            } else {
                Ok((false, "sftp subsystem rejected".to_string()))
            }
        })
        .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!("sftp subsystem check failed: {e}");
                (false, format!("handshake failed: {e}"))
            }
            Err(e) => (false, format!("task failed: {e}")),
        }
    }

    /// Authenticated session test for environments the caller controls.
    /// Authenticates with a password or private key, opens the SFTP channel
    /// and lists `/` to prove it works end to end.
    pub async fn check_with_auth(
        &self,
        user: &str,
        password: &str,
        private_key_path: &str,
    ) -> Result<(), ProbeError> {
        if user.is_empty() {
            // No credentials supplied; fall back to protocol detection.
            return self.detect().await.map(|_| ());
        }
        if !private_key_path.is_empty() {
            validate_private_key_path(private_key_path)?;
        }

        let host = self.host.clone();
        let port = self.port;
        let deadline = self.timeout;
        let user = user.to_string();
        let password = password.to_string();
        let key_path = private_key_path.to_string();

        let outcome = tokio::task::spawn_blocking(move || -> Result<(), String> {
            let addr = (host.as_str(), port)
                .to_socket_addrs()
                .map_err(|e| e.to_string())?
                .next()
                .ok_or_else(|| "no address".to_string())?;
            let tcp = std::net::TcpStream::connect_timeout(&addr, deadline)
                .map_err(|e| e.to_string())?;

            let mut session = ssh2::Session::new().map_err(|e| e.to_string())?;
            session.set_timeout(deadline.as_millis() as u32);
            session.set_tcp_stream(tcp);
            session.handshake().map_err(|e| e.to_string())?;

            if key_path.is_empty() {
                session
                    .userauth_password(&user, &password)
                    .map_err(|e| e.to_string())?;
            } else {
                let passphrase = if password.is_empty() {
                    None
                } else {
                    Some(password.as_str())
                };
                session
                    .userauth_pubkey_file(&user, None, Path::new(&key_path), passphrase)
                    .map_err(|e| e.to_string())?;
            }

            let sftp = session.sftp().map_err(|e| e.to_string())?;
            sftp.readdir(Path::new("/")).map_err(|e| e.to_string())?;
            Ok(())
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!("authenticated sftp check failed: {e}");
                Err(ProbeError::NotFound(ProtocolKind::Sftp))
            }
            Err(_) => Err(ProbeError::NotFound(ProtocolKind::Sftp)),
        }
    }
}
