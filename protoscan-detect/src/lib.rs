//! Client-side protocol detectors.
//!
//! Each probe opens a fresh TCP connection, exchanges the minimum bytes that
//! identify the protocol, and reports success or `ProbeError::NotFound`.
//! Probes hold no state between invocations; the [`Detector`] owns their wire
//! definitions and the shared timeout.

mod common;
mod feature;
mod keypath;
mod sftp;
mod telnet;
mod vnc;

use std::time::Duration;

use protoscan_types::ProtocolKind;

pub use feature::{FeatureProbe, ReceiverFeature};
pub use keypath::{is_safe_filename, validate_private_key_path};
pub use sftp::{SftpDiagnostics, SftpProbe};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The endpoint did not speak the expected protocol. Covers dial
    /// failures, timeouts, truncated reads, and feature mismatches alike;
    /// callers cannot distinguish them, by contract.
    #[error("{0} not found")]
    NotFound(ProtocolKind),
    #[error("common port unreachable")]
    Unreachable,
    #[error("invalid private key path: {0}")]
    KeyPath(String),
}

/// One detector instance per scan: immutable probe definitions plus the
/// scan-wide timeout applied as both dial and read deadline.
pub struct Detector {
    timeout: Duration,
    rdp: FeatureProbe,
    ssh: FeatureProbe,
    ftp: FeatureProbe,
}

impl Detector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            rdp: FeatureProbe::rdp(),
            ssh: FeatureProbe::ssh(),
            ftp: FeatureProbe::ftp(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the detection probe for `kind` against `host:port`.
    ///
    /// This is detection only: the SFTP arm never authenticates. See
    /// [`Detector::check_sftp_auth`] for the opt-in credentialed test.
    pub async fn check(
        &self,
        kind: ProtocolKind,
        host: &str,
        port: u16,
    ) -> Result<(), ProbeError> {
        match kind {
            ProtocolKind::Rdp => self.check_rdp(host, port).await,
            ProtocolKind::Ssh => self.check_ssh(host, port).await,
            ProtocolKind::Ftp => self.check_ftp(host, port).await,
            ProtocolKind::Sftp => self.check_sftp(host, port).await,
            ProtocolKind::Telnet => self.check_telnet(host, port).await,
            ProtocolKind::Vnc => self.check_vnc(host, port).await,
            ProtocolKind::Common => self.check_common(host, port).await,
        }
    }

    pub async fn check_rdp(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        self.rdp
            .run(host, port, self.timeout)
            .await
            .map_err(|_| ProbeError::NotFound(ProtocolKind::Rdp))
    }

    pub async fn check_ssh(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        self.ssh
            .run(host, port, self.timeout)
            .await
            .map_err(|_| ProbeError::NotFound(ProtocolKind::Ssh))
    }

    pub async fn check_ftp(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        self.ftp
            .run(host, port, self.timeout)
            .await
            .map_err(|_| ProbeError::NotFound(ProtocolKind::Ftp))
    }

    pub async fn check_sftp(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        SftpProbe::new(host, port, self.timeout)
            .detect()
            .await
            .map(|_| ())
    }

    /// SFTP detection with the full three-layer diagnostics record.
    pub async fn check_sftp_diagnostics(
        &self,
        host: &str,
        port: u16,
    ) -> (SftpDiagnostics, Result<(), ProbeError>) {
        SftpProbe::new(host, port, self.timeout).diagnose().await
    }

    /// Authenticated SFTP session test. Only meaningful when the caller has
    /// supplied credentials for an environment they control; never part of
    /// the default detection path.
    pub async fn check_sftp_auth(
        &self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        private_key_path: &str,
    ) -> Result<(), ProbeError> {
        SftpProbe::new(host, port, self.timeout)
            .check_with_auth(user, password, private_key_path)
            .await
    }

    pub async fn check_telnet(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        match telnet::negotiate(host, port, self.timeout).await {
            Ok(n) if n > 0 => Ok(()),
            _ => Err(ProbeError::NotFound(ProtocolKind::Telnet)),
        }
    }

    pub async fn check_vnc(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        vnc::check(host, port, self.timeout)
            .await
            .map_err(|_| ProbeError::NotFound(ProtocolKind::Vnc))
    }

    pub async fn check_common(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        common::connect(host, port, self.timeout)
            .await
            .map(|_| ())
            .map_err(|_| ProbeError::Unreachable)
    }
}
