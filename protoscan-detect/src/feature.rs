use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::common::connect;

/// "At offset `start_index` of the server reply, exactly these bytes."
#[derive(Debug, Clone, Copy)]
pub struct ReceiverFeature {
    pub start_index: usize,
    pub bytes: &'static [u8],
}

/// A send-then-match probe: one fixed client greeting, then an ordered list
/// of byte windows the reply must satisfy. RDP, SSH and FTP all fit this
/// template; only their wire bytes differ.
#[derive(Debug, Clone)]
pub struct FeatureProbe {
    sender: &'static [u8],
    features: &'static [ReceiverFeature],
}

impl FeatureProbe {
    /// X.224 Connection Request TPDU; a real RDP server echoes a Connection
    /// Confirm starting with the same five-byte TPKT/X.224 prefix.
    pub fn rdp() -> Self {
        Self {
            sender: b"\x03\x00\x00\x13\x0e\xe0\x00\x00\x00\x00\x00\x01\x00\x08\x00\x03\x00\x00\x00",
            features: &[ReceiverFeature {
                start_index: 0,
                bytes: b"\x03\x00\x00\x13\x0e",
            }],
        }
    }

    /// An SSH identification string; the reply must look like
    /// `SSH-2.0-...` (version prefix plus the dash after the protocol
    /// version at offset 7).
    pub fn ssh() -> Self {
        Self {
            sender: b"SSH-2.0-OpenSSH_for_Windows_7.7\r\n",
            features: &[
                ReceiverFeature {
                    start_index: 0,
                    bytes: b"SSH-",
                },
                ReceiverFeature {
                    start_index: 7,
                    bytes: b"-",
                },
            ],
        }
    }

    /// A USER command with a throwaway name; any FTP server greets with a
    /// `220` status line before reading it.
    pub fn ftp() -> Self {
        Self {
            sender: b"\r\nUSER wjfR22nDtsd33123Ks36o3q12YJ9rPRrq",
            features: &[ReceiverFeature {
                start_index: 0,
                bytes: b"220",
            }],
        }
    }

    /// Bytes the reply must deliver before the features can be checked.
    pub fn required_len(&self) -> usize {
        self.features
            .iter()
            .map(|f| f.start_index + f.bytes.len())
            .max()
            .unwrap_or(0)
    }

    /// Dial, send the greeting, read exactly the required window, and match
    /// every feature. Any I/O error, deadline expiry, short read, or byte
    /// mismatch fails the probe.
    pub async fn run(&self, host: &str, port: u16, deadline: Duration) -> io::Result<()> {
        let mut stream = connect(host, port, deadline).await?;

        timeout(deadline, stream.write_all(self.sender))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timeout"))??;

        let mut buf = vec![0u8; self.required_len()];
        timeout(deadline, stream.read_exact(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timeout"))??;

        for feature in self.features {
            let window = &buf[feature.start_index..feature.start_index + feature.bytes.len()];
            if window != feature.bytes {
                debug!(
                    offset = feature.start_index,
                    "feature mismatch: got {window:02x?}, want {:02x?}", feature.bytes
                );
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "reply did not match expected feature bytes",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Spawn a one-shot server that reads the greeting then replies with `reply`.
    async fn mock_server(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await;
            stream.write_all(reply).await.unwrap();
        });
        port
    }

    #[test]
    fn required_len_covers_last_feature() {
        assert_eq!(FeatureProbe::rdp().required_len(), 5);
        // SSH: the offset-7 dash extends the window to 8 bytes.
        assert_eq!(FeatureProbe::ssh().required_len(), 8);
        assert_eq!(FeatureProbe::ftp().required_len(), 3);
    }

    #[tokio::test]
    async fn rdp_matches_connection_confirm() {
        let port =
            mock_server(b"\x03\x00\x00\x13\x0e\xd0\x00\x00\x12\x34\x00\x02\x00\x08\x00\x00\x00\x00\x00")
                .await;
        let probe = FeatureProbe::rdp();
        assert!(probe.run("127.0.0.1", port, Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn ssh_matches_banner_with_trailing_bytes() {
        let port = mock_server(b"SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1\r\n").await;
        let probe = FeatureProbe::ssh();
        assert!(probe.run("127.0.0.1", port, Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn ssh_rejects_wrong_banner() {
        let port = mock_server(b"FTP-2.0-NotReallySsh\r\n").await;
        let probe = FeatureProbe::ssh();
        assert!(probe.run("127.0.0.1", port, Duration::from_secs(2)).await.is_err());
    }

    #[tokio::test]
    async fn ftp_matches_220_greeting() {
        let port = mock_server(b"220 Welcome\r\n").await;
        let probe = FeatureProbe::ftp();
        assert!(probe.run("127.0.0.1", port, Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn ftp_rejects_530_reply() {
        let port = mock_server(b"530 Not logged in\r\n").await;
        let probe = FeatureProbe::ftp();
        assert!(probe.run("127.0.0.1", port, Duration::from_secs(2)).await.is_err());
    }

    #[tokio::test]
    async fn short_reply_fails() {
        let port = mock_server(b"SS").await;
        let probe = FeatureProbe::ssh();
        assert!(probe.run("127.0.0.1", port, Duration::from_secs(2)).await.is_err());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let probe = FeatureProbe::rdp();
        let err = probe
            .run("127.0.0.1", port, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
