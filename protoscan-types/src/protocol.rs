use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The application-layer protocols a scan can probe for.
///
/// `Common` is the plain TCP reachability check and doubles as the fallback
/// for unrecognized protocol names on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Rdp,
    Ssh,
    Ftp,
    Sftp,
    Telnet,
    Vnc,
    Common,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Rdp => "rdp",
            ProtocolKind::Ssh => "ssh",
            ProtocolKind::Ftp => "ftp",
            ProtocolKind::Sftp => "sftp",
            ProtocolKind::Telnet => "telnet",
            ProtocolKind::Vnc => "vnc",
            ProtocolKind::Common => "common",
        }
    }

    /// Parse a protocol name, falling back to `Common` for anything unknown.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(ProtocolKind::Common)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown protocol: {0}")]
pub struct UnknownProtocol(String);

impl FromStr for ProtocolKind {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rdp" => Ok(ProtocolKind::Rdp),
            "ssh" => Ok(ProtocolKind::Ssh),
            "ftp" => Ok(ProtocolKind::Ftp),
            "sftp" => Ok(ProtocolKind::Sftp),
            "telnet" => Ok(ProtocolKind::Telnet),
            "vnc" => Ok(ProtocolKind::Vnc),
            "common" => Ok(ProtocolKind::Common),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase() {
        assert_eq!(ProtocolKind::Rdp.to_string(), "rdp");
        assert_eq!(ProtocolKind::Sftp.to_string(), "sftp");
        assert_eq!(ProtocolKind::Common.to_string(), "common");
    }

    #[test]
    fn parse_roundtrip() {
        for kind in [
            ProtocolKind::Rdp,
            ProtocolKind::Ssh,
            ProtocolKind::Ftp,
            ProtocolKind::Sftp,
            ProtocolKind::Telnet,
            ProtocolKind::Vnc,
            ProtocolKind::Common,
        ] {
            assert_eq!(kind.as_str().parse::<ProtocolKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_falls_back_to_common() {
        assert_eq!(ProtocolKind::from_name("gopher"), ProtocolKind::Common);
        assert_eq!(ProtocolKind::from_name(""), ProtocolKind::Common);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ProtocolKind::Telnet).unwrap();
        assert_eq!(json, "\"telnet\"");
        let parsed: ProtocolKind = serde_json::from_str("\"vnc\"").unwrap();
        assert_eq!(parsed, ProtocolKind::Vnc);
    }
}
