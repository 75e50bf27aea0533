use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use thiserror::Error;

/// Hard cap on a single `A.B.C.D-E` range expansion.
pub const MAX_HOST_RANGE: usize = 1000;
/// Hard cap on the cumulative expanded port count across all specs.
pub const MAX_TOTAL_PORTS: usize = 10_000;

#[derive(Debug, Error)]
pub enum TargetParseError {
    #[error("host expression is empty")]
    EmptyHost,
    #[error("port expression is empty")]
    EmptyPort,
    #[error("invalid IP address: {0}")]
    InvalidIp(String),
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("host range too large: {size} addresses (maximum {MAX_HOST_RANGE})")]
    HostRangeTooLarge { size: usize },
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid port range: start {0} > end {1}")]
    InvalidPortRange(u16, u16),
    #[error("too many ports: {total} expanded (maximum {MAX_TOTAL_PORTS})")]
    TooManyPorts { total: usize },
}

/// One element of a host expression.
#[derive(Debug, Clone)]
pub enum HostSpec {
    Single(Ipv4Addr),
    /// `A.B.C.D-E`: the base address with its last octet swept over
    /// `[start, end]` inclusive.
    OctetRange {
        base: Ipv4Addr,
        start: u8,
        end: u8,
    },
    Cidr(Ipv4Network),
}

impl HostSpec {
    pub fn len(&self) -> usize {
        match self {
            HostSpec::Single(_) => 1,
            HostSpec::OctetRange { start, end, .. } => (*end as usize) - (*start as usize) + 1,
            HostSpec::Cidr(net) => cidr_host_count(net),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerate the addresses of this spec in declaration order. Every item
    /// is a freshly built `Ipv4Addr`; nothing is mutated in place, so the
    /// yielded addresses are safe to move across tasks.
    pub fn iter(&self) -> Box<dyn Iterator<Item = Ipv4Addr> + '_> {
        match self {
            HostSpec::Single(ip) => Box::new(std::iter::once(*ip)),
            HostSpec::OctetRange { base, start, end } => {
                let octets = base.octets();
                Box::new(
                    (*start..=*end)
                        .map(move |d| Ipv4Addr::new(octets[0], octets[1], octets[2], d)),
                )
            }
            HostSpec::Cidr(net) => Box::new(cidr_hosts(net)),
        }
    }
}

/// Host count of a CIDR block: the network and broadcast addresses are not
/// probed for prefixes shorter than /31, matching conventional host
/// enumeration (a /24 yields 254 targets).
fn cidr_host_count(net: &Ipv4Network) -> usize {
    let size = net.size() as usize;
    if net.prefix() >= 31 {
        size
    } else {
        size.saturating_sub(2)
    }
}

fn cidr_hosts(net: &Ipv4Network) -> impl Iterator<Item = Ipv4Addr> + '_ {
    let skip_edges = net.prefix() < 31;
    let network = net.network();
    let broadcast = net.broadcast();
    net.iter()
        .filter(move |ip| !skip_edges || (*ip != network && *ip != broadcast))
}

/// Parse a `,`-separated host expression: single IPv4 addresses, `A.B.C.D-E`
/// last-octet ranges, and CIDR blocks. Declaration order is preserved.
pub fn parse_hosts(input: &str) -> Result<Vec<HostSpec>, TargetParseError> {
    if input.trim().is_empty() {
        return Err(TargetParseError::EmptyHost);
    }

    let mut specs = Vec::new();
    for element in input.split(',') {
        let element = element.trim();
        if element.contains('/') {
            let net: Ipv4Network = element
                .parse()
                .map_err(|e| TargetParseError::InvalidCidr(format!("{element}: {e}")))?;
            specs.push(HostSpec::Cidr(net));
        } else if element.contains('-') {
            specs.push(parse_octet_range(element)?);
        } else {
            let ip: Ipv4Addr = element
                .parse()
                .map_err(|_| TargetParseError::InvalidIp(element.to_string()))?;
            specs.push(HostSpec::Single(ip));
        }
    }
    Ok(specs)
}

fn parse_octet_range(element: &str) -> Result<HostSpec, TargetParseError> {
    let mut parts = element.split('-');
    let (base_str, end_str) = match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(end), None) => (base, end),
        _ => {
            return Err(TargetParseError::InvalidRange(format!(
                "{element}: expected a single '-'"
            )))
        }
    };

    let base: Ipv4Addr = base_str
        .parse()
        .map_err(|_| TargetParseError::InvalidIp(base_str.to_string()))?;
    let start = base.octets()[3];
    let end: u16 = end_str
        .trim()
        .parse()
        .map_err(|_| TargetParseError::InvalidRange(format!("{element}: bad end octet")))?;
    if end > 255 {
        return Err(TargetParseError::InvalidRange(format!(
            "{element}: end octet {end} out of range [0-255]"
        )));
    }
    let end = end as u8;
    if start > end {
        return Err(TargetParseError::InvalidRange(format!(
            "{element}: start octet {start} > end octet {end}"
        )));
    }

    let size = (end as usize) - (start as usize) + 1;
    if size > MAX_HOST_RANGE {
        return Err(TargetParseError::HostRangeTooLarge { size });
    }

    Ok(HostSpec::OctetRange { base, start, end })
}

/// Parse a `,`-separated port expression of `P` and `P-Q` elements.
///
/// Declaration order is preserved and duplicates are kept; probing the same
/// port twice is a caller decision, not ours to undo. With `strict`, port 0
/// is rejected.
pub fn parse_ports(input: &str, strict: bool) -> Result<Vec<u16>, TargetParseError> {
    if input.trim().is_empty() {
        return Err(TargetParseError::EmptyPort);
    }

    let min_port: u32 = if strict { 1 } else { 0 };
    let parse_one = |raw: &str| -> Result<u16, TargetParseError> {
        let value: u32 = raw
            .trim()
            .parse()
            .map_err(|_| TargetParseError::InvalidPort(raw.to_string()))?;
        if value < min_port || value > u16::MAX as u32 {
            return Err(TargetParseError::InvalidPort(format!(
                "{value} (valid range: {min_port}-65535)"
            )));
        }
        Ok(value as u16)
    };

    let mut ports = Vec::new();
    for element in input.split(',') {
        let element = element.trim();
        if let Some((start_str, end_str)) = element.split_once('-') {
            let start = parse_one(start_str)?;
            let end = parse_one(end_str)?;
            if start > end {
                return Err(TargetParseError::InvalidPortRange(start, end));
            }
            let total = ports.len() + (end as usize - start as usize + 1);
            if total > MAX_TOTAL_PORTS {
                return Err(TargetParseError::TooManyPorts { total });
            }
            ports.extend(start..=end);
        } else {
            let port = parse_one(element)?;
            if ports.len() + 1 > MAX_TOTAL_PORTS {
                return Err(TargetParseError::TooManyPorts {
                    total: ports.len() + 1,
                });
            }
            ports.push(port);
        }
    }
    Ok(ports)
}

/// A single `(host, port)` probe target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse a persisted `host:port` key back into a target.
    pub fn from_key(key: &str) -> Option<Self> {
        let (host, port) = key.rsplit_once(':')?;
        Some(Self {
            host: host.to_string(),
            port: port.parse().ok()?,
        })
    }
}

/// Expand the Cartesian product of hosts and ports, hosts outermost, in
/// declaration order.
pub fn enumerate_targets(specs: &[HostSpec], ports: &[u16]) -> Vec<Target> {
    let total: usize = specs.iter().map(HostSpec::len).sum::<usize>() * ports.len();
    let mut targets = Vec::with_capacity(total);
    for spec in specs {
        for ip in spec.iter() {
            let host = ip.to_string();
            for &port in ports {
                targets.push(Target {
                    host: host.clone(),
                    port,
                });
            }
        }
    }
    targets
}
