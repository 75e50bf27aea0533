use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Dial `host:port` with `timeout` as the connect deadline.
///
/// Shared by every probe; a timeout is surfaced as `io::ErrorKind::TimedOut`
/// so callers can treat it like any other dial failure.
pub(crate) async fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let addr = format!("{host}:{port}");
    debug!("dialing {addr}");
    tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))?
}
