use std::io;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use crate::common::connect;

/// RFB servers speak first: `RFB xxx.yyy\n`. No client greeting is sent;
/// the first four bytes decide.
pub(crate) async fn check(host: &str, port: u16, deadline: Duration) -> io::Result<()> {
    let mut stream = connect(host, port, deadline).await?;

    let mut buf = [0u8; 4];
    timeout(deadline, stream.read_exact(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timeout"))??;

    if &buf != b"RFB " {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "server did not announce RFB",
        ));
    }
    Ok(())
}
