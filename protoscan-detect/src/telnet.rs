use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::connect;

const CMD_WILL: u8 = 251;
const CMD_WONT: u8 = 252;
const CMD_DO: u8 = 253;
const CMD_DONT: u8 = 254;
const CMD_IAC: u8 = 255;

/// Dial and read up to two payload bytes while refusing every option the
/// server tries to negotiate (`DO` → `WONT`, `WILL`/`WONT` → `DONT`,
/// `DONT` → no reply). Returns the number of payload bytes received.
///
/// A server that closes after delivering payload still counts as Telnet;
/// closing before any payload does not.
pub(crate) async fn negotiate(host: &str, port: u16, deadline: Duration) -> io::Result<usize> {
    let stream = connect(host, port, deadline).await?;
    let mut reader = BufReader::with_capacity(256, stream);

    timeout(deadline, read_payload(&mut reader))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timeout"))?
}

async fn read_payload(reader: &mut BufReader<TcpStream>) -> io::Result<usize> {
    let mut payload = 0usize;
    while payload < 2 {
        match try_read_byte(reader).await {
            Ok(Some(_byte)) => payload += 1,
            Ok(None) => {} // option negotiation, nothing delivered yet
            // Payload already in hand; EOF or reset just ends the read.
            Err(_) if payload > 0 => return Ok(payload),
            Err(e) => return Err(e),
        }
        if payload > 0 && reader.buffer().is_empty() {
            // Don't block waiting for a second byte that may never come.
            return Ok(payload);
        }
    }
    Ok(payload)
}

/// Read one unit off the wire: `Ok(Some(b))` for a payload byte (including a
/// literal 0xFF escaped as `IAC IAC`), `Ok(None)` when an option negotiation
/// was consumed and answered.
async fn try_read_byte(reader: &mut BufReader<TcpStream>) -> io::Result<Option<u8>> {
    let first = reader.read_u8().await?;
    if first != CMD_IAC {
        return Ok(Some(first));
    }

    let command = reader.read_u8().await?;
    if command == CMD_IAC {
        return Ok(Some(CMD_IAC));
    }

    let option = reader.read_u8().await?;
    deny(reader, command, option).await?;
    Ok(None)
}

async fn deny(reader: &mut BufReader<TcpStream>, command: u8, option: u8) -> io::Result<()> {
    match command {
        CMD_DO => {
            reader
                .get_mut()
                .write_all(&[CMD_IAC, CMD_WONT, option])
                .await
        }
        CMD_WILL | CMD_WONT => {
            reader
                .get_mut()
                .write_all(&[CMD_IAC, CMD_DONT, option])
                .await
        }
        // DONT and anything else need no answer.
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    const OPT_ECHO: u8 = 1;

    #[tokio::test]
    async fn payload_after_negotiation_succeeds_and_replies_wont() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // IAC DO ECHO, then one literal payload byte.
            stream.write_all(&[CMD_IAC, CMD_DO, OPT_ECHO, 0x61]).await.unwrap();
            let mut reply = [0u8; 3];
            stream.read_exact(&mut reply).await.unwrap();
            tx.send(reply).unwrap();
            // Hold the connection open until the client is done.
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let n = negotiate("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        assert!(n >= 1);
        assert_eq!(rx.await.unwrap(), [CMD_IAC, CMD_WONT, OPT_ECHO]);
    }

    #[tokio::test]
    async fn will_command_answered_with_dont() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[CMD_IAC, CMD_WILL, OPT_ECHO, b'x']).await.unwrap();
            let mut reply = [0u8; 3];
            stream.read_exact(&mut reply).await.unwrap();
            tx.send(reply).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let n = negotiate("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        assert!(n >= 1);
        assert_eq!(rx.await.unwrap(), [CMD_IAC, CMD_DONT, OPT_ECHO]);
    }

    #[tokio::test]
    async fn escaped_iac_counts_as_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[CMD_IAC, CMD_IAC]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let n = negotiate("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn early_eof_without_payload_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        assert!(negotiate("127.0.0.1", port, Duration::from_secs(2)).await.is_err());
    }

    #[tokio::test]
    async fn eof_after_payload_still_counts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"l").await.unwrap();
            drop(stream);
        });

        let n = negotiate("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        assert_eq!(n, 1);
    }
}
