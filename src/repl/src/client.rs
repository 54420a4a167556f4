use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time;

/// Framed line/bulk client for one replica connection.
///
/// Every operation takes an explicit timeout and fails with
/// `io::ErrorKind::TimedOut` on expiry; a timeout is fatal for the
/// connection because the stream position is then indeterminate.
///
/// Methods take `&self` (the stream sits behind an async mutex) so the
/// manager can hand a shared handle to an in-flight push routine; the
/// per-replica scheduling flag guarantees a single user at a time.
pub struct PeerClient {
    stream: tokio::sync::Mutex<BufStream<TcpStream>>,
    remote: String,
    max_frame_bytes: usize,
}

impl PeerClient {
    pub fn new(stream: TcpStream, max_frame_bytes: usize) -> Self {
        let remote = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        PeerClient {
            stream: tokio::sync::Mutex::new(BufStream::new(stream)),
            remote,
            max_frame_bytes,
        }
    }

    /// Peer address for log lines
    pub fn remote_repr(&self) -> &str {
        &self.remote
    }

    /// Write one CRLF-terminated line
    pub async fn write_line(&self, line: &str, timeout: Duration) -> io::Result<()> {
        let mut stream = self.stream.lock().await;
        let op = async {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\r\n").await?;
            stream.flush().await
        };
        time::timeout(timeout, op)
            .await
            .map_err(|_| timed_out("write_line"))?
    }

    /// Write raw bytes (already framed by the caller)
    pub async fn write_data(&self, data: &[u8], timeout: Duration) -> io::Result<()> {
        let mut stream = self.stream.lock().await;
        let op = async {
            stream.write_all(data).await?;
            stream.flush().await
        };
        time::timeout(timeout, op)
            .await
            .map_err(|_| timed_out("write_data"))?
    }

    /// Read one line, stripped of its CRLF terminator
    pub async fn read_line(&self, timeout: Duration) -> io::Result<String> {
        let mut stream = self.stream.lock().await;
        let mut buf = Vec::new();
        // cap the scan itself so a peer that never sends the terminator
        // cannot grow the buffer past the frame limit
        let mut limited = (&mut *stream).take(self.max_frame_bytes as u64);
        let n = time::timeout(timeout, limited.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| timed_out("read_line"))??;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ));
        }
        if buf.last() != Some(&b'\n') {
            if buf.len() >= self.max_frame_bytes {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds frame limit",
                ));
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ));
        }
        while matches!(buf.last(), Some(&b'\n') | Some(&b'\r')) {
            buf.pop();
        }
        String::from_utf8(buf)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "line is not valid utf-8"))
    }
}

fn timed_out(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", op))
}
