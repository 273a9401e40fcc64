//! # IPC channel
//!
//! Framed, unidirectional communication between the process controller and
//! one [`crate::worker_pool::FunctionWorker`] subprocess (§4.2). Grounded in
//! the length-prefixed framing pattern of the teacher's
//! `ipc::tcp_socket::{read_message, write_message}`, adapted to this
//! system's fixed 128-byte header rather than a 4-byte length prefix, and
//! carried over the worker's piped stdio (`tokio::process::{ChildStdin,
//! ChildStdout}`) rather than a TCP socket, since the worker is a local
//! child process, not a network peer.
//!
//! Each direction is its own half: [`IpcWriter`] wraps the controller's
//! write end to the worker's stdin, [`IpcReader`] wraps the read end from
//! the worker's stdout. The worker side of the pipe uses the blocking
//! counterparts in [`blocking`], since a function worker is a
//! single-threaded subprocess with no reason to carry a tokio runtime
//! (§5 "worker subprocesses are OS processes, each single-threaded").

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::common::message::BUF_SIZE;
use crate::common::Buffer;
use crate::error::PraasError;
use crate::ipc_proto::InternalFrame;

/// How long a single frame write may block before it's treated as
/// transient backpressure worth retrying.
const WRITE_TIMEOUT: Duration = Duration::from_millis(50);
/// How many times [`IpcWriter::send`] retries a timed-out write before
/// failing the enclosing operation.
const WRITE_RETRIES: usize = 5;

/// The writing half of an IPC channel.
pub struct IpcWriter<W> {
    sink: W,
}

impl<W: AsyncWrite + Unpin> IpcWriter<W> {
    pub fn new(sink: W) -> Self {
        IpcWriter { sink }
    }

    /// Writes the 128-byte header, then `payload` if `total_length > 0`.
    /// Retries on a write timeout (modelling the non-blocking-with-retry
    /// rule in §4.2); gives up with [`PraasError::Backpressure`] once
    /// [`WRITE_RETRIES`] is exhausted.
    pub async fn send(&mut self, frame: &InternalFrame, payload: &[u8]) -> Result<(), PraasError> {
        self.write_with_retry(frame.as_bytes()).await?;
        if frame.total_length() > 0 {
            self.write_with_retry(payload).await?;
        }
        Ok(())
    }

    async fn write_with_retry(&mut self, bytes: &[u8]) -> Result<(), PraasError> {
        let mut attempt = 0;
        loop {
            match timeout(WRITE_TIMEOUT, self.sink.write_all(bytes)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => return Err(PraasError::Io(e)),
                Err(_elapsed) => {
                    attempt += 1;
                    if attempt >= WRITE_RETRIES {
                        return Err(PraasError::Backpressure(format!(
                            "write did not complete after {WRITE_RETRIES} attempts"
                        )));
                    }
                }
            }
        }
    }
}

/// The reading half of an IPC channel. Stateful across calls so a caller
/// can poll `receive` from a `tokio::select!` without losing partially
/// read frames.
pub struct IpcReader<R> {
    source: R,
    state: ReceiveState,
}

enum ReceiveState {
    AwaitingHeader,
    AwaitingPayload { header: InternalFrame, payload: Vec<u8> },
}

/// The result of one completed [`IpcReader::receive`]: the parsed header
/// and, if `total_length > 0`, its payload.
pub struct ReceivedMessage {
    pub header: InternalFrame,
    pub payload: Buffer,
}

impl<R: AsyncRead + Unpin> IpcReader<R> {
    pub fn new(source: R) -> Self {
        IpcReader {
            source,
            state: ReceiveState::AwaitingHeader,
        }
    }

    /// Assembles one full message. Returns once a header and all of its
    /// payload bytes have been read; on a closed pipe mid-read, returns
    /// `Ok(None)`.
    pub async fn receive(&mut self) -> Result<Option<ReceivedMessage>, PraasError> {
        loop {
            match &mut self.state {
                ReceiveState::AwaitingHeader => {
                    let mut buf = [0u8; BUF_SIZE];
                    if !read_exact_or_eof(&mut self.source, &mut buf).await? {
                        return Ok(None);
                    }
                    let header = InternalFrame::from_bytes(buf);
                    let remaining = header.total_length() as usize;
                    if remaining == 0 {
                        return Ok(Some(ReceivedMessage {
                            header,
                            payload: Buffer::from(Vec::new()),
                        }));
                    }
                    self.state = ReceiveState::AwaitingPayload {
                        header,
                        payload: Vec::with_capacity(remaining),
                    };
                }
                ReceiveState::AwaitingPayload { header, payload } => {
                    let remaining = header.total_length() as usize - payload.len();
                    let mut chunk = vec![0u8; remaining];
                    if !read_exact_or_eof(&mut self.source, &mut chunk).await? {
                        self.state = ReceiveState::AwaitingHeader;
                        return Ok(None);
                    }
                    payload.extend_from_slice(&chunk);
                    let ReceiveState::AwaitingPayload { header, payload } =
                        std::mem::replace(&mut self.state, ReceiveState::AwaitingHeader)
                    else {
                        unreachable!()
                    };
                    return Ok(Some(ReceivedMessage {
                        header,
                        payload: Buffer::from(payload),
                    }));
                }
            }
        }
    }
}

async fn read_exact_or_eof<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> Result<bool, PraasError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await.map_err(PraasError::Io)?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

/// Synchronous counterparts used by the demo invoker (`praas-demo-invoker`),
/// which runs as a plain single-threaded subprocess reading from stdin and
/// writing to stdout without a tokio runtime of its own.
pub mod blocking {
    use std::io::{Read, Write};

    use super::BUF_SIZE;
    use crate::common::Buffer;
    use crate::error::PraasError;
    use crate::ipc_proto::InternalFrame;

    /// Fills the caller-provided buffer with one full message: the header,
    /// then its payload if any. Returns `Ok(None)` on a closed pipe.
    pub fn receive_blocking<R: Read>(source: &mut R) -> Result<Option<(InternalFrame, Buffer)>, PraasError> {
        let mut header_bytes = [0u8; BUF_SIZE];
        if !read_exact_or_eof(source, &mut header_bytes)? {
            return Ok(None);
        }
        let header = InternalFrame::from_bytes(header_bytes);
        let remaining = header.total_length() as usize;
        if remaining == 0 {
            return Ok(Some((header, Buffer::from(Vec::new()))));
        }
        let mut payload = vec![0u8; remaining];
        if !read_exact_or_eof(source, &mut payload)? {
            return Ok(None);
        }
        Ok(Some((header, Buffer::from(payload))))
    }

    pub fn send_blocking<W: Write>(sink: &mut W, frame: &InternalFrame, payload: &[u8]) -> Result<(), PraasError> {
        sink.write_all(frame.as_bytes()).map_err(PraasError::Io)?;
        if frame.total_length() > 0 {
            sink.write_all(payload).map_err(PraasError::Io)?;
        }
        Ok(())
    }

    fn read_exact_or_eof<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<bool, PraasError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = source.read(&mut buf[filled..]).map_err(PraasError::Io)?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc_proto::GetRequest;
    use tokio::io::duplex;

    #[tokio::test]
    async fn header_only_message_round_trips_over_a_duplex_pipe() {
        let (client, server) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let mut writer = IpcWriter::new(write_half);
        let mut reader = IpcReader::new(server_read);

        let request = GetRequest::new("proc-0", "k", false).unwrap();
        writer.send(request.frame(), &[]).await.unwrap();
        drop(read_half);

        let received = reader.receive().await.unwrap().unwrap();
        assert_eq!(received.payload.len(), 0);
    }

    #[tokio::test]
    async fn message_with_payload_round_trips() {
        use crate::ipc_proto::PutRequest;

        let (client, server) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let mut writer = IpcWriter::new(write_half);
        let mut reader = IpcReader::new(server_read);

        let request = PutRequest::new("proc-0", "k", 5, false).unwrap();
        writer.send(request.frame(), b"hello").await.unwrap();
        drop(read_half);

        let received = reader.receive().await.unwrap().unwrap();
        assert_eq!(received.payload.as_slice(), b"hello");
    }
}
