//! Length-prefixed framing for cluster connections
//!
//! Every frame is a 2-byte big-endian length followed by that many payload
//! bytes. The reader keeps whatever arrives past the current frame in its
//! buffer and parses it first on the next read, so one socket read may yield
//! several frames and one frame may span several reads.
//!
//! A read that hits EOF, an I/O error or an oversized length is final: the
//! reader reports "no data" and the caller closes the peer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Largest payload a frame may carry
pub const MAX_FRAME_PAYLOAD: usize = i16::MAX as usize;

/// Size of the length header
pub const FRAME_HEADER_LEN: usize = 2;

/// Boxed read half, so tests can swap sockets for in-memory pipes
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outcome of a bounded read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrame {
    /// A complete payload
    Frame(Bytes),
    /// Peer is gone (EOF, I/O error or oversized frame)
    Closed,
    /// Nothing complete arrived in time
    Timeout,
}

enum Parse {
    Frame(Bytes),
    Incomplete,
    Oversized(usize),
}

/// Reads frames off a byte stream
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Bytes received but not yet consumed as a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn parse(&mut self) -> Parse {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Parse::Incomplete;
        }
        let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Parse::Oversized(len);
        }
        if self.buffer.len() < FRAME_HEADER_LEN + len {
            return Parse::Incomplete;
        }
        self.buffer.advance(FRAME_HEADER_LEN);
        Parse::Frame(self.buffer.split_to(len).freeze())
    }

    /// Read the next frame; `None` means the peer is gone
    pub async fn read_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.parse() {
                Parse::Frame(payload) => return Some(payload),
                Parse::Oversized(len) => {
                    warn!(len, max = MAX_FRAME_PAYLOAD, "Frame too large, dropping peer");
                    return None;
                }
                Parse::Incomplete => {}
            }

            match self.inner.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    debug!(buffered = self.buffer.len(), "Peer closed connection");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Read failed");
                    return None;
                }
            }
        }
    }

    /// Read the next frame, giving up after `limit`
    ///
    /// Partial data received before the deadline stays buffered.
    pub async fn read_frame_timeout(&mut self, limit: Duration) -> ReadFrame {
        match tokio::time::timeout(limit, self.read_frame()).await {
            Ok(Some(payload)) => ReadFrame::Frame(payload),
            Ok(None) => ReadFrame::Closed,
            Err(_) => ReadFrame::Timeout,
        }
    }
}

/// Writes frames to a byte stream
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame; header and payload go out in a single write
    pub async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        let frame = encode_frame(payload)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Prefix `payload` with its length
pub fn encode_frame(payload: &[u8]) -> io::Result<Bytes> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame payload of {} bytes exceeds {}",
                payload.len(),
                MAX_FRAME_PAYLOAD
            ),
        ));
    }
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_write_then_read() {
        let (a, b) = duplex(1024);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        writer.write_frame(b"hello").await.unwrap();
        writer.write_frame(b"").await.unwrap();
        writer.write_frame(&[153]).await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(reader.read_frame().await.unwrap(), Bytes::new());
        assert_eq!(reader.read_frame().await.unwrap(), Bytes::from_static(&[153]));
    }

    #[tokio::test]
    async fn test_spillover_across_reads() {
        let (mut raw, b) = duplex(1024);
        let mut reader = FrameReader::new(b);

        // Two frames and the first byte of a third in one write
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&encode_frame(b"one").unwrap());
        chunk.extend_from_slice(&encode_frame(b"two").unwrap());
        chunk.push(0);
        raw.write_all(&chunk).await.unwrap();

        assert_eq!(&reader.read_frame().await.unwrap()[..], b"one");
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"two");
        assert_eq!(reader.buffered(), 1);

        raw.write_all(&[5, b't', b'h']).await.unwrap();
        raw.write_all(b"ree").await.unwrap();
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"three");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_none() {
        let (mut raw, b) = duplex(64);
        let mut reader = FrameReader::new(b);
        raw.write_all(&[0, 10, 1, 2, 3]).await.unwrap();
        drop(raw);
        assert!(reader.read_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_is_none() {
        let (mut raw, b) = duplex(64);
        let mut reader = FrameReader::new(b);
        raw.write_all(&[0x80, 0x00]).await.unwrap();
        assert!(reader.read_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_read_timeout_keeps_partial_data() {
        let (mut raw, b) = duplex(64);
        let mut reader = FrameReader::new(b);
        raw.write_all(&[0, 3, b'a']).await.unwrap();

        let out = reader.read_frame_timeout(Duration::from_millis(20)).await;
        assert_eq!(out, ReadFrame::Timeout);

        raw.write_all(b"bc").await.unwrap();
        let out = reader.read_frame_timeout(Duration::from_secs(1)).await;
        assert_eq!(out, ReadFrame::Frame(Bytes::from_static(b"abc")));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        assert!(encode_frame(&vec![0u8; MAX_FRAME_PAYLOAD]).is_ok());
        let err = encode_frame(&vec![0u8; MAX_FRAME_PAYLOAD + 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
