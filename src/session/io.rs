use crate::envelope::{Envelope, EnvelopeCodec, StepTag};
use crate::error::SessionError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// One read must capture one whole envelope; this bounds envelope size.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Byte stream carrying one encrypted envelope per write and per read.
///
/// There is no length prefix: a single `read` is expected to return exactly one
/// envelope, which holds for the small, strictly alternating messages of this
/// protocol.
pub struct EnvelopeStream<S> {
    inner: S,
    codec: EnvelopeCodec,
    io_timeout: Duration,
    buf: Box<[u8]>,
}

impl<S> EnvelopeStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S, codec: EnvelopeCodec, io_timeout: Duration) -> Self {
        Self {
            inner,
            codec,
            io_timeout,
            buf: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), SessionError> {
        let bytes = self.codec.encode(envelope)?;
        if bytes.len() > RECV_BUFFER_SIZE {
            return Err(SessionError::Oversized {
                len: bytes.len(),
                max: RECV_BUFFER_SIZE,
            });
        }
        timeout(self.io_timeout, async {
            self.inner.write_all(&bytes).await?;
            self.inner.flush().await
        })
        .await
        .map_err(|_| SessionError::Timeout)??;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Envelope, SessionError> {
        let n = timeout(self.io_timeout, self.inner.read(&mut self.buf))
            .await
            .map_err(|_| SessionError::Timeout)??;
        if n == 0 {
            return Err(SessionError::ConnectionClosed);
        }
        Ok(self.codec.decode(&self.buf[..n])?)
    }

    /// Receive an envelope and insist it belongs to `expected`.
    pub async fn recv_step(&mut self, expected: StepTag) -> Result<Envelope, SessionError> {
        let envelope = self.recv().await?;
        if envelope.step != expected {
            return Err(SessionError::ProtocolViolation {
                expected,
                got: envelope.step,
            });
        }
        Ok(envelope)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}
