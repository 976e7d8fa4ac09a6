//! Chunked outbound transport.
//!
//! The raw REPL input buffer is small and has no application-level flow
//! control: writing faster than the device drains corrupts everything that
//! follows. Payloads are therefore split into fixed-size chunks paced by a
//! fixed delay, with no per-chunk acknowledgement; only the end-of-transfer
//! `OK` ack is awaited. Chunk size and delay are operator-supplied constants,
//! never auto-tuned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{Error, Result};
use crate::link::Link;

/// Bound on waiting for the end-of-transfer acknowledgement.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// One bounded piece of an ordered transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Sequence position within the transfer.
    pub index: usize,
    pub data: &'a [u8],
}

/// Split `payload` into `chunk_size`-byte chunks; the last may be shorter.
/// An empty payload yields no chunks.
pub fn split(payload: &[u8], chunk_size: usize) -> Vec<Chunk<'_>> {
    assert!(chunk_size > 0, "chunk size must be positive");
    payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, data)| Chunk { index, data })
        .collect()
}

/// Reassemble chunks in sequence order. Inverse of [`split`].
pub fn reassemble(chunks: &[Chunk<'_>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks.iter().map(|c| c.data.len()).sum());
    for chunk in chunks {
        out.extend_from_slice(chunk.data);
    }
    out
}

/// Injectable inter-chunk delay so tests can drop the real sleeps while
/// keeping write ordering identical.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, wait: Duration);
}

/// Real wall-clock pacing.
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, wait: Duration) {
        tokio::time::sleep(wait).await;
    }
}

/// No-op pacing for tests.
pub struct NoopPacer;

#[async_trait]
impl Pacer for NoopPacer {
    async fn pause(&self, _wait: Duration) {}
}

/// Paced chunk writer for one connection.
pub struct ChunkedSender {
    chunk_size: usize,
    chunk_wait: Duration,
    pacer: Arc<dyn Pacer>,
}

impl ChunkedSender {
    pub fn new(chunk_size: usize, chunk_wait: Duration) -> Self {
        Self::with_pacer(chunk_size, chunk_wait, Arc::new(TokioPacer))
    }

    pub fn with_pacer(chunk_size: usize, chunk_wait: Duration, pacer: Arc<dyn Pacer>) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            chunk_size,
            chunk_wait,
            pacer,
        }
    }

    /// Write `payload` as paced chunks. Does not wait for any ack; callers
    /// follow up with [`ChunkedSender::await_ack`] after the terminator byte.
    pub async fn send<L: Link + ?Sized>(&self, link: &mut L, payload: &[u8]) -> Result<()> {
        let chunks = split(payload, self.chunk_size);
        let total = chunks.len();
        for chunk in chunks {
            link.write_all(chunk.data).await?;
            trace!(index = chunk.index, total, len = chunk.data.len(), "chunk written");
            if chunk.index + 1 < total {
                self.pacer.pause(self.chunk_wait).await;
            }
        }
        Ok(())
    }

    /// Await exactly `expected.len()` ack bytes within `timeout`.
    /// A missing ack is a `ChunkTimeout` (pacing exceeded device capacity),
    /// deliberately distinct from a device-side execution error.
    pub async fn await_ack<L: Link + ?Sized>(
        &self,
        link: &mut L,
        expected: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut got = Vec::with_capacity(expected.len());
        while got.len() < expected.len() {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ChunkTimeout);
            }
            let pending = link.read_some(expected.len() - got.len()).await?;
            if pending.is_empty() {
                tokio::time::sleep(Duration::from_millis(2)).await;
                continue;
            }
            got.extend_from_slice(&pending);
        }
        if got != expected {
            return Err(Error::BadReply {
                op: "transfer ack".into(),
                detail: format!("expected {:?}, got {:?}", expected, got),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLink;
    use proptest::prelude::*;

    #[test]
    fn split_covers_payload() {
        let payload = b"abcdefghij";
        let chunks = split(payload, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data, b"abcd");
        assert_eq!(chunks[2].data, b"ij");
        assert_eq!(chunks[2].index, 2);
    }

    #[test]
    fn empty_payload_has_no_chunks() {
        assert!(split(b"", 8).is_empty());
    }

    proptest! {
        /// Round-trip law: split then reassemble is the identity for any
        /// chunk size and payload length.
        #[test]
        fn split_reassemble_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..4096),
                                      chunk_size in 1usize..512) {
            let chunks = split(&payload, chunk_size);
            prop_assert_eq!(reassemble(&chunks), payload);
        }
    }

    #[tokio::test]
    async fn send_preserves_byte_order() {
        let sender =
            ChunkedSender::with_pacer(3, Duration::from_millis(500), Arc::new(NoopPacer));
        let mut link = MockLink::new();
        sender.send(&mut link, b"hello world").await.unwrap();
        assert_eq!(link.written(), b"hello world");
    }

    #[tokio::test]
    async fn ack_roundtrip() {
        let sender = ChunkedSender::with_pacer(64, Duration::ZERO, Arc::new(NoopPacer));
        let mut link = MockLink::new();
        link.expect(b"\x04", b"OK");
        sender.send(&mut link, b"code").await.unwrap();
        link.write_all(b"\x04").await.unwrap();
        sender
            .await_ack(&mut link, b"OK", Duration::from_millis(200))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_ack_is_chunk_timeout() {
        let sender = ChunkedSender::with_pacer(64, Duration::ZERO, Arc::new(NoopPacer));
        let mut link = MockLink::unresponsive();
        link.write_all(b"\x04").await.unwrap();
        let err = sender
            .await_ack(&mut link, b"OK", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChunkTimeout));
    }

    #[tokio::test]
    async fn wrong_ack_is_bad_reply() {
        let sender = ChunkedSender::with_pacer(64, Duration::ZERO, Arc::new(NoopPacer));
        let mut link = MockLink::new();
        link.expect(b"\x04", b"Tr");
        link.write_all(b"\x04").await.unwrap();
        let err = sender
            .await_ack(&mut link, b"OK", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadReply { .. }));
    }
}
