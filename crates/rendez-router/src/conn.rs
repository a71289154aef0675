//! Managed connection wrapper
//!
//! Wraps a transport with the discipline every relay connection needs:
//! frame writes serialized behind a mutex, an idempotent close that
//! publishes a one-shot signal, a liveness probe, and an optional
//! keep-alive loop. Reads have a single logical owner but still take a
//! lock, because the probe path reads the same half as the owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rendez_proto::{codec, BoxedTransport, Frame, FrameError, FrameType};
use thiserror::Error;
use tokio::io::{split, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("connection is closed")]
    Closed,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A transport plus the shared-state discipline described above.
pub struct RelayConn {
    reader: Mutex<ReadHalf<BoxedTransport>>,
    writer: Mutex<WriteHalf<BoxedTransport>>,
    closed: CancellationToken,
    is_closed: AtomicBool,
}

impl RelayConn {
    pub fn new(transport: BoxedTransport) -> RelayConn {
        let (reader, writer) = split(transport);
        RelayConn {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            is_closed: AtomicBool::new(false),
        }
    }

    /// Write one frame. Refuses once the connection is closed; concurrent
    /// writers are serialized so frames never interleave.
    pub async fn write_frame(&self, frame: &Frame) -> Result<(), ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }
        let mut writer = self.writer.lock().await;
        codec::write_frame(&mut *writer, frame).await?;
        Ok(())
    }

    /// Read one frame.
    pub async fn read_frame(&self) -> Result<Frame, ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }
        let mut reader = self.reader.lock().await;
        let frame = codec::read_frame(&mut *reader).await?;
        Ok(frame)
    }

    /// Close the connection. Idempotent: the first call publishes the
    /// closed signal and shuts the write half down; later calls return
    /// immediately.
    pub async fn close(&self) {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    /// Resolves once the closed signal has been published.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Liveness check: send a Nop and wait for any frame back, all within
    /// `deadline`. A Close frame counts as failure; the peer is leaving.
    pub async fn probe(&self, deadline: Duration) -> bool {
        let exchange = async {
            self.write_frame(&Frame::nop()).await?;
            let frame = self.read_frame().await?;
            if frame.frame_type == FrameType::Close {
                return Err(ConnError::Closed);
            }
            Ok::<(), ConnError>(())
        };
        matches!(tokio::time::timeout(deadline, exchange).await, Ok(Ok(())))
    }

    /// Probe every `interval`, closing the connection on the first
    /// failure. The task exits when the closed signal fires.
    pub fn spawn_keepalive(self: std::sync::Arc<Self>, interval: Duration, probe_deadline: Duration) {
        let conn = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = conn.closed.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        if !conn.probe(probe_deadline).await {
                            debug!("keepalive probe failed, closing connection");
                            conn.close().await;
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Exclusive access to the read half for the duration of a splice.
    pub(crate) async fn lock_reader(&self) -> MutexGuard<'_, ReadHalf<BoxedTransport>> {
        self.reader.lock().await
    }

    /// Exclusive access to the write half for the duration of a splice.
    pub(crate) async fn lock_writer(&self) -> MutexGuard<'_, WriteHalf<BoxedTransport>> {
        self.writer.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::duplex;

    fn pair() -> (RelayConn, RelayConn) {
        let (a, b) = duplex(4096);
        (RelayConn::new(Box::new(a)), RelayConn::new(Box::new(b)))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (a, b) = pair();
        a.write_frame(&Frame::dial("jobs")).await.unwrap();
        let frame = b.read_frame().await.unwrap();
        assert_eq!(frame, Frame::dial("jobs"));
    }

    #[tokio::test]
    async fn test_concurrent_writes_do_not_interleave() {
        let (a, b) = pair();
        let a = Arc::new(a);

        let mut handles = Vec::new();
        for i in 0..32u64 {
            let a = a.clone();
            handles.push(tokio::spawn(async move {
                a.write_frame(&Frame::bridge_request(i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..32 {
            let frame = b.read_frame().await.unwrap();
            assert_eq!(frame.frame_type, FrameType::Bridge);
            seen.push(frame.connection_id);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _b) = pair();
        let a = Arc::new(a);

        let waiter = {
            let a = a.clone();
            tokio::spawn(async move { a.closed().await })
        };

        a.close().await;
        a.close().await;
        a.close().await;
        assert!(a.is_closed());
        waiter.await.unwrap();

        let err = a.write_frame(&Frame::nop()).await.unwrap_err();
        assert!(matches!(err, ConnError::Closed));
    }

    #[tokio::test]
    async fn test_peer_close_surfaces_eof() {
        let (a, b) = pair();
        b.close().await;
        match a.read_frame().await.unwrap_err() {
            ConnError::Frame(err) => assert!(err.is_eof()),
            other => panic!("expected EOF, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_succeeds_with_responsive_peer() {
        let (a, b) = pair();
        let responder = tokio::spawn(async move {
            let frame = b.read_frame().await.unwrap();
            assert_eq!(frame.frame_type, FrameType::Nop);
            b.write_frame(&Frame::nop()).await.unwrap();
        });
        assert!(a.probe(Duration::from_secs(1)).await);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_fails_on_silent_peer() {
        let (a, _b) = pair();
        assert!(!a.probe(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_probe_fails_on_close_frame() {
        let (a, b) = pair();
        let responder = tokio::spawn(async move {
            b.read_frame().await.unwrap();
            b.write_frame(&Frame::close()).await.unwrap();
        });
        assert!(!a.probe(Duration::from_secs(1)).await);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_closes_unresponsive_connection() {
        let (a, _b) = pair();
        let a = Arc::new(a);
        a.clone()
            .spawn_keepalive(Duration::from_millis(10), Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(1), a.closed())
            .await
            .expect("keepalive should close the connection");
    }

    #[tokio::test]
    async fn test_keepalive_exits_when_connection_closes() {
        let (a, b) = pair();
        let a = Arc::new(a);
        a.clone()
            .spawn_keepalive(Duration::from_secs(3600), Duration::from_secs(1));
        a.close().await;
        // The peer observes the shutdown promptly; the keepalive task is
        // parked on the closed signal rather than a pending probe.
        match b.read_frame().await.unwrap_err() {
            ConnError::Frame(err) => assert!(err.is_eof()),
            other => panic!("expected EOF, got {other:?}"),
        }
    }
}
