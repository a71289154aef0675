//! Listener client
//!
//! Holds one long-lived control connection to the relay. The relay sends a
//! `Bridge` command naming each pending dial; for every command a fresh
//! transport is opened, handshaken, and queued for `accept()`. The control
//! connection itself only ever carries Listen, Nop, Bridge, and Close
//! frames.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rendez_proto::{codec, BoxedTransport, Frame, FrameType};
use tokio::io::{split, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tls::{connect_transport, ClientTls};
use crate::{refusal, ClientError};

/// Bridged transports ready before anyone calls `accept()` queue here; a
/// full queue blocks further bridge tasks, which slows acceptance of new
/// dials to match consumption.
const HANDOFF_CAPACITY: usize = 16;

/// Address of a listener on the relay network. For logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddr {
    channel: String,
}

impl ChannelAddr {
    pub fn network(&self) -> &'static str {
        "Yukino"
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel)
    }
}

struct Shared {
    router_addr: String,
    channel: String,
    tls: Option<ClientTls>,
    writer: Mutex<WriteHalf<BoxedTransport>>,
    closed: CancellationToken,
    is_closed: AtomicBool,
}

impl Shared {
    async fn write_control(&self, frame: &Frame) -> Result<(), ClientError> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let mut writer = self.writer.lock().await;
        codec::write_frame(&mut *writer, frame).await?;
        Ok(())
    }

    /// Tear the listener down. Idempotent; `send_close` is best-effort
    /// notice to the relay and only sent on a locally initiated close.
    async fn shutdown(&self, send_close: bool) {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut writer = self.writer.lock().await;
            if send_close {
                let _ = codec::write_frame(&mut *writer, &Frame::close()).await;
            }
            let _ = writer.shutdown().await;
        }
        self.closed.cancel();
    }
}

/// A registered channel on the relay, yielding bridged connections.
pub struct Listener {
    shared: Arc<Shared>,
    handoff: Mutex<mpsc::Receiver<BoxedTransport>>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}

impl Listener {
    /// Register `channel` on the relay at `router_addr`.
    ///
    /// Dials the relay, sends the Listen frame, and waits for the relay's
    /// acknowledgement; any error (including the relay refusing the
    /// registration) fails the construction.
    pub async fn connect(
        router_addr: impl Into<String>,
        channel: impl Into<String>,
        tls: Option<ClientTls>,
    ) -> Result<Listener, ClientError> {
        let router_addr = router_addr.into();
        let channel = channel.into();

        let mut transport = connect_transport(&router_addr, tls.as_ref()).await?;
        codec::write_frame(&mut transport, &Frame::listen(&channel)).await?;
        let ack = codec::read_frame(&mut transport).await?;
        if ack.frame_type == FrameType::Close {
            return Err(refusal(&ack));
        }
        info!(channel = %channel, "registered with relay");

        let (reader, writer) = split(transport);
        let shared = Arc::new(Shared {
            router_addr,
            channel,
            tls,
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            is_closed: AtomicBool::new(false),
        });
        let (handoff_tx, handoff_rx) = mpsc::channel(HANDOFF_CAPACITY);
        tokio::spawn(control_loop(shared.clone(), reader, handoff_tx));

        Ok(Listener {
            shared,
            handoff: Mutex::new(handoff_rx),
        })
    }

    /// Next bridged connection. Blocks until one is ready or the listener
    /// closes, in which case every pending and future call fails with
    /// [`ClientError::Closed`].
    pub async fn accept(&self) -> Result<BoxedTransport, ClientError> {
        let mut handoff = self.handoff.lock().await;
        handoff.recv().await.ok_or(ClientError::Closed)
    }

    /// Deregister from the relay. Idempotent.
    pub async fn close(&self) {
        self.shared.shutdown(true).await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed.load(Ordering::SeqCst)
    }

    /// The channel address this listener serves. For logging only.
    pub fn local_addr(&self) -> ChannelAddr {
        ChannelAddr {
            channel: self.shared.channel.clone(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // Wake the control task so the registration does not linger on the
        // relay until a probe notices.
        self.shared.closed.cancel();
    }
}

/// Owns the read side of the control connection exclusively.
async fn control_loop(
    shared: Arc<Shared>,
    mut reader: ReadHalf<BoxedTransport>,
    handoff: mpsc::Sender<BoxedTransport>,
) {
    loop {
        let frame = tokio::select! {
            _ = shared.closed.cancelled() => break,
            result = codec::read_frame(&mut reader) => match result {
                Ok(frame) => frame,
                Err(err) if err.is_eof() => {
                    debug!("control connection closed by relay");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "control connection failed");
                    break;
                }
            },
        };
        match frame.frame_type {
            FrameType::Nop => {
                // Liveness probe from the relay.
                if shared.write_control(&Frame::nop()).await.is_err() {
                    break;
                }
            }
            FrameType::Bridge => {
                // Spawn unconditionally: a bridge may be ready before any
                // accept() caller shows up, and the bounded handoff queue
                // holds it until one does.
                let shared = shared.clone();
                let handoff = handoff.clone();
                tokio::spawn(async move {
                    match open_bridge(&shared, frame.connection_id).await {
                        Ok(transport) => {
                            tokio::select! {
                                _ = shared.closed.cancelled() => {}
                                _ = handoff.send(transport) => {}
                            }
                        }
                        Err(err) => {
                            warn!(
                                connection_id = frame.connection_id,
                                error = %err,
                                "bridge setup failed"
                            );
                        }
                    }
                });
            }
            FrameType::Close => {
                debug!("relay closed the registration");
                break;
            }
            other => {
                warn!(frame_type = %other, "unexpected frame on control connection");
                break;
            }
        }
    }
    shared.shutdown(false).await;
    // Dropping the handoff sender wakes every pending accept() caller.
}

/// Answer one bridge command: open a fresh transport, name the pending
/// dial, and wait for the splice-is-live acknowledgement.
async fn open_bridge(shared: &Shared, connection_id: u64) -> Result<BoxedTransport, ClientError> {
    let mut transport = connect_transport(&shared.router_addr, shared.tls.as_ref()).await?;
    codec::write_frame(
        &mut transport,
        &Frame::bridge_open(connection_id, &shared.channel),
    )
    .await?;
    let ack = codec::read_frame(&mut transport).await?;
    match ack.frame_type {
        FrameType::Bridge => Ok(transport),
        FrameType::Close => Err(refusal(&ack)),
        other => Err(ClientError::UnexpectedFrame {
            expected: FrameType::Bridge,
            got: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_addr() {
        let addr = ChannelAddr {
            channel: "jobs".to_string(),
        };
        assert_eq!(addr.network(), "Yukino");
        assert_eq!(addr.channel(), "jobs");
        assert_eq!(addr.to_string(), "jobs");
    }
}
