//! Router engine
//!
//! One accepted transport is classified by its first frame:
//!
//! - `Listen` registers the transport as a channel's control connection and
//!   holds it until it dies.
//! - `Dial` parks the transport in the inflight table and asks the
//!   channel's listener to call back for it.
//! - `Bridge` is that callback: it claims the parked dialer and the two
//!   transports are spliced into one byte stream.
//!
//! Anything else, or a frame the authority refuses, closes the transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rendez_proto::{BoxedTransport, Frame, FrameType};
use thiserror::Error;
use tokio::io::{copy_buf, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{credential_digest, credential_fingerprint, AllowAll, Authority};
use crate::conn::{ConnError, RelayConn};
use crate::registry::Registry;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Conn(#[from] ConnError),

    #[error("permission denied for peer `{fingerprint}`")]
    PermissionDenied { fingerprint: String },

    #[error("channel `{0}` is already registered")]
    ChannelBusy(String),

    #[error("channel `{0}` is not registered")]
    NoSuchChannel(String),

    #[error("no dial is waiting for this bridge, the handshake may have timed out")]
    StaleBridge,

    #[error("dial handshake timed out")]
    HandshakeTimeout,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Router configuration.
pub struct RouterOptions {
    /// Permission oracle consulted for every greeting frame.
    pub authority: Arc<dyn Authority>,
    /// Deadline for the dial handshake; also the liveness probe deadline.
    pub dial_timeout: Duration,
    /// Interval between keep-alive probes on control connections.
    pub keepalive_interval: Duration,
    /// Per-direction copy buffer for established bridges.
    pub buffer_size: usize,
    /// When set, every accepted transport completes a TLS handshake before
    /// its first frame and the peer certificate yields the credential.
    pub tls: Option<TlsAcceptor>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        RouterOptions {
            authority: Arc::new(AllowAll),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            tls: None,
        }
    }
}

/// The rendezvous router.
pub struct Router {
    options: RouterOptions,
    registry: Registry,
}

impl Router {
    pub fn new(options: RouterOptions) -> Router {
        Router {
            options,
            registry: Registry::new(),
        }
    }

    pub fn with_defaults() -> Router {
        Router::new(RouterOptions::default())
    }

    /// Bind `addr` and serve until the listener fails.
    pub async fn listen_and_serve(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "router listening");
        self.serve(listener).await
    }

    /// Serve connections from `listener`. Each accepted transport gets its
    /// own task; this call only returns when accepting itself fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            socket.set_nodelay(true).ok();
            let router = self.clone();
            tokio::spawn(async move {
                match router.handle_connection(socket).await {
                    Ok(()) => {}
                    Err(RouterError::Conn(ConnError::Frame(err))) if err.is_eof() => {}
                    Err(err) => debug!(peer = %peer_addr, error = %err, "connection terminated"),
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> Result<(), RouterError> {
        let (transport, credential) = self.setup_transport(socket).await?;
        let conn = Arc::new(RelayConn::new(transport));
        let result = self.dispatch(&conn, &credential).await;
        conn.close().await;
        result
    }

    /// Complete the TLS handshake when configured and derive the peer's
    /// credential from its leaf certificate.
    async fn setup_transport(
        &self,
        socket: TcpStream,
    ) -> Result<(BoxedTransport, Vec<u8>), RouterError> {
        match &self.options.tls {
            Some(acceptor) => {
                let stream = acceptor.accept(socket).await?;
                let credential = stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|certs| certs.first())
                    .map(|cert| credential_digest(cert.as_ref()))
                    .unwrap_or_default();
                Ok((Box::new(stream), credential))
            }
            None => Ok((Box::new(socket), Vec::new())),
        }
    }

    async fn dispatch(&self, conn: &Arc<RelayConn>, credential: &[u8]) -> Result<(), RouterError> {
        let frame = conn.read_frame().await?;
        if !self.options.authority.check_permission(&frame, credential) {
            let fingerprint = credential_fingerprint(credential);
            warn!(
                frame_type = %frame.frame_type,
                channel = %frame.channel,
                %fingerprint,
                "permission denied"
            );
            self.refuse(conn, "permission denied").await;
            return Err(RouterError::PermissionDenied { fingerprint });
        }
        match frame.frame_type {
            FrameType::Listen => self.handle_listen(&frame, conn, credential).await,
            FrameType::Dial => self.handle_dial(&frame, conn).await,
            FrameType::Bridge => self.handle_bridge(&frame, conn).await,
            other => Err(RouterError::Protocol(format!(
                "unexpected greeting frame: {other}"
            ))),
        }
    }

    /// Best-effort rejection notice; the caller closes the connection.
    async fn refuse(&self, conn: &RelayConn, reason: &str) {
        let _ = conn.write_frame(&Frame::close_with_reason(reason)).await;
    }

    async fn handle_listen(
        &self,
        frame: &Frame,
        conn: &Arc<RelayConn>,
        credential: &[u8],
    ) -> Result<(), RouterError> {
        let channel = frame.channel.as_str();
        if channel.is_empty() {
            self.refuse(conn, "empty channel name").await;
            return Err(RouterError::Protocol("listen on empty channel".into()));
        }

        let holder = self.registry.holder(channel);
        if let Some(ref holder) = holder {
            if holder.probe(self.options.dial_timeout).await {
                self.refuse(conn, &format!("channel `{channel}` is already registered"))
                    .await;
                return Err(RouterError::ChannelBusy(channel.to_string()));
            }
            // The registered listener no longer answers probes; displace it.
            holder.close().await;
            info!(channel, "displacing unresponsive listener");
        }
        if !self.registry.bind(channel, conn, holder.as_ref()) {
            // Another Listen won the slot between our probe and the bind.
            self.refuse(conn, &format!("channel `{channel}` is already registered"))
                .await;
            return Err(RouterError::ChannelBusy(channel.to_string()));
        }

        // The client takes any non-Close frame as its registration ack.
        if let Err(err) = conn.write_frame(&Frame::nop()).await {
            self.registry.unbind_if_holder(channel, conn);
            return Err(err.into());
        }
        conn.clone()
            .spawn_keepalive(self.options.keepalive_interval, self.options.dial_timeout);
        info!(channel, "listener registered");

        // Hold the registration until the connection dies or the peer's
        // credential lapses.
        let expiry = self.options.authority.expiration(credential);
        let remaining = (expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = conn.closed() => {}
            _ = tokio::time::sleep(remaining) => {
                info!(channel, "credential expired, closing registration");
                conn.close().await;
            }
        }
        self.registry.unbind_if_holder(channel, conn);
        info!(channel, "listener unregistered");
        Ok(())
    }

    async fn handle_dial(&self, frame: &Frame, conn: &Arc<RelayConn>) -> Result<(), RouterError> {
        let channel = frame.channel.as_str();
        let Some((control, connection_id)) = self.registry.begin_dial(channel, conn) else {
            self.refuse(conn, &format!("channel `{channel}` is not registered"))
                .await;
            return Err(RouterError::NoSuchChannel(channel.to_string()));
        };
        debug!(channel, connection_id, "bridge requested");

        // A write to a dead peer can still land in the kernel buffer, so a
        // failed write and a failed probe both count as a dead listener.
        let control_alive = match control
            .write_frame(&Frame::bridge_request(connection_id))
            .await
        {
            Ok(()) => control.probe(self.options.dial_timeout).await,
            Err(err) => {
                warn!(channel, error = %err, "listener control connection failed");
                false
            }
        };
        if !control_alive {
            // Drop the dead registration first: this dialer and every
            // subsequent one observe an unknown channel until the listener
            // reconnects.
            self.registry.unbind_if_holder(channel, &control);
            control.close().await;
            if self.registry.take_inflight(connection_id).is_some() {
                self.refuse(conn, &format!("channel `{channel}` is not registered"))
                    .await;
                return Err(RouterError::NoSuchChannel(channel.to_string()));
            }
            // The answering transport claimed the dial despite the failed
            // probe; let the splice run its course.
        }

        // Bound the handshake: if the inflight entry is still ours after
        // the timeout, the listener never called back.
        let timed_out = tokio::time::timeout(self.options.dial_timeout, conn.closed())
            .await
            .is_err();
        if timed_out && self.registry.take_inflight(connection_id).is_some() {
            self.refuse(conn, "bridge handshake timed out").await;
            conn.close().await;
            return Err(RouterError::HandshakeTimeout);
        }

        // The bridge claimed the entry; the transport now belongs to the
        // splice. Hold this frame open until it finishes.
        conn.closed().await;
        Ok(())
    }

    async fn handle_bridge(&self, frame: &Frame, conn: &Arc<RelayConn>) -> Result<(), RouterError> {
        let Some(dialer) = self.registry.take_inflight(frame.connection_id) else {
            self.refuse(conn, "no dial is waiting for this bridge").await;
            return Err(RouterError::StaleBridge);
        };

        // Tell both peers the splice is live.
        let handshake = async {
            dialer.write_frame(&Frame::bridge_ack()).await?;
            conn.write_frame(&Frame::bridge_ack()).await?;
            Ok::<(), ConnError>(())
        };
        if let Err(err) = handshake.await {
            dialer.close().await;
            return Err(err.into());
        }
        debug!(
            connection_id = frame.connection_id,
            channel = %frame.channel,
            "bridge established"
        );

        splice(&dialer, conn, self.options.buffer_size).await;
        Ok(())
    }
}

/// Copy bytes in both directions until either side ends, then close both.
/// The directions share one cancellation so a half-closed peer cannot
/// stall the other direction, and each also watches both connections'
/// closed signals so an external `close()` interrupts an in-flight copy.
async fn splice(a: &Arc<RelayConn>, b: &Arc<RelayConn>, buffer_size: usize) {
    let done = CancellationToken::new();
    let a_to_b = async {
        let mut reader = a.lock_reader().await;
        let mut writer = b.lock_writer().await;
        let mut reader = BufReader::with_capacity(buffer_size, &mut *reader);
        tokio::select! {
            _ = copy_buf(&mut reader, &mut *writer) => {}
            _ = a.closed() => {}
            _ = b.closed() => {}
            _ = done.cancelled() => {}
        }
        done.cancel();
    };
    let b_to_a = async {
        let mut reader = b.lock_reader().await;
        let mut writer = a.lock_writer().await;
        let mut reader = BufReader::with_capacity(buffer_size, &mut *reader);
        tokio::select! {
            _ = copy_buf(&mut reader, &mut *writer) => {}
            _ = a.closed() => {}
            _ = b.closed() => {}
            _ = done.cancelled() => {}
        }
        done.cancel();
    };
    tokio::join!(a_to_b, b_to_a);
    a.close().await;
    b.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendez_proto::codec;

    async fn start_router(options: RouterOptions) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Arc::new(Router::new(options));
        tokio::spawn(async move {
            let _ = router.serve(listener).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_dial_unknown_channel_is_refused_with_reason() {
        let addr = start_router(RouterOptions::default()).await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        codec::write_frame(&mut socket, &Frame::dial("nowhere"))
            .await
            .unwrap();
        let frame = codec::read_frame(&mut socket).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Close);
        assert!(frame.channel.contains("not registered"));
    }

    #[tokio::test]
    async fn test_unexpected_greeting_closes_connection() {
        let addr = start_router(RouterOptions::default()).await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        codec::write_frame(&mut socket, &Frame::nop()).await.unwrap();
        let err = codec::read_frame(&mut socket).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_stale_bridge_is_refused() {
        let addr = start_router(RouterOptions::default()).await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        codec::write_frame(&mut socket, &Frame::bridge_open(99, "jobs"))
            .await
            .unwrap();
        let frame = codec::read_frame(&mut socket).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Close);
    }

    #[tokio::test]
    async fn test_oversize_greeting_closes_before_payload() {
        let addr = start_router(RouterOptions::default()).await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        // Claim a 600-byte channel name without ever sending it.
        use tokio::io::AsyncWriteExt;
        let mut header = vec![FrameType::Listen.to_wire()];
        header.extend_from_slice(&0u64.to_be_bytes());
        header.extend_from_slice(&600u16.to_be_bytes());
        socket.write_all(&header).await.unwrap();
        let err = codec::read_frame(&mut socket).await.unwrap_err();
        assert!(err.is_eof());
    }
}
