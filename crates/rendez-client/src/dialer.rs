//! Dialer client
//!
//! Single-shot: each `dial` opens a fresh transport, asks the relay for
//! the named channel, and hands the bridged stream back unchanged.

use rendez_proto::{codec, BoxedTransport, Frame, FrameType};
use tracing::debug;

use crate::tls::{connect_transport, ClientTls};
use crate::{refusal, ClientError};

/// Dials named channels through a relay.
#[derive(Clone)]
pub struct Dialer {
    router_addr: String,
    tls: Option<ClientTls>,
}

impl Dialer {
    pub fn new(router_addr: impl Into<String>) -> Dialer {
        Dialer {
            router_addr: router_addr.into(),
            tls: None,
        }
    }

    pub fn with_tls(router_addr: impl Into<String>, tls: ClientTls) -> Dialer {
        Dialer {
            router_addr: router_addr.into(),
            tls: Some(tls),
        }
    }

    /// Connect to `channel`. On success the returned transport is a live
    /// end-to-end byte stream to the channel's listener; closing it ends
    /// the bridge.
    pub async fn dial(&self, channel: &str) -> Result<BoxedTransport, ClientError> {
        let mut transport = connect_transport(&self.router_addr, self.tls.as_ref()).await?;
        codec::write_frame(&mut transport, &Frame::dial(channel)).await?;
        let ack = codec::read_frame(&mut transport).await?;
        match ack.frame_type {
            FrameType::Bridge => {
                debug!(channel, "bridge established");
                Ok(transport)
            }
            FrameType::Close => Err(refusal(&ack)),
            other => Err(ClientError::UnexpectedFrame {
                expected: FrameType::Bridge,
                got: other,
            }),
        }
    }
}
