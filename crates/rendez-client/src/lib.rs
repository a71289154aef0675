//! Client roles on a rendez relay.
//!
//! A [`Listener`] claims a channel name on the relay and accepts bridged
//! connections from it; a [`Dialer`] asks the relay for a connection to a
//! named channel. Both only ever dial out to the relay's public address,
//! so they work from behind NAT, and both return plain byte streams that
//! upper layers use like any other socket.

pub mod dialer;
pub mod listener;
pub mod tls;

use rendez_proto::{Frame, FrameError, FrameType};
use thiserror::Error;

pub use dialer::Dialer;
pub use listener::{ChannelAddr, Listener};
pub use tls::ClientTls;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("relay refused the request: {0}")]
    Refused(String),

    #[error("protocol violation: expected {expected} frame, got {got}")]
    UnexpectedFrame { expected: FrameType, got: FrameType },

    #[error("listener is closed")]
    Closed,

    #[error("invalid server name `{0}`")]
    InvalidServerName(String),
}

/// Map a Close frame received mid-handshake to the relay's stated reason.
pub(crate) fn refusal(frame: &Frame) -> ClientError {
    if frame.channel.is_empty() {
        ClientError::Refused("connection closed by relay".to_string())
    } else {
        ClientError::Refused(frame.channel.clone())
    }
}
