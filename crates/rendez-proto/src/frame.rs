//! Control frame types

use std::fmt;

/// Type tag of a control frame. Wire values are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Request a connection to a named channel.
    Dial = 0,
    /// Register a channel and hold the connection as its control channel.
    Listen = 1,
    /// Carries a connection id: a bridge command on a control channel, the
    /// listener's answering transport, or the splice-is-live acknowledgement.
    Bridge = 2,
    /// Liveness probe and its reply.
    Nop = 3,
    /// Graceful close; the channel field may carry a reason for the peer.
    Close = 4,
}

impl FrameType {
    /// Decode a wire byte, `None` for unassigned values.
    pub fn from_wire(value: u8) -> Option<FrameType> {
        match value {
            0 => Some(FrameType::Dial),
            1 => Some(FrameType::Listen),
            2 => Some(FrameType::Bridge),
            3 => Some(FrameType::Nop),
            4 => Some(FrameType::Close),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Dial => "Dial",
            FrameType::Listen => "Listen",
            FrameType::Bridge => "Bridge",
            FrameType::Nop => "Nop",
            FrameType::Close => "Close",
        };
        f.write_str(name)
    }
}

/// A control frame.
///
/// `connection_id` is meaningful only for [`FrameType::Bridge`] frames and
/// zero otherwise. `channel` is empty for Nop and may be empty for Close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub connection_id: u64,
    pub channel: String,
}

impl Frame {
    pub fn dial(channel: impl Into<String>) -> Frame {
        Frame {
            frame_type: FrameType::Dial,
            connection_id: 0,
            channel: channel.into(),
        }
    }

    pub fn listen(channel: impl Into<String>) -> Frame {
        Frame {
            frame_type: FrameType::Listen,
            connection_id: 0,
            channel: channel.into(),
        }
    }

    /// Bridge command sent on a control channel, naming a pending dial.
    pub fn bridge_request(connection_id: u64) -> Frame {
        Frame {
            frame_type: FrameType::Bridge,
            connection_id,
            channel: String::new(),
        }
    }

    /// First frame on the listener's answering transport.
    pub fn bridge_open(connection_id: u64, channel: impl Into<String>) -> Frame {
        Frame {
            frame_type: FrameType::Bridge,
            connection_id,
            channel: channel.into(),
        }
    }

    /// Splice-is-live acknowledgement sent to both halves of a bridge.
    pub fn bridge_ack() -> Frame {
        Frame {
            frame_type: FrameType::Bridge,
            connection_id: 0,
            channel: String::new(),
        }
    }

    pub fn nop() -> Frame {
        Frame {
            frame_type: FrameType::Nop,
            connection_id: 0,
            channel: String::new(),
        }
    }

    pub fn close() -> Frame {
        Frame {
            frame_type: FrameType::Close,
            connection_id: 0,
            channel: String::new(),
        }
    }

    /// Close frame carrying a human-readable reason for the peer.
    pub fn close_with_reason(reason: impl Into<String>) -> Frame {
        Frame {
            frame_type: FrameType::Close,
            connection_id: 0,
            channel: reason.into(),
        }
    }
}
