//! Wire protocol for the rendez relay.
//!
//! Every role (router, listener, dialer) exchanges the same fixed-layout
//! control frame; once a bridge is established the payload is an
//! uninterpreted byte stream and no further frames are read.

pub mod codec;
pub mod frame;
pub mod transport;

pub use codec::{read_frame, write_frame, FrameError, MAX_CHANNEL_LEN};
pub use frame::{Frame, FrameType};
pub use transport::{BoxedTransport, Transport};
