//! Transport abstraction shared by the router and its clients
//!
//! The relay is transport-agnostic above the socket layer: a plain TCP
//! stream and a TLS stream are both just ordered byte streams that frames
//! travel over, so everything downstream of connection setup works on a
//! boxed trait object.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// An ordered, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<transport>")
    }
}

/// Type-erased transport, as accepted by the router and returned to
/// embedders by the clients.
pub type BoxedTransport = Box<dyn Transport>;
