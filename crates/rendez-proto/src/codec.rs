//! Codec for reading and writing control frames
//!
//! Wire layout: `type (1) | connection_id (8, big-endian) | channel length
//! (2, big-endian) | channel bytes`. The length field is checked against
//! [`MAX_CHANNEL_LEN`] before any channel buffer is allocated.

use crate::frame::{Frame, FrameType};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum length of a channel name on the wire.
pub const MAX_CHANNEL_LEN: usize = 256;

/// Codec errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel name too long: {0} > {MAX_CHANNEL_LEN}")]
    ChannelTooLong(usize),

    #[error("unknown frame type: {0}")]
    UnknownType(u8),

    #[error("channel name is not valid UTF-8")]
    InvalidUtf8,

    #[error("connection closed")]
    Eof,
}

impl FrameError {
    /// True when the peer closed the transport cleanly between frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, FrameError::Eof)
    }
}

/// Write one frame. The frame is assembled in a single buffer so the
/// transport never observes a partial header.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if frame.channel.len() > MAX_CHANNEL_LEN {
        return Err(FrameError::ChannelTooLong(frame.channel.len()));
    }
    let mut buf = Vec::with_capacity(11 + frame.channel.len());
    buf.push(frame.frame_type.to_wire());
    buf.extend_from_slice(&frame.connection_id.to_be_bytes());
    buf.extend_from_slice(&(frame.channel.len() as u16).to_be_bytes());
    buf.extend_from_slice(frame.channel.as_bytes());
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns [`FrameError::Eof`] when the transport closes before the first
/// byte of a frame; a close mid-frame is an I/O error instead.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut type_buf = [0u8; 1];
    match reader.read(&mut type_buf).await {
        Ok(0) => return Err(FrameError::Eof),
        Ok(_) => {}
        Err(err) => return Err(err.into()),
    }
    let frame_type =
        FrameType::from_wire(type_buf[0]).ok_or(FrameError::UnknownType(type_buf[0]))?;

    let mut id_buf = [0u8; 8];
    reader.read_exact(&mut id_buf).await?;
    let connection_id = u64::from_be_bytes(id_buf);

    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > MAX_CHANNEL_LEN {
        return Err(FrameError::ChannelTooLong(len));
    }

    let mut channel = vec![0u8; len];
    reader.read_exact(&mut channel).await?;
    let channel = String::from_utf8(channel).map_err(|_| FrameError::InvalidUtf8)?;

    Ok(Frame {
        frame_type,
        connection_id,
        channel,
    })
}
