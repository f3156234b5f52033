//! Decoder session traits
//!
//! A [`VideoDecoder`] opens a byte stream and hands back a [`DecoderSession`]
//! that yields decoded frames one at a time.

use common::{CloseError, DecodeError, Frame, OpenError};
use std::io::Read;

/// Opens byte streams for decoding
pub trait VideoDecoder {
    type Session: DecoderSession;

    /// Open `stream` and prepare it for frame pulls
    ///
    /// The stream is not retained on failure.
    fn open(&self, stream: &mut dyn Read) -> Result<Self::Session, OpenError>;
}

/// An open decoding session
pub trait DecoderSession {
    /// Native frame rate of the video track
    fn frame_rate(&self) -> f64;

    /// Decode the next frame
    ///
    /// `Ok(None)` means end of stream. The frame borrows the session and is
    /// only valid until the next pull.
    fn pull_frame(&mut self) -> Result<Option<Frame<'_>>, DecodeError>;

    /// Tear the session down
    fn close(self) -> Result<(), CloseError>;
}
