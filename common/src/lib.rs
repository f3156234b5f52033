//! Common types and utilities for videotex.
//!
//! This crate defines the data structures shared between the decoder side
//! (anything implementing a decoder session), the texture side (anything that
//! turns decoded pixels into a GPU image) and the `vtplay` player.
//!
//! # Frames
//!
//! A decoder hands out one [`Frame`] per pull. The frame borrows the decoder's
//! pixel memory, so it is only valid until the next pull on the same session.
//!
//! # Examples
//!
//! ```
//! use common::{ChannelLayout, Frame, FrameKind, PixelDepth};
//!
//! let pixels = [0u8, 0, 255, 255]; // one red BGRA pixel
//! let frame = Frame {
//!     kind: FrameKind::Video,
//!     width: 1,
//!     height: 1,
//!     depth: PixelDepth::U8,
//!     layout: ChannelLayout::Bgra,
//!     stride: 4,
//!     data: &pixels,
//! };
//!
//! assert_eq!(frame.channels(), 4);
//! assert!(frame.has_enough_data());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure to open a stream for playback.
///
/// Returned synchronously from `play()`; the player stays idle.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("IO error while reading video stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decoder initialization failed: {0}")]
    Init(String),

    #[error("Failed to build decode pipeline: {0}")]
    Pipeline(String),

    #[error("Stream is not a playable video: {0}")]
    Unsupported(String),

    #[error("Timed out after {0:?} waiting for the stream to open")]
    Timeout(Duration),
}

/// Failure while pulling a frame from an open session.
///
/// Fatal for the current playback only; never surfaced from a tick.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Timed out after {0:?} waiting for a decoded frame")]
    Timeout(Duration),

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Failure while tearing a session down. Logged, never propagated.
#[derive(Error, Debug)]
#[error("Failed to close decoder session: {0}")]
pub struct CloseError(pub String);

/// Kind of a frame handed out by a decoder.
///
/// Only video frames are displayed; anything else is ignored by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Video,
    Audio,
}

/// Numeric type of one channel sample in a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelDepth {
    I8,
    U8,
    I16,
    U16,
    I32,
    F32,
    F64,
}

impl PixelDepth {
    /// Size of one channel sample in bytes
    pub fn bytes(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

/// Channel order of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// Blue, green, red
    Bgr,
    /// Blue, green, red, alpha
    Bgra,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            Self::Bgr => 3,
            Self::Bgra => 4,
        }
    }
}

/// One decoded frame, borrowed from the decoder that produced it.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub kind: FrameKind,
    pub width: u32,
    pub height: u32,
    pub depth: PixelDepth,
    pub layout: ChannelLayout,
    /// Distance between the starts of two consecutive rows, in bytes
    pub stride: usize,
    pub data: &'a [u8],
}

impl Frame<'_> {
    pub fn is_video(&self) -> bool {
        self.kind == FrameKind::Video
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.layout.channels() * self.depth.bytes()
    }

    /// Bytes of actual pixel data in one row (excluding stride padding)
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    /// Minimum buffer size that covers every row
    pub fn required_len(&self) -> usize {
        match self.height as usize {
            0 => 0,
            rows => self.stride * (rows - 1) + self.row_bytes(),
        }
    }

    /// Whether the stride and buffer are large enough for the declared size
    pub fn has_enough_data(&self) -> bool {
        self.stride >= self.row_bytes() && self.data.len() >= self.required_len()
    }
}

/// Lifecycle of a video texture's playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No open session
    Idle,
    /// Session open and producing frames
    Playing,
    /// Session reached end of stream, kept open until the next stop or play
    Finished,
}

impl PlaybackState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Finished => "finished",
        }
    }
}

/// Snapshot of a video texture's state and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackReport {
    pub state: PlaybackState,
    pub texture_handle: u32,
    pub width: u32,
    pub height: u32,
    pub effective_fps: f64,
    pub frame_index: u64,
    pub frames_displayed: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
    pub frames_ignored: u64,
    /// Video frames the texture sink refused to upload
    pub frames_rejected: u64,
    pub texture_reallocations: u64,
    /// Percentage of consumed frames that were dropped to keep up
    pub drop_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &[u8], width: u32, height: u32, stride: usize) -> Frame<'_> {
        Frame {
            kind: FrameKind::Video,
            width,
            height,
            depth: PixelDepth::U8,
            layout: ChannelLayout::Bgr,
            stride,
            data,
        }
    }

    #[test]
    fn test_pixel_depth_sizes() {
        assert_eq!(PixelDepth::I8.bytes(), 1);
        assert_eq!(PixelDepth::U8.bytes(), 1);
        assert_eq!(PixelDepth::I16.bytes(), 2);
        assert_eq!(PixelDepth::U16.bytes(), 2);
        assert_eq!(PixelDepth::I32.bytes(), 4);
        assert_eq!(PixelDepth::F32.bytes(), 4);
        assert_eq!(PixelDepth::F64.bytes(), 8);
    }

    #[test]
    fn test_frame_padded_rows() {
        // 2x2 BGR with 8 byte stride (2 bytes of padding per row)
        let data = [0u8; 14];
        let f = frame(&data, 2, 2, 8);
        assert_eq!(f.row_bytes(), 6);
        assert_eq!(f.required_len(), 14);
        assert!(f.has_enough_data());
    }

    #[test]
    fn test_frame_short_buffer() {
        let data = [0u8; 13];
        assert!(!frame(&data, 2, 2, 8).has_enough_data());

        // Stride smaller than a row of pixels
        let data = [0u8; 64];
        assert!(!frame(&data, 4, 2, 6).has_enough_data());
    }

    #[test]
    fn test_frame_wide_depth() {
        let data = [0u8; 32];
        let f = Frame {
            depth: PixelDepth::F64,
            layout: ChannelLayout::Bgra,
            ..frame(&data, 1, 1, 32)
        };
        assert_eq!(f.bytes_per_pixel(), 32);
        assert!(f.has_enough_data());
    }

    #[test]
    fn test_empty_frame_needs_no_data() {
        let f = frame(&[], 0, 0, 0);
        assert_eq!(f.required_len(), 0);
        assert!(f.has_enough_data());
    }

    #[test]
    fn test_report_serialization() {
        let report = PlaybackReport {
            state: PlaybackState::Finished,
            texture_handle: 3,
            width: 640,
            height: 360,
            effective_fps: 48.0,
            frame_index: 120,
            frames_displayed: 100,
            frames_dropped: 20,
            frames_skipped: 0,
            frames_ignored: 1,
            frames_rejected: 0,
            texture_reallocations: 1,
            drop_rate: 16.7,
        };

        let json = serde_json::to_string(&report).unwrap();
        let deserialized: PlaybackReport = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.state, PlaybackState::Finished);
        assert_eq!(deserialized.texture_handle, 3);
        assert_eq!(deserialized.frames_dropped, 20);
    }

    #[test]
    fn test_open_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated");
        let err: OpenError = io_err.into();
        assert!(matches!(err, OpenError::Io(_)));
        assert!(err.to_string().contains("truncated"));
    }
}
