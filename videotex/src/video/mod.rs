//! Video playback module
//!
//! This module keeps a texture in step with a decoding video. It consists
//! of several submodules:
//!
//! - `session`: decoder traits the pacer pulls frames through
//! - `pacer`: the `VideoTexture` that decides which frames to show or drop
//! - `stats`: playback statistics and periodic logging
//! - `pipeline`: GStreamer implementation of the decoder traits
//!
//! # Architecture
//!
//! 1. `VideoTexture::play` opens a decoder session on a byte stream
//! 2. Each `update()` computes the frame that should be visible now
//! 3. Frames the decoder fell behind on are pulled and discarded
//! 4. The newest frame is handed to a `TextureSink` for upload

pub mod pacer;
pub mod session;
pub mod stats;

#[cfg(feature = "video")]
pub mod pipeline;

pub use pacer::VideoTexture;
pub use session::{DecoderSession, VideoDecoder};
pub use stats::VideoStats;

#[cfg(feature = "video")]
pub use pipeline::{GstDecoder, GstSession};
