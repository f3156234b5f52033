//! Frame-paced video playback into a GPU texture.
//!
//! [`VideoTexture`] pulls decoded frames from a [`VideoDecoder`] session and
//! keeps a texture in step with wall-clock time, discarding frames when
//! decoding falls behind. Pixels reach the GPU through a [`TextureSink`].
//!
//! Modules:
//! - `video`: pacer, decoder session traits, GStreamer adapter, statistics
//! - `sink`: texture sink trait and slot reuse shared by all sinks
//! - `convert`: pixel depth and channel order conversion to RGBA8
//! - `gpu`: wgpu context and the two upload strategies
//! - `config`: TOML configuration

pub mod macros;

pub mod clock;
pub mod config;
pub mod convert;
pub mod sink;
pub mod video;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use sink::{SlotSink, TextureAllocator, TextureSink};
pub use video::pacer::VideoTexture;
pub use video::session::{DecoderSession, VideoDecoder};
pub use video::stats::VideoStats;
