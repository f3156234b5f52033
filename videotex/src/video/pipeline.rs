//! GStreamer decoder sessions
//!
//! The byte stream is read into memory and served to `decodebin` through an
//! `appsrc` in random-access mode, so containers that keep their index at
//! the end of the file open correctly. Decoded frames are converted to
//! BGRA or BGR and pulled one at a time from an `appsink`.

use super::session::{DecoderSession, VideoDecoder};
use crate::log_and_continue;
use common::{ChannelLayout, CloseError, DecodeError, Frame, FrameKind, OpenError, PixelDepth};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Bytes pushed per `need-data` request when appsrc does not ask for a size
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Frame rate assumed when the stream does not declare one
const FALLBACK_FPS: f64 = 30.0;

/// Initialize GStreamer (idempotent, safe to call multiple times)
pub fn initialize_gstreamer() -> Result<(), OpenError> {
    static GSTREAMER_INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(OpenError::Init)
}

/// Opens video streams with a software GStreamer pipeline
#[derive(Debug, Clone)]
pub struct GstDecoder {
    layout: ChannelLayout,
    open_timeout: Duration,
    pull_timeout: Duration,
}

impl Default for GstDecoder {
    fn default() -> Self {
        Self::new(ChannelLayout::Bgra, Duration::from_secs(10), Duration::from_secs(5))
    }
}

impl GstDecoder {
    /// Create a decoder producing `layout` frames
    ///
    /// `open_timeout` bounds the wait for the first decoded frame,
    /// `pull_timeout` bounds every later pull.
    pub fn new(layout: ChannelLayout, open_timeout: Duration, pull_timeout: Duration) -> Self {
        Self {
            layout,
            open_timeout,
            pull_timeout,
        }
    }

    pub fn from_config(config: &crate::config::DecoderSettings) -> Self {
        Self::new(config.layout(), config.open_timeout(), config.pull_timeout())
    }
}

impl VideoDecoder for GstDecoder {
    type Session = GstSession;

    fn open(&self, stream: &mut dyn Read) -> Result<GstSession, OpenError> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Err(OpenError::Unsupported("stream is empty".to_string()));
        }

        initialize_gstreamer()?;

        log::info!("Opening {} byte video stream", bytes.len());
        let (pipeline, app_src, app_sink) = build_pipeline(self.layout)?;
        configure_app_src(&app_src, bytes);
        configure_app_sink(&app_sink);

        // From here on the session's Drop tears the pipeline down on failure
        let mut session = GstSession {
            pipeline,
            app_sink,
            frame_rate: FALLBACK_FPS,
            pull_timeout: self.pull_timeout,
            current: None,
            torn_down: false,
        };
        session.preroll(self.open_timeout)?;

        Ok(session)
    }
}

/// Build the decode pipeline
///
/// Returns (pipeline, app_src, app_sink).
fn build_pipeline(
    layout: ChannelLayout,
) -> Result<(gst::Pipeline, gst_app::AppSrc, gst_app::AppSink), OpenError> {
    let format = match layout {
        ChannelLayout::Bgra => "BGRA",
        ChannelLayout::Bgr => "BGR",
    };

    let pipeline_str = format!(
        "appsrc name=src ! decodebin ! videoconvert ! video/x-raw,format={} ! appsink name=sink",
        format
    );

    log::debug!("GStreamer pipeline: {}", pipeline_str);

    let pipeline = gst::parse::launch(&pipeline_str)
        .map_err(|e| OpenError::Pipeline(format!("Failed to create GStreamer pipeline: {}", e)))?
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| OpenError::Pipeline("Pipeline is not a gst::Pipeline".to_string()))?;

    let app_src = pipeline
        .by_name("src")
        .ok_or_else(|| OpenError::Pipeline("Failed to get appsrc from pipeline".to_string()))?
        .dynamic_cast::<gst_app::AppSrc>()
        .map_err(|_| OpenError::Pipeline("src is not an AppSrc".to_string()))?;

    let app_sink = pipeline
        .by_name("sink")
        .ok_or_else(|| OpenError::Pipeline("Failed to get appsink from pipeline".to_string()))?
        .dynamic_cast::<gst_app::AppSink>()
        .map_err(|_| OpenError::Pipeline("sink is not an AppSink".to_string()))?;

    Ok((pipeline, app_src, app_sink))
}

/// Serve `data` to the pipeline with random access
fn configure_app_src(app_src: &gst_app::AppSrc, data: Vec<u8>) {
    let size = data.len();
    app_src.set_stream_type(gst_app::AppStreamType::RandomAccess);
    app_src.set_size(size as i64);

    let offset = Arc::new(AtomicUsize::new(0));
    let read_offset = Arc::clone(&offset);

    app_src.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |src, length| {
                let start = read_offset.load(Ordering::Acquire);
                if start >= data.len() {
                    let _ = src.end_of_stream();
                    return;
                }

                let length = match length {
                    0 | u32::MAX => DEFAULT_CHUNK_SIZE,
                    n => n as usize,
                };
                let end = (start + length).min(data.len());
                read_offset.store(end, Ordering::Release);

                let mut buffer = gst::Buffer::from_slice(data[start..end].to_vec());
                if let Some(buffer) = buffer.get_mut() {
                    buffer.set_offset(start as u64);
                }
                if let Err(e) = src.push_buffer(buffer) {
                    log::debug!("appsrc rejected buffer at offset {}: {:?}", start, e);
                }
            })
            .seek_data(move |_, target| {
                let Ok(target) = usize::try_from(target) else {
                    return false;
                };
                if target > size {
                    return false;
                }
                offset.store(target, Ordering::Release);
                true
            })
            .build(),
    );
}

/// Configure AppSink for pulled, unsynchronized delivery
///
/// - `sync=false`: frames are handed out as fast as they are pulled
/// - `max-buffers=2`: decode stays at most two frames ahead
/// - `drop=false`: every decoded frame reaches the puller
fn configure_app_sink(app_sink: &gst_app::AppSink) {
    app_sink.set_property("emit-signals", false);
    app_sink.set_property("sync", false);
    app_sink.set_property("max-buffers", 2u32);
    app_sink.set_property("drop", false);
}

/// Map a negotiated format to a channel layout
///
/// # Panics
///
/// Panics on formats outside the BGR family; the caps filter never lets
/// them through.
fn channel_layout(format: gst_video::VideoFormat) -> ChannelLayout {
    match format {
        gst_video::VideoFormat::Bgra | gst_video::VideoFormat::Bgrx => ChannelLayout::Bgra,
        gst_video::VideoFormat::Bgr => ChannelLayout::Bgr,
        other => panic!("unsupported decoder output format: {:?}", other),
    }
}

/// Frame rate from a negotiated framerate fraction
fn fraction_fps(fps: gst::Fraction) -> Option<f64> {
    if fps.numer() > 0 && fps.denom() > 0 {
        Some(fps.numer() as f64 / fps.denom() as f64)
    } else {
        None
    }
}

/// An open GStreamer decode pipeline
pub struct GstSession {
    pipeline: gst::Pipeline,
    app_sink: gst_app::AppSink,
    frame_rate: f64,
    pull_timeout: Duration,

    /// Buffer backing the last frame handed out
    current: Option<gst::MappedBuffer<gst::buffer::Readable>>,

    torn_down: bool,
}

impl GstSession {
    /// Wait for the first frame to be decoded, then start streaming
    fn preroll(&mut self, timeout: Duration) -> Result<(), OpenError> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| OpenError::Pipeline(format!("Failed to start pipeline: {:?}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| OpenError::Pipeline("Pipeline has no bus".to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OpenError::Timeout(timeout));
            }

            let Some(msg) = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(remaining.as_millis() as u64),
                &[
                    gst::MessageType::AsyncDone,
                    gst::MessageType::Error,
                    gst::MessageType::Eos,
                ],
            ) else {
                return Err(OpenError::Timeout(timeout));
            };

            match msg.view() {
                gst::MessageView::AsyncDone(_) => break,
                gst::MessageView::Error(err) => {
                    return Err(OpenError::Unsupported(format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                gst::MessageView::Eos(_) => {
                    return Err(OpenError::Unsupported(
                        "stream ended before any video frame".to_string(),
                    ));
                }
                _ => {}
            }
        }

        let caps = self
            .app_sink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .ok_or_else(|| OpenError::Unsupported("no video stream found".to_string()))?;
        let info = gst_video::VideoInfo::from_caps(&caps)
            .map_err(|e| OpenError::Unsupported(format!("Invalid video caps: {}", e)))?;

        self.frame_rate = match fraction_fps(info.fps()) {
            Some(fps) => {
                log::info!("Detected video FPS: {:.2}", fps);
                fps
            }
            None => {
                log::warn!("Could not detect video FPS, assuming {}fps", FALLBACK_FPS);
                FALLBACK_FPS
            }
        };

        log::info!(
            "Video stream ready: {}x{} {:?}",
            info.width(),
            info.height(),
            info.format()
        );

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| OpenError::Pipeline(format!("Failed to start playback: {:?}", e)))?;

        Ok(())
    }

    /// Surface pipeline errors posted since the last pull
    fn check_bus(&self) -> Result<(), DecodeError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };

        while let Some(msg) =
            bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Warning])
        {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    return Err(DecodeError::Decoder(format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                gst::MessageView::Warning(warning) => {
                    log::warn!("GStreamer warning: {}", warning.error());
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn teardown(&mut self) -> Result<(), CloseError> {
        self.current = None;
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        log::debug!("Setting pipeline state to Null...");
        let result = self
            .pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| CloseError(format!("pipeline refused Null state: {}", e)));

        if let Some(bus) = self.pipeline.bus() {
            let mut drained = 0;
            while bus.pop().is_some() {
                drained += 1;
            }
            if drained > 0 {
                log::debug!("Drained {} pending messages from bus", drained);
            }
        }

        result
    }
}

impl DecoderSession for GstSession {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn pull_frame(&mut self) -> Result<Option<Frame<'_>>, DecodeError> {
        self.current = None;
        self.check_bus()?;

        if self.app_sink.is_eos() {
            return Ok(None);
        }

        let timeout = gst::ClockTime::from_mseconds(self.pull_timeout.as_millis() as u64);
        let Some(sample) = self.app_sink.try_pull_sample(timeout) else {
            if self.app_sink.is_eos() {
                return Ok(None);
            }
            self.check_bus()?;
            return Err(DecodeError::Timeout(self.pull_timeout));
        };

        let caps = sample
            .caps()
            .ok_or_else(|| DecodeError::Malformed("Sample has no caps".to_string()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| DecodeError::Malformed(format!("Invalid video caps: {}", e)))?;
        let layout = channel_layout(info.format());

        let stride = info
            .stride()
            .first()
            .and_then(|&s| usize::try_from(s).ok())
            .ok_or_else(|| DecodeError::Malformed("Invalid row stride".to_string()))?;
        let offset = info.offset().first().copied().unwrap_or(0);

        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| DecodeError::Malformed("Sample has no buffer".to_string()))?;
        let mapped = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| DecodeError::Malformed("Failed to map buffer".to_string()))?;

        let data = self.current.insert(mapped).as_slice();
        let data = data
            .get(offset..)
            .ok_or_else(|| DecodeError::Malformed("Plane offset past buffer end".to_string()))?;

        Ok(Some(Frame {
            kind: FrameKind::Video,
            width: info.width(),
            height: info.height(),
            depth: PixelDepth::U8,
            layout,
            stride,
            data,
        }))
    }

    fn close(mut self) -> Result<(), CloseError> {
        self.teardown()
    }
}

impl Drop for GstSession {
    fn drop(&mut self) {
        log_and_continue!(self.teardown(), "tear down GStreamer pipeline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_layout_mapping() {
        assert_eq!(
            channel_layout(gst_video::VideoFormat::Bgra),
            ChannelLayout::Bgra
        );
        assert_eq!(
            channel_layout(gst_video::VideoFormat::Bgrx),
            ChannelLayout::Bgra
        );
        assert_eq!(channel_layout(gst_video::VideoFormat::Bgr), ChannelLayout::Bgr);
    }

    #[test]
    #[should_panic(expected = "unsupported decoder output format")]
    fn test_channel_layout_rejects_planar() {
        channel_layout(gst_video::VideoFormat::I420);
    }

    #[test]
    fn test_fraction_fps() {
        assert_eq!(fraction_fps(gst::Fraction::new(30, 1)), Some(30.0));
        assert_eq!(
            fraction_fps(gst::Fraction::new(30_000, 1_001)),
            Some(30_000.0 / 1_001.0)
        );
        // Variable frame rate streams report 0/1
        assert_eq!(fraction_fps(gst::Fraction::new(0, 1)), None);
    }

    #[test]
    fn test_empty_stream_rejected_before_init() {
        let decoder = GstDecoder::default();
        let err = decoder.open(&mut std::io::empty()).err();
        assert!(matches!(err, Some(OpenError::Unsupported(_))));
    }
}
