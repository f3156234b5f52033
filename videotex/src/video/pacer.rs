//! Playback pacer
//!
//! [`VideoTexture`] keeps a texture synchronized with wall-clock playback
//! time. Each [`update`](VideoTexture::update) works out which frame should
//! be on screen, discards frames the decoder fell behind on and uploads the
//! newest one. Nothing runs between ticks; all decoding happens on the
//! caller's thread inside `update()` and `skip()`.

use super::session::{DecoderSession, VideoDecoder};
use super::stats::VideoStats;
use crate::clock::{Clock, SystemClock};
use crate::log_and_continue;
use crate::sink::TextureSink;
use common::{DecodeError, OpenError, PlaybackReport, PlaybackState};
use std::io::Read;
use std::time::Duration;

/// Outcome of pulling the frame that should be displayed
enum Pull {
    Displayed,
    Rejected,
    Ignored,
    EndOfStream,
    Failed(DecodeError),
}

/// A texture whose contents follow a playing video
pub struct VideoTexture<D: VideoDecoder, S: TextureSink> {
    decoder: D,
    sink: S,
    clock: Box<dyn Clock>,

    /// Open session, `None` while idle
    session: Option<D::Session>,

    /// Clock reading of the first tick after `play()`
    start_time: Option<u64>,

    /// Native frame rate times the requested speed, 0 while idle
    effective_fps: f64,

    /// Frames consumed by ticks since playback started
    current_frame: u64,

    /// Set when the session reports end of stream
    done: bool,

    stats: VideoStats,
    stats_interval: Option<Duration>,
}

impl<D: VideoDecoder, S: TextureSink> VideoTexture<D, S> {
    /// Create an idle video texture paced by the system clock
    pub fn new(decoder: D, sink: S) -> Self {
        Self::with_clock(decoder, sink, Box::new(SystemClock::new()))
    }

    /// Create an idle video texture paced by `clock`
    pub fn with_clock(decoder: D, sink: S, clock: Box<dyn Clock>) -> Self {
        Self {
            decoder,
            sink,
            clock,
            session: None,
            start_time: None,
            effective_fps: 0.0,
            current_frame: 0,
            done: false,
            stats: VideoStats::new(),
            stats_interval: None,
        }
    }

    /// Log playback statistics every `interval` from `update()`
    pub fn set_stats_interval(&mut self, interval: Option<Duration>) {
        self.stats_interval = interval;
    }

    /// Start playing `stream` at `speed` times its native frame rate
    ///
    /// Any running playback is stopped first. On failure the texture stays
    /// idle and the stream is dropped.
    pub fn play<R: Read>(&mut self, mut stream: R, speed: f64) -> Result<(), OpenError> {
        self.stop();

        let session = self.decoder.open(&mut stream)?;
        let native_fps = session.frame_rate();

        self.effective_fps = native_fps * speed;
        self.start_time = None;
        self.current_frame = 0;
        self.done = false;
        self.session = Some(session);
        self.stats.set_effective_fps(self.effective_fps);

        log::info!(
            "Playback started at {:.2} fps ({:.2} fps native, {}x speed)",
            self.effective_fps,
            native_fps,
            speed
        );
        Ok(())
    }

    /// Start playing `stream` at its native frame rate
    pub fn play_default<R: Read>(&mut self, stream: R) -> Result<(), OpenError> {
        self.play(stream, 1.0)
    }

    /// Advance playback to the current time
    ///
    /// Does nothing while idle or after the end of the stream. A decode
    /// error ends playback.
    pub fn update(&mut self) {
        if self.done {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let now = self.clock.now_millis();
        let start = *self.start_time.get_or_insert(now);
        let expected = expected_frame(now.saturating_sub(start), self.effective_fps);

        let mut outcome = None;
        while self.current_frame + 1 < expected {
            self.current_frame += 1;
            match session.pull_frame() {
                Ok(Some(_)) => self.stats.record_dropped(),
                Ok(None) => {
                    outcome = Some(Pull::EndOfStream);
                    break;
                }
                Err(e) => {
                    outcome = Some(Pull::Failed(e));
                    break;
                }
            }
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None if self.current_frame < expected => {
                self.current_frame = expected;
                present_next(session, &mut self.sink)
            }
            None => {
                log::trace!("Frame {} still current", self.current_frame);
                return;
            }
        };

        match outcome {
            Pull::Displayed => {
                self.done = false;
                self.stats.record_displayed();
                log::trace!("Displayed frame {}", self.current_frame);
            }
            Pull::Rejected => {
                self.stats.record_rejected();
                log::warn!(
                    "Frame {} was not uploaded, keeping previous texture",
                    self.current_frame
                );
            }
            Pull::Ignored => self.stats.record_ignored(),
            Pull::EndOfStream => {
                self.done = true;
                log::info!("Playback finished after {} frames", self.current_frame);
            }
            Pull::Failed(e) => {
                log::error!("Decoding failed at frame {}: {}", self.current_frame, e);
                self.stop();
                return;
            }
        }

        if let Some(interval) = self.stats_interval {
            self.stats.maybe_log_stats(interval);
        }
    }

    /// Discard `seconds` worth of frames without moving the frame index
    ///
    /// Hitting the end of the stream marks playback finished; a decode
    /// error ends playback. Does nothing while idle.
    pub fn skip(&mut self, seconds: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let count = (seconds * self.effective_fps).floor() as u64;
        log::debug!("Skipping {} frames ({}s)", count, seconds);

        let mut failure = None;
        for _ in 0..count {
            match session.pull_frame() {
                Ok(Some(_)) => self.stats.record_skipped(),
                Ok(None) => {
                    self.done = true;
                    log::info!("Reached end of stream while skipping");
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            log::error!("Decoding failed while skipping: {}", e);
            self.stop();
        }
    }

    /// Close the session and return to idle
    ///
    /// The texture and its contents are kept.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            log_and_continue!(session.close(), "stop playback");
            log::info!("Playback stopped at frame {}", self.current_frame);
        }

        self.start_time = None;
        self.effective_fps = 0.0;
        self.current_frame = 0;
        self.done = false;
        self.stats.set_effective_fps(0.0);
    }

    /// Destroy the texture and stop playback
    pub fn release(&mut self) {
        self.sink.release();
        self.stop();
    }

    /// Handle of the texture, 0 when none is allocated
    pub fn handle(&self) -> u32 {
        self.sink.handle()
    }

    pub fn width(&self) -> u32 {
        self.sink.width()
    }

    pub fn height(&self) -> u32 {
        self.sink.height()
    }

    /// Effective frame rate, 0 while idle
    pub fn fps(&self) -> f64 {
        self.effective_fps
    }

    /// Whether the stream has ended
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn state(&self) -> PlaybackState {
        match (&self.session, self.done) {
            (None, _) => PlaybackState::Idle,
            (Some(_), false) => PlaybackState::Playing,
            (Some(_), true) => PlaybackState::Finished,
        }
    }

    /// Frames consumed by ticks since playback started
    pub fn frame_index(&self) -> u64 {
        self.current_frame
    }

    pub fn stats(&self) -> &VideoStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn report(&self) -> PlaybackReport {
        PlaybackReport {
            state: self.state(),
            texture_handle: self.handle(),
            width: self.width(),
            height: self.height(),
            effective_fps: self.effective_fps,
            frame_index: self.current_frame,
            frames_displayed: self.stats.frames_displayed(),
            frames_dropped: self.stats.frames_dropped(),
            frames_skipped: self.stats.frames_skipped(),
            frames_ignored: self.stats.frames_ignored(),
            frames_rejected: self.stats.frames_rejected(),
            texture_reallocations: self.sink.reallocations(),
            drop_rate: self.stats.drop_rate(),
        }
    }
}

impl<D: VideoDecoder, S: TextureSink> Drop for VideoTexture<D, S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Index of the frame that should be visible `elapsed_ms` into playback
fn expected_frame(elapsed_ms: u64, fps: f64) -> u64 {
    // NaN and negative rates saturate to 0
    (elapsed_ms as f64 / 1000.0 * fps).floor() as u64
}

/// Pull one frame and upload it if it is video
fn present_next<T: DecoderSession, S: TextureSink>(session: &mut T, sink: &mut S) -> Pull {
    match session.pull_frame() {
        Ok(Some(frame)) if frame.is_video() => {
            if sink.upload(&frame) {
                Pull::Displayed
            } else {
                Pull::Rejected
            }
        }
        Ok(Some(frame)) => {
            log::debug!("Ignoring {:?} frame", frame.kind);
            Pull::Ignored
        }
        Ok(None) => Pull::EndOfStream,
        Err(e) => Pull::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use common::{ChannelLayout, CloseError, Frame, FrameKind, PixelDepth};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Copy)]
    enum Step {
        Video,
        Audio,
        Fail,
    }

    struct Session {
        steps: Vec<Step>,
        pos: usize,
        pixels: Vec<u8>,
        fps: f64,
        pulls: Rc<Cell<usize>>,
        closed: Rc<Cell<usize>>,
        fail_close: bool,
    }

    impl DecoderSession for Session {
        fn frame_rate(&self) -> f64 {
            self.fps
        }

        fn pull_frame(&mut self) -> Result<Option<Frame<'_>>, DecodeError> {
            self.pulls.set(self.pulls.get() + 1);
            let Some(step) = self.steps.get(self.pos).copied() else {
                return Ok(None);
            };
            self.pos += 1;
            let kind = match step {
                Step::Video => FrameKind::Video,
                Step::Audio => FrameKind::Audio,
                Step::Fail => return Err(DecodeError::Decoder("corrupt packet".into())),
            };
            Ok(Some(Frame {
                kind,
                width: 2,
                height: 2,
                depth: PixelDepth::U8,
                layout: ChannelLayout::Bgra,
                stride: 8,
                data: &self.pixels,
            }))
        }

        fn close(self) -> Result<(), CloseError> {
            self.closed.set(self.closed.get() + 1);
            if self.fail_close {
                return Err(CloseError("pipeline refused Null state".into()));
            }
            Ok(())
        }
    }

    struct Decoder {
        steps: Vec<Step>,
        fps: f64,
        pulls: Rc<Cell<usize>>,
        closed: Rc<Cell<usize>>,
        fail_close: bool,
    }

    impl Decoder {
        fn new(steps: Vec<Step>, fps: f64) -> Self {
            Self {
                steps,
                fps,
                pulls: Rc::new(Cell::new(0)),
                closed: Rc::new(Cell::new(0)),
                fail_close: false,
            }
        }
    }

    impl VideoDecoder for Decoder {
        type Session = Session;

        fn open(&self, stream: &mut dyn Read) -> Result<Session, OpenError> {
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes)?;
            if bytes.is_empty() {
                return Err(OpenError::Unsupported("empty stream".into()));
            }
            Ok(Session {
                steps: self.steps.clone(),
                pos: 0,
                pixels: vec![0; 16],
                fps: self.fps,
                pulls: Rc::clone(&self.pulls),
                closed: Rc::clone(&self.closed),
                fail_close: self.fail_close,
            })
        }
    }

    #[derive(Default)]
    struct Sink {
        uploads: usize,
        handle: u32,
        released: usize,
        reject: bool,
    }

    impl TextureSink for Sink {
        fn upload(&mut self, _frame: &Frame<'_>) -> bool {
            if self.reject {
                return false;
            }
            self.uploads += 1;
            self.handle = 7;
            true
        }

        fn handle(&self) -> u32 {
            self.handle
        }

        fn width(&self) -> u32 {
            if self.handle == 0 { 0 } else { 2 }
        }

        fn height(&self) -> u32 {
            self.width()
        }

        fn release(&mut self) {
            self.released += 1;
            self.handle = 0;
        }
    }

    fn texture(steps: Vec<Step>, fps: f64) -> (VideoTexture<Decoder, Sink>, ManualClock) {
        let clock = ManualClock::new(10_000);
        let texture =
            VideoTexture::with_clock(Decoder::new(steps, fps), Sink::default(), Box::new(clock.clone()));
        (texture, clock)
    }

    fn pulls(texture: &VideoTexture<Decoder, Sink>) -> usize {
        texture.decoder.pulls.get()
    }

    #[test]
    fn test_expected_frame() {
        assert_eq!(expected_frame(0, 30.0), 0);
        assert_eq!(expected_frame(500, 10.0), 5);
        assert_eq!(expected_frame(99, 10.0), 0);
        assert_eq!(expected_frame(1_000, 29.97), 29);
        assert_eq!(expected_frame(1_000, f64::NAN), 0);
        assert_eq!(expected_frame(1_000, -10.0), 0);
    }

    #[test]
    fn test_first_tick_latches_start_time() {
        let (mut texture, clock) = texture(vec![Step::Video; 10], 10.0);
        texture.play_default(&b"video"[..]).unwrap();

        texture.update();
        assert_eq!(pulls(&texture), 0);
        assert_eq!(texture.frame_index(), 0);

        clock.advance(100);
        texture.update();
        assert_eq!(pulls(&texture), 1);
        assert_eq!(texture.frame_index(), 1);
        assert_eq!(texture.sink().uploads, 1);
    }

    #[test]
    fn test_catch_up_discards_all_but_last() {
        let (mut texture, clock) = texture(vec![Step::Video; 10], 10.0);
        texture.play_default(&b"video"[..]).unwrap();
        texture.update();

        clock.advance(500);
        texture.update();
        assert_eq!(pulls(&texture), 5);
        assert_eq!(texture.frame_index(), 5);
        assert_eq!(texture.stats().frames_dropped(), 4);
        assert_eq!(texture.sink().uploads, 1);
    }

    #[test]
    fn test_idle_operations_are_noops() {
        let (mut texture, _clock) = texture(vec![Step::Video], 10.0);
        texture.update();
        texture.skip(5.0);
        texture.stop();
        assert_eq!(texture.state(), PlaybackState::Idle);
        assert_eq!(texture.fps(), 0.0);
        assert_eq!(pulls(&texture), 0);
    }

    #[test]
    fn test_open_failure_stays_idle() {
        let (mut texture, _clock) = texture(vec![Step::Video], 10.0);
        let err = texture.play(&b""[..], 1.0).unwrap_err();
        assert!(matches!(err, OpenError::Unsupported(_)));
        assert_eq!(texture.state(), PlaybackState::Idle);
        assert_eq!(texture.fps(), 0.0);
    }

    #[test]
    fn test_non_video_frame_ignored() {
        let (mut texture, clock) = texture(vec![Step::Audio, Step::Video], 10.0);
        texture.play_default(&b"video"[..]).unwrap();
        texture.update();

        clock.advance(100);
        texture.update();
        assert_eq!(texture.sink().uploads, 0);
        assert_eq!(texture.stats().frames_ignored(), 1);
        assert!(!texture.is_done());
        assert_eq!(texture.handle(), 0);
    }

    #[test]
    fn test_decode_error_aborts_to_idle() {
        let (mut texture, clock) = texture(vec![Step::Video, Step::Fail, Step::Video], 10.0);
        texture.play_default(&b"video"[..]).unwrap();
        texture.update();

        clock.advance(300);
        texture.update();
        assert_eq!(texture.state(), PlaybackState::Idle);
        assert_eq!(texture.frame_index(), 0);
        assert_eq!(texture.decoder.closed.get(), 1);
        assert_eq!(texture.sink().uploads, 0);
    }

    #[test]
    fn test_end_of_stream_during_catch_up() {
        let (mut texture, clock) = texture(vec![Step::Video; 2], 10.0);
        texture.play_default(&b"video"[..]).unwrap();
        texture.update();

        clock.advance(1_000);
        texture.update();
        assert!(texture.is_done());
        assert_eq!(texture.state(), PlaybackState::Finished);
        assert_eq!(pulls(&texture), 3);

        clock.advance(1_000);
        texture.update();
        assert_eq!(pulls(&texture), 3);
    }

    #[test]
    fn test_skip_at_end_of_stream_finishes() {
        let (mut texture, _clock) = texture(vec![Step::Video; 3], 10.0);
        texture.play_default(&b"video"[..]).unwrap();
        texture.skip(2.0);
        assert!(texture.is_done());
        assert_eq!(texture.stats().frames_skipped(), 3);
        assert_eq!(pulls(&texture), 4);
        assert_eq!(texture.frame_index(), 0);
    }

    #[test]
    fn test_skip_decode_error_aborts() {
        let (mut texture, _clock) = texture(vec![Step::Video, Step::Fail], 10.0);
        texture.play_default(&b"video"[..]).unwrap();
        texture.skip(1.0);
        assert_eq!(texture.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_release_then_drop() {
        let (mut texture, clock) = texture(vec![Step::Video; 4], 10.0);
        texture.play_default(&b"video"[..]).unwrap();
        texture.update();
        clock.advance(100);
        texture.update();
        assert_ne!(texture.handle(), 0);

        texture.release();
        texture.release();
        assert_eq!(texture.handle(), 0);
        assert_eq!((texture.width(), texture.height()), (0, 0));
        assert_eq!(texture.state(), PlaybackState::Idle);
        assert_eq!(texture.decoder.closed.get(), 1);
        assert_eq!(texture.sink().released, 2);
    }

    #[test]
    fn test_rejected_frame_not_counted_as_displayed() {
        let (mut texture, clock) = texture(vec![Step::Video; 4], 10.0);
        texture.sink.reject = true;
        texture.play_default(&b"video"[..]).unwrap();
        texture.update();

        clock.advance(100);
        texture.update();
        assert_eq!(texture.frame_index(), 1);
        assert_eq!(texture.stats().frames_displayed(), 0);
        assert_eq!(texture.stats().frames_rejected(), 1);
        assert_eq!(texture.handle(), 0);
        assert_eq!(texture.state(), PlaybackState::Playing);

        let report = texture.report();
        assert_eq!(report.frames_displayed, 0);
        assert_eq!(report.frames_rejected, 1);
    }

    #[test]
    fn test_close_failure_still_resets_state() {
        let (mut texture, clock) = texture(vec![Step::Video; 4], 10.0);
        texture.decoder.fail_close = true;
        texture.play(&b"video"[..], 2.0).unwrap();
        texture.update();
        clock.advance(100);
        texture.update();
        assert_eq!(texture.frame_index(), 2);

        texture.stop();
        assert_eq!(texture.decoder.closed.get(), 1);
        assert_eq!(texture.state(), PlaybackState::Idle);
        assert_eq!(texture.fps(), 0.0);
        assert_eq!(texture.frame_index(), 0);
        assert!(!texture.is_done());

        texture.play_default(&b"video"[..]).unwrap();
        texture.release();
        assert_eq!(texture.decoder.closed.get(), 2);
        assert_eq!(texture.state(), PlaybackState::Idle);
        assert_eq!(texture.fps(), 0.0);
        assert_eq!(texture.handle(), 0);
    }

    #[test]
    fn test_report_reflects_state() {
        let (mut texture, clock) = texture(vec![Step::Video; 20], 24.0);
        texture.play(&b"video"[..], 0.5).unwrap();
        texture.update();
        clock.advance(1_000);
        texture.update();

        let report = texture.report();
        assert_eq!(report.state, PlaybackState::Playing);
        assert_eq!(report.effective_fps, 12.0);
        assert_eq!(report.frame_index, 12);
        assert_eq!(report.frames_displayed, 1);
        assert_eq!(report.frames_dropped, 11);
        assert_eq!(report.texture_handle, 7);
    }
}
