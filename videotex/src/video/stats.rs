//! Video playback statistics tracking
//!
//! Counts what the pacer did with every frame it pulled:
//! - displayed (uploaded to the texture)
//! - dropped while catching up with the clock
//! - skipped through `skip()`
//! - ignored because the decoder handed out a non-video frame
//! - rejected by the texture sink

use std::time::{Duration, Instant};

/// Tracks video playback statistics
#[derive(Debug)]
pub struct VideoStats {
    /// Frames uploaded to the texture
    pub(super) frames_displayed: u64,

    /// Frames discarded by the catch-up loop
    pub(super) frames_dropped: u64,

    /// Frames discarded by explicit skips
    pub(super) frames_skipped: u64,

    /// Non-video frames pulled in place of a displayed frame
    pub(super) frames_ignored: u64,

    /// Video frames the sink could not upload
    pub(super) frames_rejected: u64,

    /// Frame rate the current session is paced at
    pub(super) effective_fps: f64,

    /// Last time stats were logged
    pub(super) last_stats_log: Instant,
}

impl Default for VideoStats {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoStats {
    /// Create new statistics tracker
    pub fn new() -> Self {
        Self {
            frames_displayed: 0,
            frames_dropped: 0,
            frames_skipped: 0,
            frames_ignored: 0,
            frames_rejected: 0,
            effective_fps: 0.0,
            last_stats_log: Instant::now(),
        }
    }

    pub fn record_displayed(&mut self) {
        self.frames_displayed += 1;
    }

    pub fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    pub fn record_skipped(&mut self) {
        self.frames_skipped += 1;
    }

    pub fn record_ignored(&mut self) {
        self.frames_ignored += 1;
    }

    pub fn record_rejected(&mut self) {
        self.frames_rejected += 1;
    }

    pub fn set_effective_fps(&mut self, fps: f64) {
        self.effective_fps = fps;
    }

    pub fn frames_displayed(&self) -> u64 {
        self.frames_displayed
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    pub fn frames_ignored(&self) -> u64 {
        self.frames_ignored
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Get current drop rate as percentage
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_displayed + self.frames_dropped;
        if total == 0 {
            0.0
        } else {
            (self.frames_dropped as f64 / total as f64) * 100.0
        }
    }

    /// Log statistics if interval has elapsed
    pub fn maybe_log_stats(&mut self, interval: Duration) {
        if self.last_stats_log.elapsed() < interval {
            return;
        }

        log::info!(
            "Video stats ({:.2} fps): {} displayed, {} dropped, {} skipped, {} ignored, {} rejected ({:.1}% drop rate)",
            self.effective_fps,
            self.frames_displayed,
            self.frames_dropped,
            self.frames_skipped,
            self.frames_ignored,
            self.frames_rejected,
            self.drop_rate()
        );

        self.last_stats_log = Instant::now();
    }

    /// Reset statistics counters
    pub fn reset(&mut self) {
        self.frames_displayed = 0;
        self.frames_dropped = 0;
        self.frames_skipped = 0;
        self.frames_ignored = 0;
        self.frames_rejected = 0;
        self.effective_fps = 0.0;
        self.last_stats_log = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_rate() {
        let mut stats = VideoStats::new();
        assert_eq!(stats.drop_rate(), 0.0);

        for _ in 0..3 {
            stats.record_displayed();
        }
        stats.record_dropped();
        assert_eq!(stats.drop_rate(), 25.0);

        // Skips and ignored frames are not counted as drops
        stats.record_skipped();
        stats.record_ignored();
        stats.record_rejected();
        assert_eq!(stats.drop_rate(), 25.0);
    }

    #[test]
    fn test_reset() {
        let mut stats = VideoStats::new();
        stats.set_effective_fps(24.0);
        stats.record_displayed();
        stats.record_dropped();
        stats.record_skipped();
        stats.record_rejected();
        stats.reset();

        assert_eq!(stats.frames_displayed(), 0);
        assert_eq!(stats.frames_dropped(), 0);
        assert_eq!(stats.frames_skipped(), 0);
        assert_eq!(stats.frames_rejected(), 0);
        assert_eq!(stats.effective_fps, 0.0);
    }

    #[test]
    fn test_maybe_log_stats_respects_interval() {
        let mut stats = VideoStats::new();
        let before = stats.last_stats_log;
        stats.maybe_log_stats(Duration::from_secs(3600));
        assert_eq!(stats.last_stats_log, before);

        stats.maybe_log_stats(Duration::ZERO);
        assert!(stats.last_stats_log >= before);
    }
}
