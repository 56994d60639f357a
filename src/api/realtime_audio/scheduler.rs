/// Gap-free playback scheduling for streamed reply chunks.
///
/// Each chunk starts when the previous one ends, or right away if playback has
/// already drained. Times are seconds on the speaker's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackScheduler {
    next_start: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start time for a chunk of `duration` seconds arriving at `now`.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = now.max(self.next_start);
        self.next_start = start + duration;
        start
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }
}
