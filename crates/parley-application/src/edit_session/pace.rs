//! How long a streamed edit chunk takes to reveal.

use std::time::Duration;

/// Decides the reveal duration of progressive edit chunks.
///
/// One instance lives for one edit request and sees the latency between
/// consecutive chunks.
pub trait TypingPace: Send {
    fn observe(&mut self, latency: Duration);

    /// `None` applies the chunk at once.
    fn reveal_duration(&self) -> Option<Duration>;
}

/// Reveals each chunk over the mean latency seen so far, so text keeps
/// flowing while the next chunk is on its way.
#[derive(Debug, Default)]
pub struct MovingAveragePace {
    total: Duration,
    samples: u32,
}

impl MovingAveragePace {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TypingPace for MovingAveragePace {
    fn observe(&mut self, latency: Duration) {
        self.total += latency;
        self.samples += 1;
    }

    fn reveal_duration(&self) -> Option<Duration> {
        if self.samples == 0 {
            return None;
        }
        Some(self.total / self.samples)
    }
}

/// Never animates.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantPace;

impl TypingPace for InstantPace {
    fn observe(&mut self, _latency: Duration) {}

    fn reveal_duration(&self) -> Option<Duration> {
        None
    }
}

pub type PaceFactory = Box<dyn Fn() -> Box<dyn TypingPace> + Send + Sync>;
