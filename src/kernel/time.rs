/// One animation frame of playback progress sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick {
    pub frame: u64,
}

/// Cadence at which the host samples the media element and calls `TimelineEngine::tick`.
pub const TICK_MS: u64 = 16;

impl Tick {
    pub fn new() -> Self {
        Tick { frame: 0 }
    }

    pub fn next(&self) -> Self {
        Tick { frame: self.frame + 1 }
    }
}
