use std::time::Instant;

/// Instantaneous frame rate from the gap between consecutive ticks.
///
/// No smoothing. A zero-length gap returns the previous rate instead of
/// dividing by zero.
#[derive(Debug)]
pub struct FpsMeter {
    previous: Instant,
    rate: f64,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            previous: start,
            rate: 0.0,
        }
    }

    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f64 {
        let delta = now.saturating_duration_since(self.previous).as_secs_f64();
        if delta > 0.0 {
            self.rate = 1.0 / delta;
        }
        self.previous = now;
        self.rate
    }

    /// Most recent rate without taking a sample
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
