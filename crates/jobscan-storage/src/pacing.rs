//! Randomized pauses between browser interactions.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Inclusive range of whole seconds to pause for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseWindow {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl PauseWindow {
    pub const NAVIGATION: Self = Self::new(4, 10);
    pub const USERNAME: Self = Self::new(4, 10);
    pub const PASSWORD: Self = Self::new(6, 10);
    pub const SECRET_ANSWER: Self = Self::new(7, 10);
    pub const SCROLL_SETTLE: Self = Self::new(2, 5);
    pub const SCROLL_STEP: Self = Self::new(8, 16);

    pub const fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (low, high) = if self.min_secs <= self.max_secs {
            (self.min_secs, self.max_secs)
        } else {
            (self.max_secs, self.min_secs)
        };
        Duration::from_secs(rng.gen_range(low..=high))
    }
}

pub trait Pacer {
    fn pause(&self, window: PauseWindow);
}

/// Sleeps for a uniformly random number of seconds inside each window.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPacer;

impl Pacer for RandomPacer {
    fn pause(&self, window: PauseWindow) {
        let delay = window.sample(&mut rand::thread_rng());
        debug!(secs = delay.as_secs(), "pausing");
        thread::sleep(delay);
    }
}

/// Never pauses. For fixtures and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacer;

impl Pacer for NoPacer {
    fn pause(&self, _window: PauseWindow) {}
}
