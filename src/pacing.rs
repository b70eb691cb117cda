use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Between two listings of one keyword
pub const LISTING_DELAY: (Duration, Duration) = (Duration::from_secs(1), Duration::from_secs(3));
/// Between keywords, and between failed fetch attempts
pub const KEYWORD_DELAY: (Duration, Duration) = (Duration::from_secs(2), Duration::from_secs(5));
pub const RETRY_BACKOFF: (Duration, Duration) = (Duration::from_secs(2), Duration::from_secs(5));

// --- Pacing policy ---

pub trait Pacer {
    /// Block for a duration drawn from `[min, max]`.
    fn wait(&self, min: Duration, max: Duration);
}

impl<P: Pacer + ?Sized> Pacer for &P {
    fn wait(&self, min: Duration, max: Duration) {
        (**self).wait(min, max)
    }
}

/// Uniformly random blocking sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPacer;

impl Pacer for RandomPacer {
    fn wait(&self, min: Duration, max: Duration) {
        thread::sleep(random_between(min, max));
    }
}

pub fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

// --- Cycle scheduling ---

const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// Fixed-interval ticker measured from each tick. The first tick fires
/// immediately.
pub struct Ticker {
    interval: Duration,
    next: Option<Instant>,
    shutdown: Arc<AtomicBool>,
}

impl Ticker {
    pub fn new(interval: Duration, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            interval,
            next: None,
            shutdown,
        }
    }

    /// Blocks until the next tick is due. Returns false once shutdown has
    /// been requested.
    pub fn tick(&mut self) -> bool {
        if let Some(deadline) = self.next {
            loop {
                if self.shutdown.load(Ordering::SeqCst) {
                    return false;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(SHUTDOWN_POLL));
            }
        }
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        self.next = Some(Instant::now() + self.interval);
        true
    }
}
