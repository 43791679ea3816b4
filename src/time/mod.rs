use core::{
    ops::Add,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// A reading of the kernel clock, in ticks since boot. With the default tick
/// source a tick is one millisecond, so this is also the value returned by
/// `systime()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    /// The instant the kernel booted.
    pub const BOOT: Instant = Instant(0);

    /// Create an instant from a number of milliseconds since boot.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The number of milliseconds elapsed between boot and this instant.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the duration elapsed since the earlier instant. If `earlier`
    /// is later than `self`, the returned duration will be zero.
    #[must_use]
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, duration: Duration) -> Instant {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Instant(self.0.saturating_add(ms))
    }
}

/// The monotonic kernel clock. It only moves forward, one tick at a time from
/// the tick source, or in a single jump when the dispatcher fast-forwards an
/// idle system with a manual tick source.
#[derive(Debug, Default)]
pub struct Clock(AtomicU64);

impl Clock {
    /// Create a clock reading [`Instant::BOOT`].
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// The current time.
    #[must_use]
    pub fn now(&self) -> Instant {
        Instant(self.0.load(Ordering::Acquire))
    }

    /// Advance the clock by one tick and return the new time.
    pub fn tick(&self) -> Instant {
        Instant(self.0.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Move the clock forward to `instant`. Does nothing if the clock is
    /// already past it.
    pub fn advance_to(&self, instant: Instant) {
        self.0.fetch_max(instant.0, Ordering::AcqRel);
    }
}
