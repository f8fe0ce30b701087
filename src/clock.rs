/*!
C1 — an abstract time source.

Every [`crate::CacheEngine`] operation reads `now` exactly once at entry
(spec §4.1); everything downstream — validity checks, sliding bumps, the
eviction passes — uses that single reading. Tests substitute [`FixedClock`]
to assert behavior at exact instants without sleeping.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A UTC time source, in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// The current time, as seconds since `1970-01-01T00:00:00Z`.
    fn now(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs() as i64
    }
}

/// A clock pinned to a caller-controlled instant, advanced manually.
///
/// Used in tests that need to assert `Get`/`Peek` behavior at precise
/// offsets from a base time (spec §8's scenarios are all phrased this way:
/// "at `T0+30s`", "at `T0+9d`", ...).
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<i64>>,
}

impl FixedClock {
    pub fn new(start: i64) -> Self {
        FixedClock {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `seconds` and return the new reading.
    pub fn advance(&self, seconds: i64) -> i64 {
        let mut now = self.now.lock();
        *now += seconds;
        *now
    }

    pub fn set(&self, at: i64) {
        *self.now.lock() = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        *self.now.lock()
    }
}

/// A clock backed by a fixed offset applied to the system clock.
///
/// This is the practical shape a network-synchronized time source takes
/// once synchronization has run: the offset (computed once, out of band, by
/// whatever NTP/PTP client the deployment uses) is applied to every
/// subsequent system-clock read. KVLite does not perform the synchronization
/// itself — that belongs to the deployment's time daemon — it only composes
/// with an already-computed offset.
#[derive(Debug, Clone, Copy)]
pub struct OffsetClock {
    offset_seconds: i64,
}

impl OffsetClock {
    pub fn new(offset_seconds: i64) -> Self {
        OffsetClock { offset_seconds }
    }
}

impl Clock for OffsetClock {
    fn now(&self) -> i64 {
        SystemClock.now() + self.offset_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_monotonically() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        assert_eq!(clock.advance(10), 1_010);
        assert_eq!(clock.now(), 1_010);
    }

    #[test]
    fn offset_clock_shifts_system_time() {
        let offset = OffsetClock::new(3600);
        let system = SystemClock.now();
        let shifted = offset.now();
        assert!(shifted >= system + 3599 && shifted <= system + 3601);
    }
}
