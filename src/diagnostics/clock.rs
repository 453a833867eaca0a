/*!
 * Clock
 * Wall-clock capability for diagnostics and dump naming
 */

use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    /// Seconds since the UNIX epoch.
    fn unix_seconds(&self) -> i64;
}

/// The system wall clock.
pub struct WallClock;

impl Clock for WallClock {
    fn unix_seconds(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// A clock pinned to one instant, for deterministic dump names in embedder
/// test rigs.
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn unix_seconds(&self) -> i64 {
        self.0
    }
}
