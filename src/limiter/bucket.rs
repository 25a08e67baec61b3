//! Token bucket arithmetic.
//!
//! Pure state types and transition functions; no I/O and no reads of
//! the wall clock. Every function takes `now` explicitly, which makes
//! refill and day-roll behavior deterministic under test. The limiter
//! front end persists these states and drives them through
//! compare-and-set writes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::day::next_day_boundary;

/// A continuously-refilling bucket (requests-per-minute or
/// tokens-per-minute).
///
/// Refill is purely time-based: `available` grows by
/// `capacity / 60` per elapsed second, clamped to `capacity`.
/// Fractional tokens are the normal case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefillBucket {
    /// Maximum tokens the bucket holds (the per-minute quota).
    pub capacity: f64,
    /// Tokens currently available; `0 ≤ available ≤ capacity`.
    pub available: f64,
    /// Instant of the last refill computation.
    pub last_refill_at: DateTime<Utc>,
}

impl RefillBucket {
    /// A full bucket as of `now`.
    #[must_use]
    pub fn full(capacity: f64, now: DateTime<Utc>) -> Self {
        Self {
            capacity,
            available: capacity,
            last_refill_at: now,
        }
    }

    /// The bucket state after refilling up to `now`.
    ///
    /// Negative elapsed time (clock skew between writers) refills
    /// nothing rather than draining.
    #[must_use]
    pub fn refilled(&self, now: DateTime<Utc>) -> Self {
        let elapsed = (now - self.last_refill_at)
            .to_std()
            .map_or(0.0, |d| d.as_secs_f64());
        let refill = elapsed * self.capacity / 60.0;
        Self {
            capacity: self.capacity,
            available: (self.available + refill).min(self.capacity),
            last_refill_at: now,
        }
    }

    /// Attempts to take `amount` tokens; mutates only on success.
    #[must_use]
    pub fn try_acquire(&mut self, amount: f64) -> bool {
        if self.available + f64::EPSILON >= amount {
            self.available = (self.available - amount).max(0.0);
            true
        } else {
            false
        }
    }

    /// Returns `amount - available` worth of refill time: how long a
    /// caller must wait before `amount` tokens could be available.
    /// Zero when they already are.
    #[must_use]
    pub fn wait_for(&self, amount: f64) -> Duration {
        if self.available + f64::EPSILON >= amount {
            return Duration::ZERO;
        }
        let deficit = amount - self.available;
        let secs = deficit * 60.0 / self.capacity.max(f64::EPSILON);
        Duration::from_secs_f64(secs)
    }

    /// Tokens consumed out of the current window.
    #[must_use]
    pub fn used(&self) -> f64 {
        (self.capacity - self.available).max(0.0)
    }

    /// Returns `amount` tokens to the bucket (reservation
    /// reconciliation and conflict rollback), clamped to capacity.
    pub fn release(&mut self, amount: f64) {
        self.available = (self.available + amount).min(self.capacity);
    }
}

/// The calendar-day request counter (requests-per-day).
///
/// An integer counter that resets to zero exactly once each time the
/// wall clock crosses the configured timezone's local midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    /// Daily request quota.
    pub capacity: u32,
    /// Requests counted against the current day.
    pub count_for_day: u32,
    /// Next local midnight, in UTC.
    pub day_boundary_at: DateTime<Utc>,
}

impl DayBucket {
    /// A fresh counter whose boundary is the next local midnight
    /// after `now`.
    #[must_use]
    pub fn new(capacity: u32, now: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            capacity,
            count_for_day: 0,
            day_boundary_at: next_day_boundary(now, tz),
        }
    }

    /// The counter state after applying any day rollover up to `now`.
    ///
    /// Crossing the boundary zeroes the count and advances the
    /// boundary past `now`; multiple elapsed days collapse into one
    /// reset.
    #[must_use]
    pub fn rolled(&self, now: DateTime<Utc>, tz: Tz) -> Self {
        if now < self.day_boundary_at {
            return self.clone();
        }
        Self {
            capacity: self.capacity,
            count_for_day: 0,
            day_boundary_at: next_day_boundary(now, tz),
        }
    }

    /// Attempts to count one more request against today.
    #[must_use]
    pub fn try_acquire(&mut self) -> bool {
        if self.count_for_day < self.capacity {
            self.count_for_day += 1;
            true
        } else {
            false
        }
    }

    /// Time until the next reset.
    #[must_use]
    pub fn wait_until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.day_boundary_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap_or_else(|e| unreachable!("{e}"))
    }

    #[test]
    fn test_full_bucket_grants_capacity() {
        let now = t("2026-03-02T10:00:00Z");
        let mut bucket = RefillBucket::full(5.0, now);
        for _ in 0..5 {
            assert!(bucket.try_acquire(1.0));
        }
        assert!(!bucket.try_acquire(1.0));
        assert!(bucket.available.abs() < 1e-9);
    }

    #[test]
    fn test_refill_rate_is_capacity_per_minute() {
        let start = t("2026-03-02T10:00:00Z");
        let mut bucket = RefillBucket::full(60.0, start);
        assert!(bucket.try_acquire(60.0));

        let half_minute = t("2026-03-02T10:00:30Z");
        let refilled = bucket.refilled(half_minute);
        assert!((refilled.available - 30.0).abs() < 1e-6);

        let two_minutes = t("2026-03-02T10:02:00Z");
        let capped = bucket.refilled(two_minutes);
        assert!((capped.available - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let start = t("2026-03-02T10:00:00Z");
        let bucket = RefillBucket::full(5.0, start);
        let later = bucket.refilled(t("2026-03-03T10:00:00Z"));
        assert!((later.available - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_skew_refills_nothing() {
        let start = t("2026-03-02T10:00:00Z");
        let bucket = RefillBucket::full(5.0, start);
        let earlier = bucket.refilled(t("2026-03-02T09:00:00Z"));
        assert!((earlier.available - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_boundary_acquire() {
        let now = t("2026-03-02T10:00:00Z");
        let mut bucket = RefillBucket::full(250_000.0, now);
        assert!(bucket.try_acquire(100_000.0));
        // Exactly what remains is granted...
        assert!(bucket.try_acquire(150_000.0));
        // ...one more is not.
        assert!(!bucket.try_acquire(1.0));
    }

    #[test]
    fn test_wait_for_deficit() {
        let now = t("2026-03-02T10:00:00Z");
        let mut bucket = RefillBucket::full(60.0, now);
        assert!(bucket.try_acquire(60.0));
        // One token refills in one second at 60/min.
        let wait = bucket.wait_for(1.0);
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-6);
        assert_eq!(bucket.wait_for(0.0), Duration::ZERO);
    }

    #[test]
    fn test_release_clamps_to_capacity() {
        let now = t("2026-03-02T10:00:00Z");
        let mut bucket = RefillBucket::full(10.0, now);
        assert!(bucket.try_acquire(4.0));
        bucket.release(100.0);
        assert!((bucket.available - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_day_bucket_counts_and_caps() {
        let tz = chrono_tz::America::Los_Angeles;
        let now = t("2026-03-02T18:00:00Z");
        let mut bucket = DayBucket::new(3, now, tz);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.count_for_day, 3);
    }

    #[test]
    fn test_day_bucket_resets_exactly_once_on_crossing() {
        let tz = chrono_tz::America::Los_Angeles;
        // 2026-03-02 10:00 local (18:00 UTC, PST is UTC-8).
        let now = t("2026-03-02T18:00:00Z");
        let mut bucket = DayBucket::new(25, now, tz);
        for _ in 0..25 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());

        // Boundary is 2026-03-03 00:00 PST = 08:00 UTC.
        let expected_boundary = tz
            .with_ymd_and_hms(2026, 3, 3, 0, 0, 0)
            .single()
            .map(|d| d.with_timezone(&Utc));
        assert_eq!(Some(bucket.day_boundary_at), expected_boundary);

        // Just before the boundary: no reset.
        let before = bucket.rolled(t("2026-03-03T07:59:59Z"), tz);
        assert_eq!(before.count_for_day, 25);

        // At the boundary: reset, boundary advances a day.
        let after = bucket.rolled(t("2026-03-03T08:00:00Z"), tz);
        assert_eq!(after.count_for_day, 0);
        assert!(after.day_boundary_at > bucket.day_boundary_at);
    }

    #[test]
    fn test_day_bucket_collapses_multiple_days() {
        let tz = chrono_tz::America::Los_Angeles;
        let now = t("2026-03-02T18:00:00Z");
        let mut bucket = DayBucket::new(5, now, tz);
        assert!(bucket.try_acquire());

        let week_later = bucket.rolled(t("2026-03-09T18:00:00Z"), tz);
        assert_eq!(week_later.count_for_day, 0);
        assert!(week_later.day_boundary_at > t("2026-03-09T18:00:00Z"));
    }

    #[test]
    fn test_wait_until_reset() {
        let tz = chrono_tz::America::Los_Angeles;
        let now = t("2026-03-02T18:00:00Z");
        let bucket = DayBucket::new(5, now, tz);
        let wait = bucket.wait_until_reset(now);
        // 10:00 PST to midnight PST is 14 hours.
        assert_eq!(wait, Duration::from_secs(14 * 3600));
    }

    #[test]
    fn test_state_serde_wire_format() {
        let now = t("2026-03-02T10:00:00Z");
        let bucket = RefillBucket::full(5.0, now);
        let json = serde_json::to_string(&bucket).unwrap_or_default();
        assert!(json.contains("\"capacity\""));
        assert!(json.contains("\"available\""));
        assert!(json.contains("\"lastRefillAt\""));
        let back: RefillBucket =
            serde_json::from_str(&json).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(back, bucket);

        let tz = chrono_tz::America::Los_Angeles;
        let day = DayBucket::new(25, now, tz);
        let json = serde_json::to_string(&day).unwrap_or_default();
        assert!(json.contains("\"countForDay\""));
        assert!(json.contains("\"dayBoundaryAt\""));
        let back: DayBucket = serde_json::from_str(&json).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(back, day);
    }
}
